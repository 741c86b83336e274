// This module implements the packed token stream consumed by the stitcher. A Token is a
// newtype over u64: the low 8 bits hold the TokenKind tag and the high 56 bits hold an
// inline payload, either the bytes of a short identifier name or an unsigned constant
// value. There is no intern table and no heap allocation; a real front end would store
// an index into an interned string table plus a source offset here, but the inline
// payload keeps the whole stream a flat array of integers. Names longer than seven
// bytes and constants wider than 56 bits cannot be represented; construction reports
// LiteralTooWide instead of truncating silently. Tokens are produced once by an
// external lexing stage, are immutable afterward, and the core only reads them by
// index through TokenStream. A human-readable dump of the stream is provided as a
// diagnostic convenience surface.

//! Packed token stream: fixed-width tagged values with inline payloads.

use crate::error::{StitchError, StitchResult};
use std::fmt::Write as _;

/// Bits reserved for the kind tag in the low end of a token.
const KIND_BITS: u32 = 8;
/// Bits available for the inline payload.
pub const PAYLOAD_BITS: u32 = 64 - KIND_BITS;
/// Maximum identifier length representable inline.
pub const MAX_NAME_LEN: usize = (PAYLOAD_BITS / 8) as usize;

/// Lexical token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TokenKind {
    Invalid = 0,
    Eq,
    Ident,
    Const,
    Plus,
    Times,
    LParen,
    RParen,
    Eof,
}

impl TokenKind {
    fn from_raw(raw: u8) -> TokenKind {
        match raw {
            1 => TokenKind::Eq,
            2 => TokenKind::Ident,
            3 => TokenKind::Const,
            4 => TokenKind::Plus,
            5 => TokenKind::Times,
            6 => TokenKind::LParen,
            7 => TokenKind::RParen,
            8 => TokenKind::Eof,
            _ => TokenKind::Invalid,
        }
    }

    /// Upper-case kind name for dumps.
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Invalid => "INVALID",
            TokenKind::Eq => "EQ",
            TokenKind::Ident => "IDENT",
            TokenKind::Const => "CONST",
            TokenKind::Plus => "PLUS",
            TokenKind::Times => "TIMES",
            TokenKind::LParen => "LPAREN",
            TokenKind::RParen => "RPAREN",
            TokenKind::Eof => "EOF",
        }
    }
}

/// A fixed-width tagged lexical value: 8-bit kind, 56-bit inline payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token(u64);

impl Token {
    fn pack(kind: TokenKind, payload: u64) -> Token {
        debug_assert!(payload < (1 << PAYLOAD_BITS));
        Token((payload << KIND_BITS) | kind as u64)
    }

    /// A payload-free token: operators, parens, end-of-stream.
    pub fn punct(kind: TokenKind) -> Token {
        debug_assert!(!matches!(kind, TokenKind::Ident | TokenKind::Const));
        Token::pack(kind, 0)
    }

    /// An identifier token with the name stored inline, little-endian.
    ///
    /// Names longer than [`MAX_NAME_LEN`] bytes do not fit the inline payload
    /// and are rejected rather than truncated.
    pub fn ident(name: &str) -> StitchResult<Token> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > MAX_NAME_LEN {
            return Err(StitchError::LiteralTooWide {
                value: bytes.len() as u64,
                width: PAYLOAD_BITS,
            });
        }
        let mut payload = 0u64;
        for (i, &b) in bytes.iter().enumerate() {
            payload |= (b as u64) << (8 * i);
        }
        Ok(Token::pack(TokenKind::Ident, payload))
    }

    /// An integer constant token with the value stored inline.
    pub fn constant(value: u64) -> StitchResult<Token> {
        if value >= (1 << PAYLOAD_BITS) {
            return Err(StitchError::LiteralTooWide {
                value,
                width: PAYLOAD_BITS,
            });
        }
        Ok(Token::pack(TokenKind::Const, value))
    }

    /// Kind tag, extracted by masking.
    pub fn kind(self) -> TokenKind {
        TokenKind::from_raw((self.0 & 0xff) as u8)
    }

    /// Raw 56-bit payload.
    pub fn payload(self) -> u64 {
        self.0 >> KIND_BITS
    }

    /// First byte of an identifier's name. Storage slots are addressed by
    /// this byte alone.
    pub fn ident_initial(self) -> u8 {
        (self.payload() & 0xff) as u8
    }

    /// Identifier name reassembled from the inline bytes.
    pub fn ident_name(self) -> String {
        let mut name = String::new();
        let mut payload = self.payload();
        while payload != 0 {
            name.push((payload & 0xff) as u8 as char);
            payload >>= 8;
        }
        name
    }

    /// Constant value. Meaningful only for `Const` tokens.
    pub fn const_value(self) -> u64 {
        self.payload()
    }
}

/// An immutable, index-addressed sequence of tokens.
///
/// The stream is produced by an external lexing stage and terminated by an
/// explicit `Eof` marker; the core only ever reads it by index.
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>) -> TokenStream {
        TokenStream { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Token> {
        self.tokens.get(index).copied()
    }

    /// Human-readable listing of the stream, one token per line.
    pub fn dump(&self) -> String {
        let mut out = String::from("tokens:\n-------\n");
        for (i, tok) in self.tokens.iter().enumerate() {
            match tok.kind() {
                TokenKind::Ident => {
                    let _ = writeln!(out, "{i:02}: IDENT '{}'", tok.ident_name());
                }
                TokenKind::Const => {
                    let _ = writeln!(out, "{i:02}: CONST {}", tok.const_value());
                }
                kind => {
                    let _ = writeln!(out, "{i:02}: {}", kind.name());
                }
            }
        }
        out
    }
}

//! patchjit - Minimal copy-and-patch JIT core.
//!
//! patchjit turns a fixed-shape expression tree into machine code by copying
//! precompiled fragments ("snippets") into an executable buffer and patching
//! their embedded operands, instead of emitting instructions one at a time.
//! Snippets are keyed by (operation, live-value-count): every variant for a
//! given live count agrees on a positional calling convention, so the
//! stitcher never tracks physical value locations and never shuffles live
//! values between fragments. No register allocator exists anywhere.
//!
//! # Primary Usage
//!
//! ```no_run
//! use patchjit::ir::{AstKind, Token, TokenKind, TokenStream, TreeBuilder};
//! use patchjit::memory::StorageBlock;
//! use patchjit::stitcher::{compile, DEFAULT_CODE_CAPACITY};
//! use patchjit::x64::default_catalog;
//!
//! # fn main() -> patchjit::StitchResult<()> {
//! // x = y + 2
//! let tokens = TokenStream::new(vec![
//!     Token::ident("x")?,
//!     Token::punct(TokenKind::Eq),
//!     Token::ident("y")?,
//!     Token::punct(TokenKind::Plus),
//!     Token::constant(2)?,
//!     Token::punct(TokenKind::Eof),
//! ]);
//! let mut tree = TreeBuilder::new();
//! tree.name_lval(0)?;
//! tree.name(2)?;
//! tree.constant(4)?;
//! tree.binary(AstKind::Add)?;
//! tree.binary(AstKind::Assign)?;
//! let tree = tree.finish()?;
//!
//! let catalog = default_catalog()?;
//! let mut storage = StorageBlock::new()?;
//! storage.set('y', 40)?;
//!
//! let mut expr = compile(&tree, &tokens, &catalog, storage, DEFAULT_CODE_CAPACITY)?;
//! unsafe { expr.run() };
//! assert_eq!(expr.storage().get('x')?, 42);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - Packed token stream and postorder syntax tree (flat tagged
//!   integers, no pointers)
//! - [`catalog`] - Snippet catalog contract: `(op, live-count) → (bytes,
//!   patch points)`
//! - [`stitcher`] - One-pass emitter: copy the variant for the current
//!   virtual-stack depth, patch, advance
//! - [`memory`] - mmap-backed code and storage segments with a
//!   writable→executable typestate
//! - [`x64`] - Default x86-64 snippet family, assembled with iced-x86

pub mod catalog;
pub mod error;
pub mod ir;
pub mod memory;
pub mod stitcher;
pub mod x64;

// Re-export the surface most callers need.
pub use catalog::{OpKind, Operand, PatchKind, PatchPoint, Snippet, SnippetCatalog};
pub use error::{StitchError, StitchResult};
pub use ir::{AstKind, AstNode, SyntaxTree, Token, TokenKind, TokenStream, TreeBuilder};
pub use memory::{CodeBlock, ExecutableCode, MemoryError, StorageBlock};
pub use stitcher::{compile, required_snippets, CompiledExpr, Stitcher, DEFAULT_CODE_CAPACITY};

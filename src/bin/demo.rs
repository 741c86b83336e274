//! End-to-end copy-and-patch demo.
//!
//! Builds the pre-lexed token stream and pre-parsed postorder tree for
//!
//! ```text
//! a = (b + c + f * g) * (d + 3)
//! ```
//!
//! dumps both, stitches them into executable memory, runs the routine, and
//! prints the final value of `a` (329 with the default seeds).

use clap::Parser;
use patchjit::ir::{AstKind, Token, TokenKind, TokenStream, TreeBuilder};
use patchjit::memory::StorageBlock;
use patchjit::stitcher::{compile, DEFAULT_CODE_CAPACITY};
use patchjit::x64::default_catalog;
use patchjit::{StitchResult, SyntaxTree};

#[derive(Parser)]
#[command(
    name = "patchjit",
    about = "Stitch and run the canonical copy-and-patch demo expression"
)]
struct Args {
    /// Seed a storage slot before execution, e.g. --set b=5. Repeatable.
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,

    /// Print the token and tree dumps and exit without executing.
    #[arg(long)]
    dump_only: bool,
}

/// The token stream a lexer would produce for the demo expression.
fn lex() -> StitchResult<TokenStream> {
    Ok(TokenStream::new(vec![
        Token::ident("a")?,            // 0
        Token::punct(TokenKind::Eq),   // 1
        Token::punct(TokenKind::LParen), // 2
        Token::ident("b")?,            // 3
        Token::punct(TokenKind::Plus), // 4
        Token::ident("c")?,            // 5
        Token::punct(TokenKind::Plus), // 6
        Token::ident("f")?,            // 7
        Token::punct(TokenKind::Times), // 8
        Token::ident("g")?,            // 9
        Token::punct(TokenKind::RParen), // 10
        Token::punct(TokenKind::Times), // 11
        Token::punct(TokenKind::LParen), // 12
        Token::ident("d")?,            // 13
        Token::punct(TokenKind::Plus), // 14
        Token::constant(3)?,           // 15
        Token::punct(TokenKind::RParen), // 16
        Token::punct(TokenKind::Eof),  // 17
    ]))
}

/// The postorder tree a parser would produce:
///
/// ```text
///           =
///          / \
///         a   *
///            / \
///           /   \
///          +     +
///         / \   / \
///        /   \ d   3
///       +     *
///      / \   / \
///     b   c f   g
/// ```
fn parse() -> StitchResult<SyntaxTree> {
    let mut tree = TreeBuilder::new();
    tree.name_lval(0)?; // a
    tree.name(3)?; // b
    tree.name(5)?; // c
    tree.binary(AstKind::Add)?;
    tree.name(7)?; // f
    tree.name(9)?; // g
    tree.binary(AstKind::Mul)?;
    tree.binary(AstKind::Add)?;
    tree.name(13)?; // d
    tree.constant(15)?; // 3
    tree.binary(AstKind::Add)?;
    tree.binary(AstKind::Mul)?;
    tree.binary(AstKind::Assign)?;
    tree.finish()
}

fn seed(
    storage: &mut StorageBlock,
    overrides: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    storage.set('a', 0x1111)?; // uninitialized marker
    storage.set('b', 2)?;
    storage.set('c', 3)?;
    storage.set('d', 4)?;
    storage.set('e', 0)?; // unused
    storage.set('f', 6)?;
    storage.set('g', 7)?;

    for spec in overrides {
        let (name, value) = spec
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=VALUE, got {spec:?}"))?;
        let mut chars = name.chars();
        let (Some(name), None) = (chars.next(), chars.next()) else {
            return Err(format!("slot names are single characters, got {name:?}").into());
        };
        let value: i32 = value.parse().map_err(|e| format!("{spec:?}: {e}"))?;
        storage.set(name, value)?;
    }
    Ok(())
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let tokens = lex()?;
    let tree = parse()?;

    print!("{}", tokens.dump());
    println!();
    print!("{}", tree.dump(&tokens));

    if args.dump_only {
        return Ok(());
    }

    let catalog = default_catalog()?;
    let mut storage = StorageBlock::new()?;
    seed(&mut storage, &args.set)?;

    let mut expr = compile(&tree, &tokens, &catalog, storage, DEFAULT_CODE_CAPACITY)?;
    println!("\nGenerated {} bytes of code, executing.", expr.code_size());

    // The default catalog emits x86-64; running it anywhere else would be
    // executing garbage.
    #[cfg(target_arch = "x86_64")]
    unsafe {
        expr.run()
    };
    #[cfg(not(target_arch = "x86_64"))]
    {
        eprintln!("host is not x86-64, skipping execution");
        return Ok(());
    }

    println!("\nFinal value of 'a': {}", expr.storage().get('a')?);
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

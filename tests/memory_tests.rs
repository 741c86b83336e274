//! Memory-protection tests: after finalization the code segment must be
//! read-execute and the storage segment read-write, verified through the
//! platform's protection tables rather than by attempting corruption.

#![cfg(target_os = "linux")]

use patchjit::ir::{AstKind, Token, TokenKind, TokenStream, TreeBuilder};
use patchjit::memory::{CodeBlock, StorageBlock};
use patchjit::stitcher::{compile, DEFAULT_CODE_CAPACITY};
use patchjit::x64::default_catalog;
use patchjit::SyntaxTree;

/// Permission string ("rwxp" style) of the mapping containing `addr`.
fn perms_of(addr: u64) -> String {
    let maps = std::fs::read_to_string("/proc/self/maps").unwrap();
    for line in maps.lines() {
        let mut fields = line.split_whitespace();
        let range = fields.next().unwrap();
        let perms = fields.next().unwrap();
        let (start, end) = range.split_once('-').unwrap();
        let start = u64::from_str_radix(start, 16).unwrap();
        let end = u64::from_str_radix(end, 16).unwrap();
        if (start..end).contains(&addr) {
            return perms.to_string();
        }
    }
    panic!("no mapping contains {addr:#x}");
}

fn tiny_inputs() -> (TokenStream, SyntaxTree) {
    // x = 7
    let tokens = TokenStream::new(vec![
        Token::ident("x").unwrap(),
        Token::punct(TokenKind::Eq),
        Token::constant(7).unwrap(),
        Token::punct(TokenKind::Eof),
    ]);
    let mut b = TreeBuilder::new();
    b.name_lval(0).unwrap();
    b.constant(2).unwrap();
    b.binary(AstKind::Assign).unwrap();
    (tokens, b.finish().unwrap())
}

#[test]
fn finalized_code_is_execute_only_and_storage_stays_data() {
    let catalog = default_catalog().unwrap();
    let (tokens, tree) = tiny_inputs();
    let storage = StorageBlock::new().unwrap();
    let storage_addr = storage.base_addr();

    let expr = compile(&tree, &tokens, &catalog, storage, DEFAULT_CODE_CAPACITY).unwrap();

    let code_perms = perms_of(expr.code_addr());
    assert!(code_perms.starts_with("r-x"), "code mapped {code_perms}");

    let storage_perms = perms_of(storage_addr);
    assert!(
        storage_perms.starts_with("rw-"),
        "storage mapped {storage_perms}"
    );
}

#[test]
fn writable_code_block_is_not_yet_executable() {
    let mut code = CodeBlock::new(4096).unwrap();
    code.append(&[0xc3]).unwrap();
    let base = code.as_slice().as_ptr() as u64;
    let perms = perms_of(base);
    assert!(perms.starts_with("rw-"), "writable block mapped {perms}");
}

#[cfg(target_arch = "x86_64")]
#[test]
fn storage_survives_execution_and_reads_are_stable() {
    let catalog = default_catalog().unwrap();
    let (tokens, tree) = tiny_inputs();
    let mut storage = StorageBlock::new().unwrap();
    storage.set('x', -1).unwrap();

    let mut expr = compile(&tree, &tokens, &catalog, storage, DEFAULT_CODE_CAPACITY).unwrap();
    unsafe { expr.run() };

    assert_eq!(expr.storage().get('x').unwrap(), 7);
    assert_eq!(expr.storage().get('x').unwrap(), 7);
}

// This module builds the default x86-64 snippet catalog using the iced-x86 code_asm
// assembler. The positional calling convention: live value n (0-based from the bottom of
// the virtual stack) lives in the n-th register of the fixed caller-saved sequence
// rax, rcx, rdx, rsi, rdi, r8, r9, r10, r11. Every snippet family is sliced by the live
// count at its entry, so a fragment for depth d already knows which registers hold the
// current values and which register receives a new one; no value ever moves between
// fragments. Nine caller-saved registers bound the catalog at nine live values; deeper
// trees surface as a catalog miss rather than wrong code. Values are 32-bit, matching
// the i32 storage cells. Patch-point offsets are never hardcoded: each patched snippet
// is assembled with a sentinel immediate and the sentinel bytes are located by scanning,
// so instruction-length changes in the assembler cannot silently skew a patch. All
// fragments are straight-line and fall through; only the Return snippet ends the routine.

//! Default x86-64 snippet catalog.

use crate::catalog::{OpKind, PatchKind, PatchPoint, Snippet, SnippetCatalog};
use crate::error::{StitchError, StitchResult};
use iced_x86::code_asm::*;
use iced_x86::IcedError;

/// Highest representable live-value count: one caller-saved register per slot.
pub const MAX_LIVE: u8 = 9;

/// Slot-to-register assignment, 64-bit names. rbx/rbp/r12-r15 are callee
/// saved under the System V ABI and the stitched routine never saves them,
/// so they are off limits.
const SLOT64: [AsmRegister64; MAX_LIVE as usize] = [rax, rcx, rdx, rsi, rdi, r8, r9, r10, r11];

/// Slot-to-register assignment, 32-bit names.
const SLOT32: [AsmRegister32; MAX_LIVE as usize] =
    [eax, ecx, edx, esi, edi, r8d, r9d, r10d, r11d];

/// Sentinel for 64-bit absolute-address patch points.
const ADDR_SENTINEL: u64 = 0x1122_3344_5566_7788;

/// Sentinel for 32-bit immediate patch points.
const IMM_SENTINEL: u32 = 0xaabb_ccdd;

fn build_err(e: IcedError) -> StitchError {
    StitchError::CatalogBuild(e.to_string())
}

/// Assemble one straight-line fragment at IP 0. Nothing here is
/// RIP-relative, so the base address is irrelevant.
fn assemble(
    build: impl FnOnce(&mut CodeAssembler) -> Result<(), IcedError>,
) -> StitchResult<Vec<u8>> {
    let mut asm = CodeAssembler::new(64).map_err(build_err)?;
    build(&mut asm).map_err(build_err)?;
    asm.assemble(0).map_err(build_err)
}

/// Locate the unique occurrence of the sentinel bytes in a fragment.
fn sentinel_offset(bytes: &[u8], sentinel: &[u8]) -> StitchResult<usize> {
    bytes
        .windows(sentinel.len())
        .position(|w| w == sentinel)
        .ok_or_else(|| StitchError::CatalogBuild("sentinel not found in assembled snippet".into()))
}

fn abs64_snippet(bytes: Vec<u8>) -> StitchResult<Snippet> {
    let offset = sentinel_offset(&bytes, &ADDR_SENTINEL.to_le_bytes())?;
    Snippet::new(
        bytes,
        vec![PatchPoint {
            offset,
            kind: PatchKind::Abs64,
        }],
    )
}

fn imm32_snippet(bytes: Vec<u8>) -> StitchResult<Snippet> {
    let offset = sentinel_offset(&bytes, &IMM_SENTINEL.to_le_bytes())?;
    Snippet::new(
        bytes,
        vec![PatchPoint {
            offset,
            kind: PatchKind::Imm32,
        }],
    )
}

fn plain_snippet(bytes: Vec<u8>) -> StitchResult<Snippet> {
    Snippet::new(bytes, Vec::new())
}

/// Build the full default catalog: load variants for every depth with a
/// free slot, binary variants for every depth with two live values, and
/// the terminating return.
pub fn default_catalog() -> StitchResult<SnippetCatalog> {
    let mut catalog = SnippetCatalog::new();

    for live in 0..MAX_LIVE {
        let dst64 = SLOT64[live as usize];
        let dst32 = SLOT32[live as usize];

        // movabs dst, <slot address>
        let bytes = assemble(|a| a.mov(dst64, ADDR_SENTINEL))?;
        catalog.insert(OpKind::LoadAddr, live, abs64_snippet(bytes)?);

        // movabs dst, <slot address>; mov dst32, dword [dst]
        let bytes = assemble(|a| {
            a.mov(dst64, ADDR_SENTINEL)?;
            a.mov(dst32, dword_ptr(dst64))
        })?;
        catalog.insert(OpKind::LoadValue, live, abs64_snippet(bytes)?);

        // mov dst32, <literal>
        let bytes = assemble(|a| a.mov(dst32, IMM_SENTINEL))?;
        catalog.insert(OpKind::LoadConst, live, imm32_snippet(bytes)?);
    }

    for live in 2..=MAX_LIVE {
        let lhs32 = SLOT32[(live - 2) as usize];
        let rhs32 = SLOT32[(live - 1) as usize];
        let addr64 = SLOT64[(live - 2) as usize];

        let bytes = assemble(|a| a.add(lhs32, rhs32))?;
        catalog.insert(OpKind::Add, live, plain_snippet(bytes)?);

        let bytes = assemble(|a| a.imul_2(lhs32, rhs32))?;
        catalog.insert(OpKind::Mul, live, plain_snippet(bytes)?);

        // mov dword [addr], value
        let bytes = assemble(|a| a.mov(dword_ptr(addr64), rhs32))?;
        catalog.insert(OpKind::AssignIndirect, live, plain_snippet(bytes)?);
    }

    let bytes = assemble(|a| a.ret())?;
    catalog.insert(OpKind::Return, 0, plain_snippet(bytes)?);

    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_every_reachable_key() {
        let catalog = default_catalog().unwrap();
        for live in 0..MAX_LIVE {
            assert!(catalog.contains(OpKind::LoadAddr, live));
            assert!(catalog.contains(OpKind::LoadValue, live));
            assert!(catalog.contains(OpKind::LoadConst, live));
        }
        for live in 2..=MAX_LIVE {
            assert!(catalog.contains(OpKind::Add, live));
            assert!(catalog.contains(OpKind::Mul, live));
            assert!(catalog.contains(OpKind::AssignIndirect, live));
        }
        assert!(catalog.contains(OpKind::Return, 0));
        // Nothing beyond the register file.
        assert!(!catalog.contains(OpKind::LoadConst, MAX_LIVE));
        assert!(!catalog.contains(OpKind::Add, MAX_LIVE + 1));
    }

    #[test]
    fn return_snippet_is_a_bare_ret() {
        let catalog = default_catalog().unwrap();
        let ret = catalog.lookup(OpKind::Return, 0).unwrap();
        assert_eq!(ret.bytes(), &[0xc3]);
        assert!(ret.patches().is_empty());
    }

    #[test]
    fn load_snippets_expose_one_address_patch() {
        let catalog = default_catalog().unwrap();
        for live in 0..MAX_LIVE {
            for op in [OpKind::LoadAddr, OpKind::LoadValue] {
                let s = catalog.lookup(op, live).unwrap();
                assert_eq!(s.patches().len(), 1, "{op:?} at {live}");
                assert_eq!(s.patches()[0].kind, PatchKind::Abs64);
                let off = s.patches()[0].offset;
                assert_eq!(
                    &s.bytes()[off..off + 8],
                    &ADDR_SENTINEL.to_le_bytes(),
                    "{op:?} at {live}"
                );
            }
            let s = catalog.lookup(OpKind::LoadConst, live).unwrap();
            assert_eq!(s.patches().len(), 1);
            assert_eq!(s.patches()[0].kind, PatchKind::Imm32);
        }
    }

    #[test]
    fn binary_snippets_carry_no_patches() {
        let catalog = default_catalog().unwrap();
        for live in 2..=MAX_LIVE {
            for op in [OpKind::Add, OpKind::Mul, OpKind::AssignIndirect] {
                let s = catalog.lookup(op, live).unwrap();
                assert!(!s.is_empty());
                assert!(s.patches().is_empty(), "{op:?} at {live}");
            }
        }
    }

    #[test]
    fn catalog_build_is_deterministic() {
        let a = default_catalog().unwrap();
        let b = default_catalog().unwrap();
        for live in 0..MAX_LIVE {
            assert_eq!(
                a.lookup(OpKind::LoadValue, live).unwrap().bytes(),
                b.lookup(OpKind::LoadValue, live).unwrap().bytes()
            );
        }
    }
}

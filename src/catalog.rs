// This module defines the snippet catalog contract of the copy-and-patch core. A Snippet
// is an opaque, immutable machine-code fragment plus the list of patch points where the
// stitcher must write caller-supplied operands (absolute slot addresses or 32-bit
// immediates) before the bytes are valid to execute. Snippets are keyed by (OpKind,
// live-value-count): every variant for a given live count agrees on a positional calling
// convention, so a fragment selected for a depth already knows where each live value
// resides and no shuffling between fragments is ever emitted. All variants end in a form
// that falls through into the next copied fragment; expression evaluation has no
// control-flow joins, so no branch targets are ever patched here. A missing variant is a
// hard configuration error (CatalogMiss), never a silent fallback. Generation of the
// fragments themselves is external to this contract; src/x64 provides a default family.

//! Snippet catalog: `(operation, live-value-count) → (bytes, patch points)`.

use crate::error::{StitchError, StitchResult};
use std::collections::HashMap;

/// Logical operations the stitcher can emit, i.e. snippet families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Push the address of a named storage slot (assignment target).
    LoadAddr,
    /// Push the value of a named storage slot.
    LoadValue,
    /// Push an inline integer constant.
    LoadConst,
    /// Pop two values, push their sum.
    Add,
    /// Pop two values, push their product.
    Mul,
    /// Pop an address and a value, store the value through the address.
    AssignIndirect,
    /// Terminate the stitched routine.
    Return,
}

/// What a patch point expects to be written into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// Absolute 64-bit address of a storage slot.
    Abs64,
    /// 32-bit immediate literal.
    Imm32,
}

impl PatchKind {
    pub fn size(self) -> usize {
        match self {
            PatchKind::Abs64 => 8,
            PatchKind::Imm32 => 4,
        }
    }
}

/// An offset within a snippet's bytes awaiting an operand.
#[derive(Debug, Clone, Copy)]
pub struct PatchPoint {
    pub offset: usize,
    pub kind: PatchKind,
}

/// A caller-supplied operand for one patch point.
#[derive(Debug, Clone, Copy)]
pub enum Operand {
    Addr(u64),
    Imm(u32),
}

/// A precompiled machine-code fragment with its patch points.
#[derive(Debug, Clone)]
pub struct Snippet {
    bytes: Vec<u8>,
    patches: Vec<PatchPoint>,
}

impl Snippet {
    /// Wrap raw fragment bytes. Every patch point must lie fully inside the
    /// fragment; a catalog producer handing out an out-of-range offset is a
    /// configuration bug surfaced here rather than at stitch time.
    pub fn new(bytes: Vec<u8>, patches: Vec<PatchPoint>) -> StitchResult<Snippet> {
        for p in &patches {
            if p.offset + p.kind.size() > bytes.len() {
                return Err(StitchError::CatalogBuild(format!(
                    "patch point at {}+{} exceeds {}-byte snippet",
                    p.offset,
                    p.kind.size(),
                    bytes.len()
                )));
            }
        }
        Ok(Snippet { bytes, patches })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn patches(&self) -> &[PatchPoint] {
        &self.patches
    }
}

/// Keyed lookup table of snippet variants.
///
/// Must be fully populated for every `(operation, live-count)` combination
/// reachable from a given tree before stitching it; see
/// [`crate::stitcher::required_snippets`] for a preflight.
#[derive(Debug, Default)]
pub struct SnippetCatalog {
    snippets: HashMap<(OpKind, u8), Snippet>,
}

impl SnippetCatalog {
    pub fn new() -> SnippetCatalog {
        SnippetCatalog {
            snippets: HashMap::new(),
        }
    }

    /// Register the variant of `op` for `live` values on the virtual stack.
    /// Replaces any previous registration for the same key.
    pub fn insert(&mut self, op: OpKind, live: u8, snippet: Snippet) {
        self.snippets.insert((op, live), snippet);
    }

    pub fn contains(&self, op: OpKind, live: u8) -> bool {
        self.snippets.contains_key(&(op, live))
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Look up the variant of `op` for `live` values. A miss is a hard
    /// configuration error; the stitcher never proceeds with wrong code.
    pub fn lookup(&self, op: OpKind, live: u8) -> StitchResult<&Snippet> {
        self.snippets
            .get(&(op, live))
            .ok_or(StitchError::CatalogMiss { op, live })
    }

    /// Look up, copy, and patch in one step: appends the fully patched
    /// fragment bytes to `out`. Operands must match the snippet's patch
    /// points one for one.
    pub fn render(
        &self,
        op: OpKind,
        live: u8,
        operands: &[Operand],
        out: &mut Vec<u8>,
    ) -> StitchResult<()> {
        let snippet = self.lookup(op, live)?;
        if operands.len() != snippet.patches.len() {
            return Err(StitchError::BadSnippet {
                op,
                live,
                reason: "operand count does not match patch points",
            });
        }
        let base = out.len();
        out.extend_from_slice(&snippet.bytes);
        for (p, operand) in snippet.patches.iter().zip(operands) {
            let at = base + p.offset;
            match (p.kind, operand) {
                (PatchKind::Abs64, Operand::Addr(addr)) => {
                    out[at..at + 8].copy_from_slice(&addr.to_le_bytes());
                }
                (PatchKind::Imm32, Operand::Imm(imm)) => {
                    out[at..at + 4].copy_from_slice(&imm.to_le_bytes());
                }
                _ => {
                    return Err(StitchError::BadSnippet {
                        op,
                        live,
                        reason: "operand kind does not match patch point",
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_miss_is_a_hard_error() {
        let catalog = SnippetCatalog::new();
        let err = catalog.lookup(OpKind::Add, 2).unwrap_err();
        assert!(matches!(
            err,
            StitchError::CatalogMiss {
                op: OpKind::Add,
                live: 2
            }
        ));
    }

    #[test]
    fn render_patches_operands_in_place() {
        let mut catalog = SnippetCatalog::new();
        let snippet = Snippet::new(
            vec![0x90, 0, 0, 0, 0, 0x90],
            vec![PatchPoint {
                offset: 1,
                kind: PatchKind::Imm32,
            }],
        )
        .unwrap();
        catalog.insert(OpKind::LoadConst, 0, snippet);

        let mut out = Vec::new();
        catalog
            .render(OpKind::LoadConst, 0, &[Operand::Imm(0xdead_beef)], &mut out)
            .unwrap();
        assert_eq!(out, vec![0x90, 0xef, 0xbe, 0xad, 0xde, 0x90]);
    }

    #[test]
    fn render_rejects_operand_kind_mismatch() {
        let mut catalog = SnippetCatalog::new();
        let snippet = Snippet::new(
            vec![0; 8],
            vec![PatchPoint {
                offset: 0,
                kind: PatchKind::Abs64,
            }],
        )
        .unwrap();
        catalog.insert(OpKind::LoadAddr, 0, snippet);

        let mut out = Vec::new();
        let err = catalog
            .render(OpKind::LoadAddr, 0, &[Operand::Imm(1)], &mut out)
            .unwrap_err();
        assert!(matches!(err, StitchError::BadSnippet { .. }));
    }

    #[test]
    fn out_of_range_patch_point_is_rejected_at_construction() {
        let err = Snippet::new(
            vec![0; 4],
            vec![PatchPoint {
                offset: 2,
                kind: PatchKind::Abs64,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, StitchError::CatalogBuild(_)));
    }
}

// This module is the code emitter of the copy-and-patch core: a strict one-pass
// transducer from the packed postorder tree to machine code. It keeps a single integer,
// the virtual-stack depth, and for each node selects the snippet variant keyed by the
// node's operation and the current depth, copies it to the code segment, patches in the
// storage-slot address or literal, and adjusts the depth by the operation's arity (leaf
// +1, add/mul -1, assign -2). After the root it appends the terminating return snippet.
// The walk never backtracks or revisits, so generation is linear in tree size. The same
// pass enforces the well-formedness invariants: leaf token references must resolve to a
// token of the right kind, operator displacements must point at a strictly prior node,
// and the depth must never go negative and must end at zero. Any violation aborts the
// stitch before anything could be invoked; it is never downgraded to a warning. The
// module also provides required_snippets, a non-emitting simulation of the same walk
// used to preflight catalog coverage, and the compile/CompiledExpr driver that ties the
// stitcher to the executable memory manager.

//! Code emitter: stitches catalog snippets over a postorder tree walk.

use crate::catalog::{OpKind, Operand, SnippetCatalog};
use crate::error::{StitchError, StitchResult};
use crate::ir::tree::WalkStep;
use crate::ir::{AstKind, SyntaxTree, TokenKind, TokenStream};
use crate::memory::{CodeBlock, ExecutableCode, StorageBlock};

/// Default code segment capacity for [`compile`], matching the storage
/// segment granularity of the demo.
pub const DEFAULT_CODE_CAPACITY: usize = 64 * 1024;

/// One-pass snippet stitcher over a token stream, catalog, and storage block.
pub struct Stitcher<'a> {
    catalog: &'a SnippetCatalog,
    tokens: &'a TokenStream,
    storage: &'a StorageBlock,
}

impl<'a> Stitcher<'a> {
    pub fn new(
        catalog: &'a SnippetCatalog,
        tokens: &'a TokenStream,
        storage: &'a StorageBlock,
    ) -> Stitcher<'a> {
        Stitcher {
            catalog,
            tokens,
            storage,
        }
    }

    /// Stitch `tree` into `code` and return the number of bytes emitted.
    ///
    /// Stitching is deterministic: the same tree, tokens, and catalog
    /// produce byte-identical output.
    pub fn stitch(&self, tree: &SyntaxTree, code: &mut CodeBlock) -> StitchResult<usize> {
        if tree.is_empty() {
            return Err(StitchError::malformed(0, "empty tree has no root"));
        }

        let start = code.len();
        let mut depth: u16 = 0;
        let mut scratch = Vec::new();

        for step in tree.walk() {
            scratch.clear();
            let live = live_key(depth, step.index)?;
            match step.kind {
                AstKind::Name => {
                    let addr = self.name_slot_addr(&step)?;
                    let op = if step.lval {
                        OpKind::LoadAddr
                    } else {
                        OpKind::LoadValue
                    };
                    self.catalog
                        .render(op, live, &[Operand::Addr(addr)], &mut scratch)?;
                    depth += 1;
                }
                AstKind::Const => {
                    let value = self.const_value(&step)?;
                    self.catalog
                        .render(OpKind::LoadConst, live, &[Operand::Imm(value)], &mut scratch)?;
                    depth += 1;
                }
                AstKind::Add | AstKind::Mul => {
                    check_operator(&step, depth)?;
                    let op = if step.kind == AstKind::Add {
                        OpKind::Add
                    } else {
                        OpKind::Mul
                    };
                    self.catalog.render(op, live, &[], &mut scratch)?;
                    depth -= 1;
                }
                AstKind::Assign => {
                    check_operator(&step, depth)?;
                    self.catalog
                        .render(OpKind::AssignIndirect, live, &[], &mut scratch)?;
                    depth -= 2;
                }
                AstKind::Invalid => {
                    return Err(StitchError::malformed(step.index, "invalid node kind"));
                }
            }
            log::trace!(
                "{:02}: {} live {} -> {}, {} bytes",
                step.index,
                step.kind.name(),
                live,
                depth,
                scratch.len()
            );
            code.append(&scratch)?;
        }

        if depth != 0 {
            return Err(StitchError::malformed(
                tree.len() - 1,
                format!("virtual stack ends at depth {depth}, expected 0"),
            ));
        }

        scratch.clear();
        self.catalog.render(OpKind::Return, 0, &[], &mut scratch)?;
        code.append(&scratch)?;

        let emitted = code.len() - start;
        log::debug!("stitched {} nodes into {} bytes of code", tree.len(), emitted);
        Ok(emitted)
    }

    /// Resolve a name leaf to the absolute address of its storage slot.
    fn name_slot_addr(&self, step: &WalkStep) -> StitchResult<u64> {
        let token = self.tokens.get(step.payload as usize).ok_or_else(|| {
            StitchError::malformed(
                step.index,
                format!("token index {} out of range", step.payload),
            )
        })?;
        if token.kind() != TokenKind::Ident {
            return Err(StitchError::malformed(
                step.index,
                format!("NAME leaf references a {} token", token.kind().name()),
            ));
        }
        self.storage.slot_addr(token.ident_initial() as char)
    }

    /// Resolve a constant leaf to a 32-bit immediate.
    fn const_value(&self, step: &WalkStep) -> StitchResult<u32> {
        let token = self.tokens.get(step.payload as usize).ok_or_else(|| {
            StitchError::malformed(
                step.index,
                format!("token index {} out of range", step.payload),
            )
        })?;
        if token.kind() != TokenKind::Const {
            return Err(StitchError::malformed(
                step.index,
                format!("CONST leaf references a {} token", token.kind().name()),
            ));
        }
        let value = token.const_value();
        u32::try_from(value).map_err(|_| StitchError::LiteralTooWide { value, width: 32 })
    }
}

/// Catalog keys are sliced by an 8-bit live count; a deeper virtual stack
/// cannot name a variant at all.
fn live_key(depth: u16, index: usize) -> StitchResult<u8> {
    u8::try_from(depth)
        .map_err(|_| StitchError::malformed(index, "virtual stack depth exceeds 255"))
}

/// Shared operator checks: the displacement must resolve to a strictly
/// prior node distinct from the implicit right operand, and two values must
/// be live to consume.
fn check_operator(step: &WalkStep, depth: u16) -> StitchResult<()> {
    let disp = step.payload as usize;
    if disp < 2 || disp > step.index {
        return Err(StitchError::malformed(
            step.index,
            format!("displacement {disp} does not resolve to a prior node"),
        ));
    }
    if depth < 2 {
        return Err(StitchError::malformed(
            step.index,
            format!(
                "{} consumes two values but only {depth} live",
                step.kind.name()
            ),
        ));
    }
    Ok(())
}

/// Simulate the stitcher's walk without emitting, yielding every
/// `(operation, live-count)` key the tree will ask the catalog for, in
/// emission order (the terminating return included).
///
/// Useful as a catalog-coverage preflight: a tree stitches cleanly iff all
/// returned keys resolve and the inputs are otherwise well formed.
pub fn required_snippets(tree: &SyntaxTree) -> StitchResult<Vec<(OpKind, u8)>> {
    if tree.is_empty() {
        return Err(StitchError::malformed(0, "empty tree has no root"));
    }
    let mut keys = Vec::with_capacity(tree.len() + 1);
    let mut depth: u16 = 0;

    for step in tree.walk() {
        let live = live_key(depth, step.index)?;
        match step.kind {
            AstKind::Name => {
                let op = if step.lval {
                    OpKind::LoadAddr
                } else {
                    OpKind::LoadValue
                };
                keys.push((op, live));
                depth += 1;
            }
            AstKind::Const => {
                keys.push((OpKind::LoadConst, live));
                depth += 1;
            }
            AstKind::Add | AstKind::Mul => {
                check_operator(&step, depth)?;
                let op = if step.kind == AstKind::Add {
                    OpKind::Add
                } else {
                    OpKind::Mul
                };
                keys.push((op, live));
                depth -= 1;
            }
            AstKind::Assign => {
                check_operator(&step, depth)?;
                keys.push((OpKind::AssignIndirect, live));
                depth -= 2;
            }
            AstKind::Invalid => {
                return Err(StitchError::malformed(step.index, "invalid node kind"));
            }
        }
    }

    if depth != 0 {
        return Err(StitchError::malformed(
            tree.len().saturating_sub(1),
            format!("virtual stack ends at depth {depth}, expected 0"),
        ));
    }
    keys.push((OpKind::Return, 0));
    Ok(keys)
}

/// A stitched, finalized routine together with the storage block its slot
/// addresses were patched against.
pub struct CompiledExpr {
    code: ExecutableCode,
    storage: StorageBlock,
}

impl CompiledExpr {
    /// Execute the stitched routine once, to completion.
    ///
    /// # Safety
    ///
    /// The catalog used to stitch this routine must have produced valid
    /// machine code for the host architecture that honors the positional
    /// convention and ends in a plain return. The default x86-64 catalog
    /// satisfies this on x86-64 hosts.
    pub unsafe fn run(&mut self) {
        unsafe { self.code.invoke() }
    }

    pub fn storage(&self) -> &StorageBlock {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut StorageBlock {
        &mut self.storage
    }

    /// Bytes of stitched code, including the terminating return.
    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    /// Base address of the read-execute segment, for protection queries.
    pub fn code_addr(&self) -> u64 {
        self.code.base_addr()
    }

    pub fn into_storage(self) -> StorageBlock {
        self.storage
    }
}

/// Allocate a code segment, stitch `tree` into it, finalize permissions,
/// and return the invocable routine. The storage block is taken by value:
/// its slot addresses are baked into the code, so the compiled expression
/// owns it for the rest of its life.
pub fn compile(
    tree: &SyntaxTree,
    tokens: &TokenStream,
    catalog: &SnippetCatalog,
    storage: StorageBlock,
    code_capacity: usize,
) -> StitchResult<CompiledExpr> {
    let mut code = CodeBlock::new(code_capacity)?;
    Stitcher::new(catalog, tokens, &storage).stitch(tree, &mut code)?;
    let code = code.finalize()?;
    Ok(CompiledExpr { code, storage })
}

// This module implements the packed postorder syntax tree. An AstNode is a newtype over
// u32: the low 7 bits hold the AstKind tag, bit 7 flags a leaf as an assignment target
// (lval), and the high 24 bits hold either a token index (leaves) or a displacement back
// to the left operand's defining node (binary operators). Array position doubles as node
// identity, so the tree carries no pointers. Because the sequence is a postorder
// (children-before-parent) linearization, the right operand of a binary node is always
// the immediately preceding slot and needs no stored displacement at all. Construction
// goes through TreeBuilder, which maintains a span stack, computes displacements itself,
// and rejects sequences that are not a single well-formed tree; SyntaxTree::from_raw
// accepts pre-packed nodes unvalidated for producers that are trusted to emit postorder.
// Traversal is a lazy single-pass iterator that resolves each node's tag and payload.

//! Packed postorder syntax tree with displacement-encoded operands.

use crate::error::{StitchError, StitchResult};
use crate::ir::token::{TokenKind, TokenStream};
use std::fmt::Write as _;

const KIND_MASK: u32 = 0x7f;
const LVAL_BIT: u32 = 0x80;
const PAYLOAD_SHIFT: u32 = 8;
/// Payload width: token index or left-operand displacement.
pub const NODE_PAYLOAD_BITS: u32 = 32 - PAYLOAD_SHIFT;

/// Syntax node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AstKind {
    Invalid = 0,
    Assign,
    Add,
    Mul,
    Name,
    Const,
}

impl AstKind {
    fn from_raw(raw: u32) -> AstKind {
        match raw {
            1 => AstKind::Assign,
            2 => AstKind::Add,
            3 => AstKind::Mul,
            4 => AstKind::Name,
            5 => AstKind::Const,
            _ => AstKind::Invalid,
        }
    }

    /// Upper-case kind name for dumps.
    pub fn name(self) -> &'static str {
        match self {
            AstKind::Invalid => "INVALID",
            AstKind::Assign => "ASSIGN",
            AstKind::Add => "ADD",
            AstKind::Mul => "MUL",
            AstKind::Name => "NAME",
            AstKind::Const => "CONST",
        }
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, AstKind::Name | AstKind::Const)
    }

    pub fn is_operator(self) -> bool {
        matches!(self, AstKind::Assign | AstKind::Add | AstKind::Mul)
    }
}

/// A fixed-width tagged syntax node: 7-bit kind, lval flag, 24-bit payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AstNode(u32);

impl AstNode {
    fn pack(kind: AstKind, lval: bool, payload: u32) -> StitchResult<AstNode> {
        if payload >= (1 << NODE_PAYLOAD_BITS) {
            return Err(StitchError::LiteralTooWide {
                value: payload as u64,
                width: NODE_PAYLOAD_BITS,
            });
        }
        let lval_bit = if lval { LVAL_BIT } else { 0 };
        Ok(AstNode((payload << PAYLOAD_SHIFT) | lval_bit | kind as u32))
    }

    /// A name-reference leaf pointing at an `Ident` token.
    pub fn name(token_index: u32, lval: bool) -> StitchResult<AstNode> {
        AstNode::pack(AstKind::Name, lval, token_index)
    }

    /// A constant-reference leaf pointing at a `Const` token.
    pub fn constant(token_index: u32) -> StitchResult<AstNode> {
        AstNode::pack(AstKind::Const, false, token_index)
    }

    /// A binary operator whose left operand's defining node sits `disp`
    /// slots earlier. The right operand is implicitly the preceding slot.
    pub fn operator(kind: AstKind, disp: u32) -> StitchResult<AstNode> {
        debug_assert!(kind.is_operator());
        AstNode::pack(kind, false, disp)
    }

    pub fn kind(self) -> AstKind {
        AstKind::from_raw(self.0 & KIND_MASK)
    }

    pub fn is_lval(self) -> bool {
        self.0 & LVAL_BIT != 0
    }

    /// Token index for leaves, left-operand displacement for operators.
    pub fn payload(self) -> u32 {
        self.0 >> PAYLOAD_SHIFT
    }
}

/// One resolved step of a postorder walk.
#[derive(Debug, Clone, Copy)]
pub struct WalkStep {
    pub index: usize,
    pub kind: AstKind,
    pub lval: bool,
    pub payload: u32,
}

/// Lazy single-pass iterator over a tree's nodes in stored order.
///
/// A walk is finite and not restartable mid-way; a fresh [`SyntaxTree::walk`]
/// always restarts at index 0.
pub struct Walk<'t> {
    nodes: &'t [AstNode],
    index: usize,
}

impl Iterator for Walk<'_> {
    type Item = WalkStep;

    fn next(&mut self) -> Option<WalkStep> {
        let node = *self.nodes.get(self.index)?;
        let step = WalkStep {
            index: self.index,
            kind: node.kind(),
            lval: node.is_lval(),
            payload: node.payload(),
        };
        self.index += 1;
        Some(step)
    }
}

/// A flat postorder sequence of packed nodes. The root is the final element.
pub struct SyntaxTree {
    nodes: Vec<AstNode>,
}

impl SyntaxTree {
    /// Wrap pre-packed nodes without validation. The producer is trusted to
    /// have emitted a postorder linearization; the stitcher still catches
    /// displacement and depth violations when it walks the sequence.
    pub fn from_raw(nodes: Vec<AstNode>) -> SyntaxTree {
        SyntaxTree { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<AstNode> {
        self.nodes.get(index).copied()
    }

    /// Start a fresh postorder walk at index 0.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            nodes: &self.nodes,
            index: 0,
        }
    }

    /// Human-readable listing of the tree, resolving leaf payloads through
    /// the token stream.
    pub fn dump(&self, tokens: &TokenStream) -> String {
        let mut out = String::from("ast:\n----\n");
        for step in self.walk() {
            let lval = if step.lval { " (lval)" } else { "" };
            let _ = write!(out, "{:02}: {}{}", step.index, step.kind.name(), lval);
            match step.kind {
                AstKind::Name => match tokens.get(step.payload as usize) {
                    Some(tok) if tok.kind() == TokenKind::Ident => {
                        let _ = writeln!(out, " '{}'", tok.ident_name());
                    }
                    _ => {
                        let _ = writeln!(out, " <bad token {}>", step.payload);
                    }
                },
                AstKind::Const => match tokens.get(step.payload as usize) {
                    Some(tok) if tok.kind() == TokenKind::Const => {
                        let _ = writeln!(out, " {}", tok.const_value());
                    }
                    _ => {
                        let _ = writeln!(out, " <bad token {}>", step.payload);
                    }
                },
                _ => {
                    let _ = writeln!(out);
                }
            }
        }
        out
    }
}

/// Builder that enforces postorder emission.
///
/// Leaves push a completed subtree; a binary operator consumes the two most
/// recently completed subtrees (left pushed before right) and computes the
/// left-operand displacement itself, so arbitrary index assignment is never
/// possible and the postorder adjacency invariant holds by construction.
pub struct TreeBuilder {
    nodes: Vec<AstNode>,
    /// Root indices of completed, not-yet-consumed subtrees.
    roots: Vec<usize>,
}

impl TreeBuilder {
    pub fn new() -> TreeBuilder {
        TreeBuilder {
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    fn push_leaf(&mut self, node: AstNode) {
        self.roots.push(self.nodes.len());
        self.nodes.push(node);
    }

    /// Append a name-reference leaf.
    pub fn name(&mut self, token_index: u32) -> StitchResult<()> {
        self.push_leaf(AstNode::name(token_index, false)?);
        Ok(())
    }

    /// Append a name-reference leaf flagged as an assignment target.
    pub fn name_lval(&mut self, token_index: u32) -> StitchResult<()> {
        self.push_leaf(AstNode::name(token_index, true)?);
        Ok(())
    }

    /// Append a constant-reference leaf.
    pub fn constant(&mut self, token_index: u32) -> StitchResult<()> {
        self.push_leaf(AstNode::constant(token_index)?);
        Ok(())
    }

    /// Append a binary operator over the two most recent subtrees.
    pub fn binary(&mut self, kind: AstKind) -> StitchResult<()> {
        if !kind.is_operator() {
            return Err(StitchError::malformed(
                self.nodes.len(),
                format!("{} is not a binary operator", kind.name()),
            ));
        }
        if self.roots.len() < 2 {
            return Err(StitchError::malformed(
                self.nodes.len(),
                format!(
                    "{} needs two completed subtrees, have {}",
                    kind.name(),
                    self.roots.len()
                ),
            ));
        }
        let _right_root = self.roots.pop().unwrap();
        let left_root = self.roots.pop().unwrap();
        let index = self.nodes.len();
        let disp = (index - left_root) as u32;
        self.roots.push(index);
        self.nodes.push(AstNode::operator(kind, disp)?);
        Ok(())
    }

    /// Finish the tree. Exactly one completed subtree must remain, and its
    /// root is necessarily the final index.
    pub fn finish(self) -> StitchResult<SyntaxTree> {
        if self.roots.len() != 1 {
            return Err(StitchError::malformed(
                self.nodes.len(),
                format!("expected exactly one root, found {}", self.roots.len()),
            ));
        }
        Ok(SyntaxTree { nodes: self.nodes })
    }
}

impl Default for TreeBuilder {
    fn default() -> Self {
        TreeBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // a = (b + c + f*g) * (d + 3), token indices as lexed left to right.
    fn demo_tree() -> SyntaxTree {
        let mut b = TreeBuilder::new();
        b.name_lval(0).unwrap(); // a
        b.name(3).unwrap(); // b
        b.name(5).unwrap(); // c
        b.binary(AstKind::Add).unwrap();
        b.name(7).unwrap(); // f
        b.name(9).unwrap(); // g
        b.binary(AstKind::Mul).unwrap();
        b.binary(AstKind::Add).unwrap();
        b.name(13).unwrap(); // d
        b.constant(15).unwrap(); // 3
        b.binary(AstKind::Add).unwrap();
        b.binary(AstKind::Mul).unwrap();
        b.binary(AstKind::Assign).unwrap();
        b.finish().unwrap()
    }

    #[test]
    fn builder_computes_left_displacements() {
        let tree = demo_tree();
        assert_eq!(tree.len(), 13);
        let disp_at = |i: usize| tree.get(i).unwrap().payload();
        assert_eq!(disp_at(3), 2); // b + c
        assert_eq!(disp_at(6), 2); // f * g
        assert_eq!(disp_at(7), 4); // (b+c) + (f*g)
        assert_eq!(disp_at(10), 2); // d + 3
        assert_eq!(disp_at(11), 4); // (..) * (d+3)
        assert_eq!(disp_at(12), 12); // a = ..
    }

    #[test]
    fn root_is_final_index() {
        let tree = demo_tree();
        assert_eq!(tree.get(tree.len() - 1).unwrap().kind(), AstKind::Assign);
    }

    #[test]
    fn lval_flag_survives_packing() {
        let tree = demo_tree();
        assert!(tree.get(0).unwrap().is_lval());
        assert!(!tree.get(1).unwrap().is_lval());
    }

    #[test]
    fn walk_is_single_pass_in_stored_order() {
        let tree = demo_tree();
        let indices: Vec<usize> = tree.walk().map(|s| s.index).collect();
        assert_eq!(indices, (0..13).collect::<Vec<_>>());
    }

    #[test]
    fn operator_without_two_subtrees_is_rejected() {
        let mut b = TreeBuilder::new();
        b.name(0).unwrap();
        let err = b.binary(AstKind::Add).unwrap_err();
        assert!(matches!(err, StitchError::MalformedTree { .. }));
    }

    #[test]
    fn finish_with_multiple_roots_is_rejected() {
        let mut b = TreeBuilder::new();
        b.name(0).unwrap();
        b.name(1).unwrap();
        assert!(b.finish().is_err());
    }

    #[test]
    fn finish_of_empty_builder_is_rejected() {
        assert!(TreeBuilder::new().finish().is_err());
    }

    #[test]
    fn token_index_beyond_payload_width_is_rejected() {
        assert!(AstNode::name(1 << 24, false).is_err());
    }
}

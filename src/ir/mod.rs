//! Packed input representations consumed by the stitcher.
//!
//! Both the token stream and the syntax tree are flat arrays of fixed-width
//! tagged integers: no pointers, no allocation per node, array position as
//! identity. They are produced by an external front end and consumed
//! read-only here.

pub mod token;
pub mod tree;

pub use token::{Token, TokenKind, TokenStream, MAX_NAME_LEN};
pub use tree::{AstKind, AstNode, SyntaxTree, TreeBuilder, Walk, WalkStep};

// This module defines error types for the patchjit stitcher using the thiserror crate
// for idiomatic Rust error handling. StitchError is the main error enum covering the
// failure taxonomy of the copy-and-patch core: over-wide inline literals at token
// construction or patch time, malformed postorder trees (bad displacements, virtual
// stack underflow, nonzero terminal depth), snippet catalog misses, fixed-capacity
// segment exhaustion, invalid storage slot names, catalog construction failures, and
// memory allocation/protection errors. Each variant carries relevant context (the
// offending node index, the missing (operation, live-count) key, byte counts) for
// debugging. The module also provides StitchResult<T> as a convenience alias. Every
// error here is unrecoverable at this layer: the stitcher reports and aborts, never
// retries or degrades, and a depth violation is never downgraded to a warning.

//! Error types for the copy-and-patch core.
//!
//! Using thiserror for more idiomatic error handling.

use crate::catalog::OpKind;
use crate::memory::MemoryError;
use thiserror::Error;

/// Main error type for stitching and invocation.
#[derive(Error, Debug)]
pub enum StitchError {
    #[error("literal too wide to encode inline: {value:#x} exceeds {width} bits")]
    LiteralTooWide { value: u64, width: u32 },

    #[error("malformed tree at node {index}: {reason}")]
    MalformedTree { index: usize, reason: String },

    #[error("no snippet for ({op:?}, live {live})")]
    CatalogMiss { op: OpKind, live: u8 },

    #[error("snippet for ({op:?}, live {live}) rejected: {reason}")]
    BadSnippet {
        op: OpKind,
        live: u8,
        reason: &'static str,
    },

    #[error("{segment} segment exhausted: need {needed} bytes, capacity {capacity}")]
    SegmentExhausted {
        segment: &'static str,
        needed: usize,
        capacity: usize,
    },

    #[error("storage has no slot for identifier {name:?}")]
    InvalidSlot { name: char },

    #[error("catalog construction failed: {0}")]
    CatalogBuild(String),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),
}

impl StitchError {
    /// Helper for malformed-tree errors, which all carry a node index.
    pub(crate) fn malformed(index: usize, reason: impl Into<String>) -> Self {
        StitchError::MalformedTree {
            index,
            reason: reason.into(),
        }
    }
}

/// Result type alias for stitching operations.
pub type StitchResult<T> = Result<T, StitchError>;

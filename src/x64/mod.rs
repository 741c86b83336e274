//! x86-64 architecture-specific components.
//!
//! The only architecture-dependent piece of the crate: the default snippet
//! catalog, assembled with iced-x86. Everything else consumes snippets
//! through the opaque catalog contract, so a catalog for another target
//! plugs in without touching the stitcher.

pub mod snippets;

pub use snippets::{default_catalog, MAX_LIVE};

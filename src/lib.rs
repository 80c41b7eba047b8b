//! Unfurl: a configuration expansion engine.
//!
//! Recursively expands template resources into their sub-resources, binds
//! every resource to a qualified name, resolves output references, and emits
//! a flat resource list plus the layout tree it was unfolded from.

pub mod cli;
pub mod core;

pub use crate::core::engine::{expand, expand_to_manifest, expand_with_scripts};
pub use crate::core::error::{ErrorKind, ExpansionError};

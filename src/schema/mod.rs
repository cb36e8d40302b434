//! Schema module - the structural schema language and the per-kind registry.
//!
//! The schema tells the rest of the crate how to address list entries:
//! by key fields, by value, by position, or not at all (atomic lists).

mod elements;
mod registry;

pub use elements::*;
pub use registry::*;

//! Typed module - operations on Values that need their schema.
//!
//! A [`TypedValue`] is validated on construction; after that it can be
//! turned into a field set, projected onto one, merged, or have paths
//! removed.

mod project;
mod typed_value;
mod validation;

#[cfg(test)]
mod project_test;

pub use typed_value::*;
pub use validation::*;

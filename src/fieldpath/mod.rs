//! Field path module - addresses into structured values, and sets of them.
//!
//! A [`Set`] records which locations of an object a writer owns. Sets are
//! read from each object's `metadata.managedFields` ([`ManagedFieldsEntry`])
//! and combined with [`Set::union`] and [`Set::leaves`] to decide which
//! parts of an object get propagated.

mod managed;
mod path;
mod serialize;
mod set;

pub use managed::*;
pub use path::*;
pub use serialize::*;
pub use set::*;

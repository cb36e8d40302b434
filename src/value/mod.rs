//! Value module - In-memory representation of decoded API objects.
//!
//! Objects arrive as JSON or YAML and are held as a [`Value`] tree; schema
//! knowledge is layered on top by the `typed` module.

mod value;

pub use value::*;

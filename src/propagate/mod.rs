//! Propagate module - field-scoped propagation between a tenant and a host
//! cluster.
//!
//! Two reconcilers run per resource kind:
//!
//! - [`Materializer`] (tenant to host) projects a tenant object onto the
//!   fields its writers own and applies the result as a host mirror,
//!   stamped with the engine's loop guard.
//! - [`Virtualizer`] (host to tenant) projects a stamped mirror onto the
//!   fields written by anyone but the engine and applies the `status` part
//!   of it to the tenant object.
//!
//! Because the virtualize direction never selects the engine's own fields,
//! nothing the engine materializes is ever reflected back.

mod engine;
mod error;
mod extract;
mod identity;
mod materialize;
mod mirror;
mod virtualize;

pub use engine::*;
pub use error::*;
pub use extract::*;
pub use identity::*;
pub use materialize::*;
pub use mirror::*;
pub use virtualize::*;

//! Cluster module - the transport seam between the engine and an API server.
//!
//! The engine talks to both clusters through the [`Cluster`] trait. A real
//! deployment plugs in an API client; [`InMemoryCluster`] emulates
//! server-side apply in process.

mod client;
mod memory;
mod object;

pub use client::*;
pub use memory::*;
pub use object::*;

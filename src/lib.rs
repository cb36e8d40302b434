//! # Propagate Controller
//!
//! Field-scoped, bidirectional propagation of resources between a tenant
//! cluster and a host cluster.
//!
//! Tenant objects are mirrored onto the host with only the fields their
//! writers own (materialize). What the host then adds to a mirror is copied
//! back into the tenant object's status (virtualize). Ownership comes from
//! server-side apply `managedFields`, so the engine never echoes its own
//! writes.
//!
//! ## Modules
//!
//! - [`value`] - In-memory representation of YAML/JSON objects
//! - [`fieldpath`] - Field paths, path sets and managed fields entries
//! - [`schema`] - Schema language and the per-kind schema registry
//! - [`typed`] - Schema-aware operations: validation, field sets, projection
//! - [`cluster`] - The cluster seam and an in-memory server-side apply cluster
//! - [`controller`] - Work queue, backoff and reconcile workers
//! - [`propagate`] - Extraction, the two reconcilers and the engine wiring
//! - [`config`] - Configuration file

pub mod cluster;
pub mod config;
pub mod controller;
pub mod fieldpath;
pub mod propagate;
pub mod schema;
pub mod typed;
pub mod value;

pub use cluster::{Cluster, ClusterError, GroupVersionKind, InMemoryCluster, Object, ObjectKey, WatchEvent};
pub use config::Config;
pub use fieldpath::{ManagedFieldsEntry, Path, PathElement, Set as FieldPathSet};
pub use propagate::{EventRouter, ManagerSelector, Propagator};
pub use schema::{KindSchema, SchemaRegistry};
pub use typed::TypedValue;
pub use value::Value;

//! Controller module - the reconcile driver.
//!
//! Events become keys on a [`WorkQueue`]; a [`Controller`] runs a pool of
//! workers that hand each key to a [`Reconciler`], retrying transient
//! failures with per-key [`Backoff`] and recording permanent ones in
//! [`Conditions`].

mod backoff;
mod conditions;
#[allow(clippy::module_inception)]
mod controller;
mod queue;

pub use backoff::*;
pub use conditions::*;
pub use controller::*;
pub use queue::*;

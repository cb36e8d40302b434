use super::extract::ExtractError;
use super::mirror::MirrorCollision;
use crate::cluster::{ClusterError, NotAnObject, ObjectKey};
use crate::controller::Retryable;
use thiserror::Error;

/// ReconcileError is everything that can stop a propagation reconcile.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Collision(#[from] MirrorCollision),

    #[error("projection is not an object: {0}")]
    NotAnObject(#[from] NotAnObject),

    /// A mirror carries the loop guard but not the object it came from.
    #[error("mirror {0} does not name its source")]
    UnknownSource(ObjectKey),
}

impl Retryable for ReconcileError {
    fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Cluster(err) => err.is_transient(),
            _ => false,
        }
    }
}

//! The operations the propagation engine needs from a cluster.

use super::object::{GroupVersionKind, Object, ObjectKey};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("{gvk} {key} not found")]
    NotFound { gvk: GroupVersionKind, key: ObjectKey },

    /// Another writer owns a field with a different value, or the object
    /// changed underneath the caller.
    #[error("conflict on {key}: {message}")]
    Conflict { key: ObjectKey, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    /// The request can never succeed as sent.
    #[error("invalid object: {0}")]
    Invalid(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    /// Transient errors are worth retrying with the same input.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. } | ClusterError::Transport(_))
    }
}

/// ApplyOptions attributes a server-side apply to a field manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    pub field_manager: String,
    /// Take ownership of fields another manager set to a different value.
    pub force: bool,
}

impl ApplyOptions {
    pub fn new(field_manager: impl Into<String>) -> Self {
        ApplyOptions {
            field_manager: field_manager.into(),
            force: false,
        }
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

/// ApplyOutcome is the stored object after an apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub object: Object,
    /// False when the apply left the object untouched.
    pub changed: bool,
}

/// Cluster is one declarative API endpoint.
///
/// Applies follow server-side apply semantics: the sent object is the full
/// intent of `field_manager`, fields it no longer sends are released, and
/// the manager's ownership is recorded in `metadata.managedFields`.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// A short name for logs, such as "host" or "tenant".
    fn name(&self) -> &str;

    async fn get(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<Object, ClusterError>;

    /// Lists objects of a kind, in one namespace or in all of them.
    async fn list(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Vec<Object>, ClusterError>;

    async fn apply(&self, object: Object, options: &ApplyOptions) -> Result<ApplyOutcome, ClusterError>;

    /// Applies to the status subresource. Only the `status` sub-tree of
    /// `object` is written.
    async fn apply_status(&self, object: Object, options: &ApplyOptions) -> Result<ApplyOutcome, ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let not_found = ClusterError::NotFound {
            gvk: GroupVersionKind::new("apps", "v1", "Deployment"),
            key: ObjectKey::new("ns", "web"),
        };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_transient());
        assert_eq!(not_found.to_string(), "apps/v1/Deployment ns/web not found");

        assert!(ClusterError::Transport("reset".into()).is_transient());
        assert!(ClusterError::Conflict {
            key: ObjectKey::new("ns", "web"),
            message: "stale".into()
        }
        .is_transient());
        assert!(!ClusterError::Invalid("bad".into()).is_transient());
    }

    #[test]
    fn test_apply_options() {
        let options = ApplyOptions::new("propagate-controller").force();
        assert_eq!(options.field_manager, "propagate-controller");
        assert!(options.force);
        assert!(!ApplyOptions::new("x").force);
    }
}

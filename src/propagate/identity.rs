//! The identity an engine writes under, and the decisions that follow from it.

use super::extract::ManagerSelector;
use super::mirror::{SOURCE_NAMESPACE_ANNOTATION, SOURCE_NAME_ANNOTATION};
use crate::cluster::{Object, ObjectKey};

pub const DEFAULT_FIELD_MANAGER: &str = "propagate-controller";
pub const DEFAULT_LOOP_GUARD_ANNOTATION: &str = "materialized-by";

/// Identity is shared by both directions of one engine: host mirrors are
/// applied under `field_manager`, and tenant status is too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub field_manager: String,
    pub loop_guard_annotation: String,
    /// Namespace on the host cluster that receives every mirror.
    pub host_namespace: String,
    /// Host-side managers whose fields are never virtualized, on top of
    /// the engine itself.
    pub exclude_managers: Vec<String>,
}

impl Identity {
    pub fn new(host_namespace: impl Into<String>) -> Self {
        Identity {
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            loop_guard_annotation: DEFAULT_LOOP_GUARD_ANNOTATION.to_string(),
            host_namespace: host_namespace.into(),
            exclude_managers: Vec::new(),
        }
    }

    /// The host object mirroring the tenant object `source`.
    pub fn mirror_key(&self, source: &ObjectKey) -> ObjectKey {
        ObjectKey::new(self.host_namespace.clone(), source.name.clone())
    }

    /// True if `object` was materialized by this engine.
    pub fn is_guarded(&self, object: &Object) -> bool {
        object.annotation(&self.loop_guard_annotation) == Some(self.field_manager.as_str())
    }

    /// Marks a mirror as ours and records where it came from.
    pub fn stamp(&self, mirror: &mut Object, source: &ObjectKey) {
        mirror.set_annotation(self.loop_guard_annotation.clone(), self.field_manager.clone());
        mirror.set_annotation(SOURCE_NAMESPACE_ANNOTATION, source.namespace.clone());
        mirror.set_annotation(SOURCE_NAME_ANNOTATION, source.name.clone());
    }

    /// Everything the tenant's own writers set.
    pub fn materialize_selector(&self) -> ManagerSelector {
        ManagerSelector::Any
    }

    /// Everything on the host that the engine did not write itself.
    pub fn virtualize_selector(&self) -> ManagerSelector {
        let mut excluded = Vec::with_capacity(self.exclude_managers.len() + 1);
        excluded.push(self.field_manager.clone());
        excluded.extend(self.exclude_managers.iter().cloned());
        ManagerSelector::Exclude(excluded)
    }
}

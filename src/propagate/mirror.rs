//! Which host object mirrors which tenant object.

use crate::cluster::{GroupVersionKind, Object, ObjectKey};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

/// Annotation naming the tenant namespace a host mirror was built from.
pub const SOURCE_NAMESPACE_ANNOTATION: &str = "propagate-controller/source-namespace";

/// Annotation naming the tenant object a host mirror was built from.
pub const SOURCE_NAME_ANNOTATION: &str = "propagate-controller/source-name";

/// A second tenant object resolved to a host object that already mirrors
/// another one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{gvk} {destination} already mirrors {existing}, refusing to mirror {requested} onto it")]
pub struct MirrorCollision {
    pub gvk: GroupVersionKind,
    pub destination: ObjectKey,
    pub existing: ObjectKey,
    pub requested: ObjectKey,
}

type Slot = (GroupVersionKind, ObjectKey);

/// MirrorRegistry is a two-way map between tenant objects and their host
/// mirrors. Every mapping is independent; concurrent claims of the same
/// destination are decided by whoever inserts first.
#[derive(Debug, Default)]
pub struct MirrorRegistry {
    by_source: DashMap<Slot, ObjectKey>,
    by_destination: DashMap<Slot, ObjectKey>,
}

impl MirrorRegistry {
    pub fn new() -> Self {
        MirrorRegistry::default()
    }

    /// Records that `destination` mirrors `source`. Returns true if the
    /// mapping is new; claiming the same pair again is a no-op.
    pub fn claim(
        &self,
        gvk: &GroupVersionKind,
        source: &ObjectKey,
        destination: &ObjectKey,
    ) -> Result<bool, MirrorCollision> {
        match self.by_destination.entry((gvk.clone(), destination.clone())) {
            Entry::Occupied(entry) if entry.get() != source => Err(MirrorCollision {
                gvk: gvk.clone(),
                destination: destination.clone(),
                existing: entry.get().clone(),
                requested: source.clone(),
            }),
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(source.clone());
                self.by_source
                    .insert((gvk.clone(), source.clone()), destination.clone());
                Ok(true)
            }
        }
    }

    pub fn destination(&self, gvk: &GroupVersionKind, source: &ObjectKey) -> Option<ObjectKey> {
        self.by_source
            .get(&(gvk.clone(), source.clone()))
            .map(|d| d.value().clone())
    }

    pub fn source(&self, gvk: &GroupVersionKind, destination: &ObjectKey) -> Option<ObjectKey> {
        self.by_destination
            .get(&(gvk.clone(), destination.clone()))
            .map(|s| s.value().clone())
    }

    /// Drops the mapping of `source` and returns its destination.
    pub fn release(&self, gvk: &GroupVersionKind, source: &ObjectKey) -> Option<ObjectKey> {
        let (_, destination) = self.by_source.remove(&(gvk.clone(), source.clone()))?;
        self.by_destination
            .remove_if(&(gvk.clone(), destination.clone()), |_, s| s == source);
        Some(destination)
    }

    /// Re-learns a mapping from the source annotations of a host mirror.
    /// Returns the source, or None if the object does not carry them.
    pub fn restore(&self, gvk: &GroupVersionKind, mirror: &Object) -> Option<Result<ObjectKey, MirrorCollision>> {
        let source = source_from_annotations(mirror)?;
        Some(self.claim(gvk, &source, &mirror.key()).map(|_| source))
    }

    /// Every tenant object of `gvk` that currently has a mirror.
    pub fn sources(&self, gvk: &GroupVersionKind) -> Vec<ObjectKey> {
        self.by_source
            .iter()
            .filter(|entry| &entry.key().0 == gvk)
            .map(|entry| entry.key().1.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}

/// The tenant object a host mirror names in its annotations.
pub fn source_from_annotations(mirror: &Object) -> Option<ObjectKey> {
    let name = mirror.annotation(SOURCE_NAME_ANNOTATION)?;
    let namespace = mirror.annotation(SOURCE_NAMESPACE_ANNOTATION).unwrap_or_default();
    if name.is_empty() {
        return None;
    }
    Some(ObjectKey::new(namespace, name))
}

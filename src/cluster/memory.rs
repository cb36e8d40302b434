//! In-process cluster with server-side apply semantics.
//!
//! Used by the tests and by the CLI dry run. Ownership follows the rules of
//! a real API server closely enough for propagation to behave the same way:
//!
//! - an apply owns every leaf it sends, except the object's identity fields;
//! - a field set to the same value by two managers is shared;
//! - a field set to a different value conflicts unless the apply is forced,
//!   in which case the other manager loses it;
//! - leaves a manager stops sending are removed unless another manager
//!   still owns them or something beneath them;
//! - `status` is written only through the status subresource.

use super::client::{ApplyOptions, ApplyOutcome, Cluster, ClusterError};
use super::object::{GroupVersionKind, Object, ObjectKey, WatchEvent, API_VERSION, KIND, METADATA, NAME, NAMESPACE};
use crate::fieldpath::{ManagedFieldsEntry, Path, Set};
use crate::schema::SchemaRegistry;
use crate::typed::{TypedValue, ValidationErrors};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Watch events beyond this many are dropped for slow receivers.
pub const WATCH_BUFFER_SIZE: usize = 1024;

const STATUS_SUBRESOURCE: &str = "status";

/// Fields that name an object rather than describe it. Nobody owns them.
static IDENTITY_FIELDS: Lazy<Set> = Lazy::new(|| {
    vec![
        Path::from_fields(&[API_VERSION]),
        Path::from_fields(&[KIND]),
        Path::from_fields(&[METADATA, NAME]),
        Path::from_fields(&[METADATA, NAMESPACE]),
    ]
    .into_iter()
    .collect()
});

/// ClusterEvent is a watch event tagged with the kind it belongs to.
#[derive(Debug, Clone)]
pub struct ClusterEvent {
    pub gvk: GroupVersionKind,
    pub event: WatchEvent,
}

type StoreKey = (GroupVersionKind, ObjectKey);

#[derive(Debug)]
pub struct InMemoryCluster {
    name: String,
    registry: Arc<SchemaRegistry>,
    objects: Mutex<BTreeMap<StoreKey, Object>>,
    version_counter: AtomicU64,
    writes: AtomicU64,
    faults: Mutex<VecDeque<ClusterError>>,
    events: broadcast::Sender<ClusterEvent>,
}

impl InMemoryCluster {
    pub fn new(name: impl Into<String>, registry: Arc<SchemaRegistry>) -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER_SIZE);
        InMemoryCluster {
            name: name.into(),
            registry,
            objects: Mutex::new(BTreeMap::new()),
            version_counter: AtomicU64::new(1),
            writes: AtomicU64::new(0),
            faults: Mutex::new(VecDeque::new()),
            events,
        }
    }

    /// Receives every change made after the call.
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    /// Makes the next call fail with `err`. Calls queue up in order.
    pub fn fail_next(&self, err: ClusterError) {
        self.faults.lock().push_back(err);
    }

    /// Number of applies and deletes that changed something.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    pub fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<Object, ClusterError> {
        self.take_fault()?;
        let removed = self.objects.lock().remove(&(gvk.clone(), key.clone()));
        match removed {
            Some(object) => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                debug!(cluster = %self.name, %gvk, %key, "deleted");
                self.send(gvk, WatchEvent::Deleted(object.clone()));
                Ok(object)
            }
            None => Err(ClusterError::NotFound {
                gvk: gvk.clone(),
                key: key.clone(),
            }),
        }
    }

    fn take_fault(&self) -> Result<(), ClusterError> {
        match self.faults.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn send(&self, gvk: &GroupVersionKind, event: WatchEvent) {
        // No receivers is not an error.
        let _ = self.events.send(ClusterEvent {
            gvk: gvk.clone(),
            event,
        });
    }

    fn write(&self, object: Object, options: &ApplyOptions, subresource: Option<&str>) -> Result<ApplyOutcome, ClusterError> {
        self.take_fault()?;

        let gvk = object
            .gvk()
            .ok_or_else(|| ClusterError::Invalid("apiVersion and kind must be set".to_string()))?;
        let key = object.key();
        if key.name.is_empty() {
            return Err(ClusterError::Invalid(format!("{gvk}: metadata.name must be set")));
        }
        if options.field_manager.is_empty() {
            return Err(ClusterError::Invalid("a field manager is required".to_string()));
        }

        let mut config = match subresource {
            Some(_) => object.status_only(),
            None => object.without_status(),
        };
        config.strip_server_fields();

        let kind = self.registry.lookup(&gvk);
        let invalid = |e: ValidationErrors| ClusterError::Invalid(format!("{gvk} {key}: {e}"));
        let applied = TypedValue::for_kind(config.into_value(), &kind).map_err(invalid)?;
        let owned = applied.to_field_set().difference(&IDENTITY_FIELDS);

        let mut objects = self.objects.lock();
        let store_key = (gvk.clone(), key.clone());
        let existing = objects.get(&store_key).cloned();
        if subresource.is_some() && existing.is_none() {
            return Err(ClusterError::NotFound { gvk, key });
        }

        let (live_value, mut managers) = match &existing {
            Some(current) => {
                let managers = current
                    .managed_fields()
                    .map_err(|e| ClusterError::Invalid(format!("{gvk} {key}: {e}")))?;
                let mut stripped = current.clone();
                stripped.strip_server_fields();
                (stripped.into_value(), managers)
            }
            None => (Object::new(&gvk, &key).into_value(), Vec::new()),
        };
        let live = TypedValue::for_kind(live_value, &kind).map_err(invalid)?;

        let is_self = |entry: &ManagedFieldsEntry| {
            entry.manager == options.field_manager && entry.subresource.as_deref() == subresource
        };

        let owned_leaves = owned.leaves();
        let mut conflicts = Vec::new();
        for entry in managers.iter_mut().filter(|e| !is_self(e)) {
            let mut lost = Set::new();
            entry.fields.intersection(&owned_leaves).iterate(|path| {
                let single = Set::from_paths([path]);
                if live.project(&single) != applied.project(&single) {
                    lost.insert(path);
                }
            });
            if lost.is_empty() {
                continue;
            }
            if options.force {
                entry.fields = entry.fields.difference(&lost);
            } else {
                let paths: Vec<String> = lost.paths().iter().map(Path::to_string).collect();
                conflicts.push(format!("{} owns {}", entry.manager, paths.join(", ")));
            }
        }
        if !conflicts.is_empty() {
            return Err(ClusterError::Conflict {
                key: key.clone(),
                message: conflicts.join("; "),
            });
        }

        let previous = managers
            .iter()
            .find(|e| is_self(e))
            .map(|e| e.fields.clone())
            .unwrap_or_default();
        let others = managers
            .iter()
            .filter(|e| !is_self(e))
            .fold(Set::new(), |acc, e| acc.union(&e.fields));
        let mut stale = Set::new();
        previous.leaves().difference(&owned).iterate(|path| {
            if !others.has_prefix(path) && !owned.has_prefix(path) {
                stale.insert(path);
            }
        });

        let merged = live.merge(&applied).map_err(invalid)?.remove_items(&stale);

        let mut entry = ManagedFieldsEntry::applied(&options.field_manager, gvk.api_version(), owned.clone());
        if let Some(sub) = subresource {
            entry = entry.with_subresource(sub);
        }
        match managers.iter().position(|e| is_self(e)) {
            Some(i) if owned.is_empty() => {
                managers.remove(i);
            }
            Some(i) => managers[i] = entry,
            None if !owned.is_empty() => managers.push(entry),
            None => {}
        }
        managers.retain(|e| !e.fields.is_empty());

        let mut stored =
            Object::from_value(merged.into_value()).map_err(|e| ClusterError::Invalid(e.to_string()))?;
        stored
            .set_managed_fields(&managers)
            .map_err(|e| ClusterError::Invalid(format!("{gvk} {key}: {e}")))?;

        if let Some(current) = &existing {
            if let Some(version) = current.resource_version() {
                stored.set_resource_version(version);
            }
            if stored == *current {
                trace!(cluster = %self.name, %gvk, %key, manager = %options.field_manager, "apply was a no-op");
                return Ok(ApplyOutcome {
                    object: stored,
                    changed: false,
                });
            }
        }

        let version = self.version_counter.fetch_add(1, Ordering::SeqCst);
        stored.set_resource_version(version.to_string());
        objects.insert(store_key, stored.clone());
        drop(objects);

        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(
            cluster = %self.name,
            %gvk,
            %key,
            manager = %options.field_manager,
            subresource = subresource.unwrap_or_default(),
            resource_version = version,
            "applied"
        );
        let event = match existing {
            Some(old) => WatchEvent::Updated {
                old,
                new: stored.clone(),
            },
            None => WatchEvent::Created(stored.clone()),
        };
        self.send(&gvk, event);

        Ok(ApplyOutcome {
            object: stored,
            changed: true,
        })
    }
}

#[async_trait]
impl Cluster for InMemoryCluster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<Object, ClusterError> {
        self.take_fault()?;
        self.objects
            .lock()
            .get(&(gvk.clone(), key.clone()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                gvk: gvk.clone(),
                key: key.clone(),
            })
    }

    async fn list(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Vec<Object>, ClusterError> {
        self.take_fault()?;
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|((kind, key), _)| kind == gvk && namespace.map_or(true, |ns| key.namespace == ns))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn apply(&self, object: Object, options: &ApplyOptions) -> Result<ApplyOutcome, ClusterError> {
        self.write(object, options, None)
    }

    async fn apply_status(&self, object: Object, options: &ApplyOptions) -> Result<ApplyOutcome, ClusterError> {
        self.write(object, options, Some(STATUS_SUBRESOURCE))
    }
}

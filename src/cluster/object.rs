//! Objects as stored by a cluster, and the identifiers used to address them.

use crate::fieldpath::{ManagedFieldsEntry, ManagedFieldsError};
use crate::value::{Map, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const API_VERSION: &str = "apiVersion";
pub const KIND: &str = "kind";
pub const METADATA: &str = "metadata";
pub const STATUS: &str = "status";
pub const NAME: &str = "name";
pub const NAMESPACE: &str = "namespace";
pub const ANNOTATIONS: &str = "annotations";
pub const MANAGED_FIELDS: &str = "managedFields";
pub const RESOURCE_VERSION: &str = "resourceVersion";

/// Metadata fields written by the server rather than by appliers.
pub const SERVER_METADATA: &[&str] = &[
    MANAGED_FIELDS,
    RESOURCE_VERSION,
    "uid",
    "generation",
    "creationTimestamp",
];

/// GroupVersionKind identifies one resource type. The core group is the
/// empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid kind {input:?}: expected group/version/Kind or version/Kind")]
pub struct ParseKindError {
    pub input: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        GroupVersionKind {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Splits an `apiVersion` ("apps/v1", or "v1" for the core group).
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => GroupVersionKind::new(group, version, kind),
            None => GroupVersionKind::new("", api_version, kind),
        }
    }

    /// The `apiVersion` string of this kind.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

impl FromStr for GroupVersionKind {
    type Err = ParseKindError;

    /// Parses `group/version/Kind`, or `version/Kind` for the core group.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseKindError { input: s.to_string() };
        let parts: Vec<&str> = s.split('/').collect();
        let gvk = match parts.as_slice() {
            [group, version, kind] => GroupVersionKind::new(*group, *version, *kind),
            [version, kind] => GroupVersionKind::new("", *version, *kind),
            _ => return Err(err()),
        };
        if gvk.version.is_empty() || gvk.kind.is_empty() {
            return Err(err());
        }
        Ok(gvk)
    }
}

/// ObjectKey is the namespaced name of an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ObjectKey {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Object is one stored resource: a map with `apiVersion`, `kind` and
/// `metadata` at the top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("object must be a map, got {0}")]
pub struct NotAnObject(pub &'static str);

impl Object {
    /// An object with only its type and name set.
    pub fn new(gvk: &GroupVersionKind, key: &ObjectKey) -> Self {
        let mut object = Object {
            value: Value::Map(Map::new()),
        };
        object.set_gvk(gvk);
        object.set_key(key);
        object
    }

    pub fn from_value(value: Value) -> Result<Self, NotAnObject> {
        match value {
            Value::Map(_) => Ok(Object { value }),
            other => Err(NotAnObject(other.type_name())),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    fn root_mut(&mut self) -> Option<&mut Map> {
        self.value.map_at_mut(&[])
    }

    fn metadata_mut(&mut self) -> Option<&mut Map> {
        self.value.map_at_mut(&[METADATA])
    }

    fn metadata_str(&self, field: &str) -> &str {
        self.value
            .lookup(&[METADATA, field])
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// The kind of this object, if `apiVersion` and `kind` are set.
    pub fn gvk(&self) -> Option<GroupVersionKind> {
        let api_version = self.value.lookup(&[API_VERSION])?.as_str()?;
        let kind = self.value.lookup(&[KIND])?.as_str()?;
        if api_version.is_empty() || kind.is_empty() {
            return None;
        }
        Some(GroupVersionKind::from_api_version(api_version, kind))
    }

    pub fn set_gvk(&mut self, gvk: &GroupVersionKind) {
        if let Some(root) = self.root_mut() {
            root.set(API_VERSION, Value::from(gvk.api_version()));
            root.set(KIND, Value::from(gvk.kind.clone()));
        }
    }

    pub fn name(&self) -> &str {
        self.metadata_str(NAME)
    }

    pub fn namespace(&self) -> &str {
        self.metadata_str(NAMESPACE)
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), self.name())
    }

    pub fn set_key(&mut self, key: &ObjectKey) {
        if let Some(meta) = self.metadata_mut() {
            meta.set(NAME, Value::from(key.name.clone()));
            if key.namespace.is_empty() {
                meta.delete(NAMESPACE);
            } else {
                meta.set(NAMESPACE, Value::from(key.namespace.clone()));
            }
        }
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.value
            .lookup(&[METADATA, RESOURCE_VERSION])
            .and_then(Value::as_str)
    }

    pub fn set_resource_version(&mut self, version: impl Into<String>) {
        if let Some(meta) = self.metadata_mut() {
            meta.set(RESOURCE_VERSION, Value::from(version.into()));
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.value
            .lookup(&[METADATA, ANNOTATIONS, key])
            .and_then(Value::as_str)
    }

    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if let Some(annotations) = self.value.map_at_mut(&[METADATA, ANNOTATIONS]) {
            annotations.set(key, Value::from(value.into()));
        }
    }

    /// Decodes `metadata.managedFields`.
    pub fn managed_fields(&self) -> Result<Vec<ManagedFieldsEntry>, ManagedFieldsError> {
        ManagedFieldsEntry::decode_list(self.value.lookup(&[METADATA, MANAGED_FIELDS]))
    }

    pub fn set_managed_fields(&mut self, entries: &[ManagedFieldsEntry]) -> Result<(), ManagedFieldsError> {
        let encoded = if entries.is_empty() {
            None
        } else {
            Some(ManagedFieldsEntry::encode_list(entries)?)
        };
        if let Some(meta) = self.metadata_mut() {
            match encoded {
                Some(list) => meta.set(MANAGED_FIELDS, list),
                None => {
                    meta.delete(MANAGED_FIELDS);
                }
            }
        }
        Ok(())
    }

    /// Removes the metadata fields the server maintains.
    pub fn strip_server_fields(&mut self) {
        if let Some(meta) = self.metadata_mut() {
            for field in SERVER_METADATA {
                meta.delete(field);
            }
        }
    }

    /// Keeps only the type, name and status of the object.
    pub fn status_only(&self) -> Object {
        let mut out = Object::new(&self.gvk().unwrap_or_default(), &self.key());
        if let (Some(status), Some(root)) = (self.value.lookup(&[STATUS]), out.root_mut()) {
            root.set(STATUS, status.clone());
        }
        out
    }

    /// Returns a copy without the `status` sub-tree.
    pub fn without_status(&self) -> Object {
        let mut out = self.clone();
        if let Some(root) = out.root_mut() {
            root.delete(STATUS);
        }
        out
    }
}

/// WatchEvent is one change notification from a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(Object),
    Updated { old: Object, new: Object },
    Deleted(Object),
}

impl WatchEvent {
    /// The current object, or the last known one for deletions.
    pub fn object(&self) -> &Object {
        match self {
            WatchEvent::Created(object) | WatchEvent::Deleted(object) => object,
            WatchEvent::Updated { new, .. } => new,
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.object().key()
    }

    /// True if any object carried by the event satisfies `pred`. Updates are
    /// checked on both the old and the new object.
    pub fn any_object(&self, pred: impl Fn(&Object) -> bool) -> bool {
        match self {
            WatchEvent::Created(object) | WatchEvent::Deleted(object) => pred(object),
            WatchEvent::Updated { old, new } => pred(old) || pred(new),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            WatchEvent::Created(_) => "created",
            WatchEvent::Updated { .. } => "updated",
            WatchEvent::Deleted(_) => "deleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::from_yaml;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_kind() {
        assert_eq!(
            "apps/v1/Deployment".parse::<GroupVersionKind>().unwrap(),
            GroupVersionKind::new("apps", "v1", "Deployment")
        );
        let core: GroupVersionKind = "v1/ConfigMap".parse().unwrap();
        assert_eq!(core.api_version(), "v1");
        assert_eq!(core.to_string(), "v1/ConfigMap");
        assert!("Deployment".parse::<GroupVersionKind>().is_err());
        assert!("apps/v1/".parse::<GroupVersionKind>().is_err());
        assert!("a/b/c/d".parse::<GroupVersionKind>().is_err());
    }

    #[test]
    fn test_object_accessors() {
        let mut object = Object::from_value(
            from_yaml(
                r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: default
  resourceVersion: "7"
  managedFields:
  - manager: kubectl
    operation: Apply
    fieldsType: FieldsV1
    fieldsV1: {"f:spec": {"f:replicas": {}}}
spec:
  replicas: 1
status:
  replicas: 1
"#,
            )
            .unwrap(),
        )
        .unwrap();

        assert_eq!(object.gvk(), Some(GroupVersionKind::new("apps", "v1", "Deployment")));
        assert_eq!(object.key(), ObjectKey::new("default", "web"));
        assert_eq!(object.resource_version(), Some("7"));
        assert_eq!(object.managed_fields().unwrap().len(), 1);
        assert_eq!(object.annotation("a"), None);

        object.set_annotation("a", "b");
        assert_eq!(object.annotation("a"), Some("b"));

        let status = object.status_only();
        assert_eq!(
            status.value(),
            &from_yaml("apiVersion: apps/v1\nkind: Deployment\nmetadata: {name: web, namespace: default}\nstatus: {replicas: 1}\n").unwrap()
        );
        assert_eq!(object.without_status().value().lookup(&["status"]), None);

        object.strip_server_fields();
        assert_eq!(object.resource_version(), None);
        assert!(object.managed_fields().unwrap().is_empty());
    }

    #[test]
    fn test_watch_event_checks_both_objects() {
        let gvk = GroupVersionKind::new("apps", "v1", "Deployment");
        let old = Object::new(&gvk, &ObjectKey::new("ns", "a"));
        let mut new = old.clone();
        new.set_annotation("marked", "yes");

        let event = WatchEvent::Updated { old, new };
        assert!(event.any_object(|o| o.annotation("marked").is_some()));
        assert_eq!(event.key(), ObjectKey::new("ns", "a"));
        assert_eq!(event.kind_name(), "updated");
        assert!(!WatchEvent::Deleted(Object::from_value(Value::Map(Map::new())).unwrap())
            .any_object(|o| o.annotation("marked").is_some()));
        assert!(Object::from_value(Value::from("x")).is_err());
    }
}

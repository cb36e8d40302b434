//! Per-writer ownership records carried in `metadata.managedFields`.

use super::set::Set;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The only field set encoding in use.
pub const FIELDS_V1: &str = "FieldsV1";

/// Operation is the kind of write that produced a managed fields entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Apply,
    Update,
}

/// ManagedFieldsEntry records the paths one writer owns in an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedFieldsEntry {
    pub manager: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,

    /// API version the paths are expressed against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Opaque timestamp of the last write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields_type: Option<String>,

    #[serde(default, rename = "fieldsV1")]
    pub fields: Set,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subresource: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagedFieldsError {
    #[error("managedFields is not a list")]
    NotAList,

    #[error("malformed managedFields entry #{index}: {message}")]
    Malformed { index: usize, message: String },

    #[error("manager {manager:?} uses unsupported fieldsType {fields_type:?}")]
    UnsupportedFieldsType { manager: String, fields_type: String },

    #[error("cannot encode the fields of manager {manager:?}: {message}")]
    Encode { manager: String, message: String },
}

impl ManagedFieldsEntry {
    /// An Apply entry with fieldsV1 encoding.
    pub fn applied(manager: impl Into<String>, api_version: impl Into<String>, fields: Set) -> Self {
        ManagedFieldsEntry {
            manager: manager.into(),
            operation: Some(Operation::Apply),
            api_version: Some(api_version.into()),
            time: None,
            fields_type: Some(FIELDS_V1.to_string()),
            fields,
            subresource: None,
        }
    }

    pub fn with_subresource(mut self, subresource: impl Into<String>) -> Self {
        self.subresource = Some(subresource.into());
        self
    }

    /// Decodes the value of `metadata.managedFields`. A missing list decodes
    /// as no entries.
    pub fn decode_list(value: Option<&Value>) -> Result<Vec<ManagedFieldsEntry>, ManagedFieldsError> {
        let items = match value {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::List(items)) => items,
            Some(_) => return Err(ManagedFieldsError::NotAList),
        };

        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let entry: ManagedFieldsEntry = serde_json::from_value(serde_json::Value::from(item))
                    .map_err(|e| ManagedFieldsError::Malformed {
                        index,
                        message: e.to_string(),
                    })?;
                match entry.fields_type.as_deref() {
                    None | Some(FIELDS_V1) => Ok(entry),
                    Some(other) => Err(ManagedFieldsError::UnsupportedFieldsType {
                        manager: entry.manager.clone(),
                        fields_type: other.to_string(),
                    }),
                }
            })
            .collect()
    }

    /// Encodes entries back into a `metadata.managedFields` value. Fails
    /// on the first entry whose field set has no wire form.
    pub fn encode_list(entries: &[ManagedFieldsEntry]) -> Result<Value, ManagedFieldsError> {
        entries
            .iter()
            .map(|e| {
                serde_json::to_value(e)
                    .map(|json| Value::from(&json))
                    .map_err(|err| ManagedFieldsError::Encode {
                        manager: e.manager.clone(),
                        message: err.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fieldpath::Path;
    use crate::value::from_yaml;

    const MANAGED: &str = r#"
managedFields:
- manager: kubectl
  operation: Apply
  apiVersion: apps/v1
  time: "2024-01-01T00:00:00Z"
  fieldsType: FieldsV1
  fieldsV1:
    f:spec:
      f:replicas: {}
- manager: kube-controller-manager
  operation: Update
  apiVersion: apps/v1
  fieldsType: FieldsV1
  subresource: status
  fieldsV1:
    f:status:
      f:readyReplicas: {}
"#;

    #[test]
    fn test_decode_list() {
        let doc = from_yaml(MANAGED).unwrap();
        let entries = ManagedFieldsEntry::decode_list(doc.lookup(&["managedFields"])).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].manager, "kubectl");
        assert_eq!(entries[0].operation, Some(Operation::Apply));
        assert!(entries[0].fields.has(&Path::from_fields(&["spec", "replicas"])));
        assert_eq!(entries[1].subresource.as_deref(), Some("status"));
        assert!(entries[1].fields.has(&Path::from_fields(&["status", "readyReplicas"])));
    }

    #[test]
    fn test_encode_then_decode() {
        let doc = from_yaml(MANAGED).unwrap();
        let entries = ManagedFieldsEntry::decode_list(doc.lookup(&["managedFields"])).unwrap();
        let encoded = ManagedFieldsEntry::encode_list(&entries).unwrap();
        assert!(matches!(&encoded, Value::List(items) if items.len() == entries.len()));
        assert_eq!(ManagedFieldsEntry::decode_list(Some(&encoded)).unwrap(), entries);
    }

    #[test]
    fn test_missing_and_bad_lists() {
        assert!(ManagedFieldsEntry::decode_list(None).unwrap().is_empty());
        assert_eq!(
            ManagedFieldsEntry::decode_list(Some(&Value::from("nope"))),
            Err(ManagedFieldsError::NotAList)
        );

        let bad_type = from_yaml("- manager: x\n  fieldsType: FieldsV2\n  fieldsV1: {}\n").unwrap();
        assert!(matches!(
            ManagedFieldsEntry::decode_list(Some(&bad_type)),
            Err(ManagedFieldsError::UnsupportedFieldsType { .. })
        ));

        let bad_set = from_yaml("- manager: x\n  fieldsV1:\n    f:a: 3\n").unwrap();
        assert!(matches!(
            ManagedFieldsEntry::decode_list(Some(&bad_set)),
            Err(ManagedFieldsError::Malformed { index: 0, .. })
        ));
    }
}

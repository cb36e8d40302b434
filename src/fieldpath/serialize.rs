//! The `fieldsV1` wire form of a field set.
//!
//! Every path element becomes a prefixed JSON object key:
//! - `f:<name>` for a field name
//! - `k:<json object>` for an associative list key
//! - `v:<json value>` for a set entry
//! - `i:<index>` for a positional entry
//!
//! A `"."` key inside an element's object marks that element itself as a
//! member even though paths continue beneath it.

use super::path::PathElement;
use super::set::Set;
use crate::value::{Field, FieldList, Value};
use std::collections::BTreeSet;
use thiserror::Error;

/// SerializeError reports a malformed `fieldsV1` document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializeError {
    #[error("path element key must be at least 2 characters long: {0:?}")]
    TooShort(String),

    #[error("unknown path element type: {0}")]
    UnknownPrefix(String),

    #[error("invalid index {0:?}")]
    InvalidIndex(String),

    #[error("expected a JSON object for {0}")]
    ExpectedObject(String),

    #[error("invalid JSON: {0}")]
    Json(String),
}

impl From<serde_json::Error> for SerializeError {
    fn from(e: serde_json::Error) -> Self {
        SerializeError::Json(e.to_string())
    }
}

pub fn serialize_path_element(pe: &PathElement) -> Result<String, SerializeError> {
    Ok(match pe {
        PathElement::FieldName(name) => format!("f:{}", name),
        PathElement::Value(v) => format!("v:{}", serde_json::to_string(&serde_json::Value::from(v))?),
        PathElement::Key(fields) => {
            let obj: serde_json::Map<String, serde_json::Value> = fields
                .iter()
                .map(|f| (f.name.clone(), serde_json::Value::from(&f.value)))
                .collect();
            format!("k:{}", serde_json::to_string(&serde_json::Value::Object(obj))?)
        }
        PathElement::Index(i) => format!("i:{}", i),
    })
}

pub fn deserialize_path_element(s: &str) -> Result<PathElement, SerializeError> {
    let (prefix, content) = match (s.get(..2), s.get(2..)) {
        (Some(prefix), Some(content)) => (prefix, content),
        _ => return Err(SerializeError::TooShort(s.to_string())),
    };

    match prefix {
        "f:" => Ok(PathElement::FieldName(content.to_string())),
        "v:" => {
            let json: serde_json::Value = serde_json::from_str(content)?;
            Ok(PathElement::Value(Value::from(&json)))
        }
        "k:" => match serde_json::from_str::<serde_json::Value>(content)? {
            serde_json::Value::Object(obj) => {
                let fields = obj
                    .iter()
                    .map(|(name, v)| Field {
                        name: name.clone(),
                        value: Value::from(v),
                    })
                    .collect();
                Ok(PathElement::Key(FieldList::with_fields(fields)))
            }
            _ => Err(SerializeError::ExpectedObject(s.to_string())),
        },
        "i:" => content
            .parse::<usize>()
            .map(PathElement::Index)
            .map_err(|_| SerializeError::InvalidIndex(content.to_string())),
        _ => Err(SerializeError::UnknownPrefix(prefix.to_string())),
    }
}

impl Set {
    /// Encodes the set as `fieldsV1` JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, SerializeError> {
        Ok(serde_json::to_vec(&self.to_json_value()?)?)
    }

    /// Encodes the set as a `fieldsV1` JSON value.
    pub fn to_json_value(&self) -> Result<serde_json::Value, SerializeError> {
        Ok(serde_json::Value::Object(self.to_json_object()?))
    }

    fn to_json_object(&self) -> Result<serde_json::Map<String, serde_json::Value>, SerializeError> {
        let mut result = serde_json::Map::new();

        let elements: BTreeSet<&PathElement> =
            self.members.iter().chain(self.children.keys()).collect();

        for pe in elements {
            let key = serialize_path_element(pe)?;
            let mut obj = match self.children.get(pe) {
                Some(child) => child.to_json_object()?,
                None => serde_json::Map::new(),
            };
            if self.children.contains_key(pe) && self.members.contains(pe) {
                obj.insert(".".to_string(), serde_json::Value::Object(serde_json::Map::new()));
            }
            result.insert(key, serde_json::Value::Object(obj));
        }

        Ok(result)
    }

    /// Decodes `fieldsV1` JSON bytes.
    pub fn from_json(data: &[u8]) -> Result<Set, SerializeError> {
        let json: serde_json::Value = serde_json::from_slice(data)?;
        Self::from_json_value(&json)
    }

    /// Decodes a `fieldsV1` JSON value.
    pub fn from_json_value(json: &serde_json::Value) -> Result<Set, SerializeError> {
        match json {
            serde_json::Value::Object(obj) => Self::from_json_object(obj),
            _ => Err(SerializeError::ExpectedObject("fieldsV1".to_string())),
        }
    }

    fn from_json_object(obj: &serde_json::Map<String, serde_json::Value>) -> Result<Set, SerializeError> {
        let mut set = Set::new();

        for (key, value) in obj {
            if key == "." {
                continue;
            }

            let pe = match deserialize_path_element(key) {
                Ok(pe) => pe,
                // unknown element kinds from newer writers are dropped
                Err(SerializeError::UnknownPrefix(_)) => continue,
                Err(e) => return Err(e),
            };

            let child_obj = match value {
                serde_json::Value::Object(child_obj) => child_obj,
                _ => return Err(SerializeError::ExpectedObject(key.clone())),
            };

            if child_obj.is_empty() || child_obj.contains_key(".") {
                set.members.insert(pe.clone());
            }

            let child = Self::from_json_object(child_obj)?;
            if !child.is_empty() {
                set.children.insert(pe, child);
            }
        }

        Ok(set)
    }
}

impl serde::Serialize for Set {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let json = self.to_json_value().map_err(serde::ser::Error::custom)?;
        serde::Serialize::serialize(&json, serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Set {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = <serde_json::Value as serde::Deserialize>::deserialize(deserializer)?;
        Set::from_json_value(&json).map_err(serde::de::Error::custom)
    }
}

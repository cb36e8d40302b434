//! Per-kind schema lookup.

use super::elements::{Atom, ListSemantics, Schema, TypeRef};
use crate::cluster::GroupVersionKind;
use crate::fieldpath::{Path, PathElement};
use std::collections::HashMap;
use thiserror::Error;

/// Schema shipped with the binary.
pub const BUILTIN_SCHEMA_YAML: &str = include_str!("builtin.yaml");

/// Fallback type for kinds without a known schema: maps are separable,
/// every list is atomic.
pub const DEDUCED_TYPE: &str = "__untyped_deduced_";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to parse schema: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("type {0:?} is defined more than once")]
    DuplicateType(String),

    #[error("{gvk} is mapped to unknown type {type_name:?}")]
    UnknownType {
        gvk: GroupVersionKind,
        type_name: String,
    },
}

/// SchemaRegistry maps resource kinds to structural schemas.
///
/// Built once at startup, then shared read-only (typically behind an `Arc`)
/// by every reconciler.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schema: Schema,
    kinds: HashMap<GroupVersionKind, String>,
}

/// The schema in force for one kind.
#[derive(Debug, Clone)]
pub struct KindSchema<'a> {
    schema: &'a Schema,
    root: TypeRef,
    structural: bool,
}

impl SchemaRegistry {
    /// A registry containing only the embedded schema.
    pub fn builtin() -> Result<Self, SchemaError> {
        let schema: Schema = serde_yaml::from_str(BUILTIN_SCHEMA_YAML)?;
        let mut kinds = HashMap::new();
        kinds.insert(
            GroupVersionKind::new("apps", "v1", "Deployment"),
            "io.k8s.api.apps.v1.Deployment".to_string(),
        );
        Ok(SchemaRegistry { schema, kinds })
    }

    /// Adds the types of another schema document and maps kinds onto them.
    pub fn extend(
        &mut self,
        schema_yaml: &str,
        kinds: impl IntoIterator<Item = (GroupVersionKind, String)>,
    ) -> Result<(), SchemaError> {
        let extra: Schema = serde_yaml::from_str(schema_yaml)?;
        self.schema
            .merge_types(extra)
            .map_err(SchemaError::DuplicateType)?;
        for (gvk, type_name) in kinds {
            self.register_kind(gvk, type_name)?;
        }
        Ok(())
    }

    /// Maps a kind onto an already-known type name.
    pub fn register_kind(
        &mut self,
        gvk: GroupVersionKind,
        type_name: impl Into<String>,
    ) -> Result<(), SchemaError> {
        let type_name = type_name.into();
        if self.schema.find_named_type(&type_name).is_none() {
            return Err(SchemaError::UnknownType { gvk, type_name });
        }
        self.kinds.insert(gvk, type_name);
        Ok(())
    }

    /// Returns the schema for `gvk`, or the deduced fallback for unknown
    /// kinds. Never fails.
    pub fn lookup(&self, gvk: &GroupVersionKind) -> KindSchema<'_> {
        match self.kinds.get(gvk) {
            Some(type_name) => KindSchema {
                schema: &self.schema,
                root: TypeRef::named(type_name.clone()),
                structural: true,
            },
            None => KindSchema {
                schema: &self.schema,
                root: TypeRef::named(DEDUCED_TYPE),
                structural: false,
            },
        }
    }

    pub fn is_known(&self, gvk: &GroupVersionKind) -> bool {
        self.kinds.contains_key(gvk)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl<'a> KindSchema<'a> {
    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    pub fn root(&self) -> &TypeRef {
        &self.root
    }

    /// False when the kind fell back to the deduced schema.
    pub fn is_structural(&self) -> bool {
        self.structural
    }

    /// Describes the list at `path`, or None if `path` does not lead to a
    /// list position in this schema.
    pub fn list_semantics(&self, path: &Path) -> Option<ListSemantics> {
        let mut atom: Atom = self.schema.resolve(&self.root)?.into_owned();
        for pe in path {
            let next = match pe {
                PathElement::FieldName(name) => atom.map.as_ref()?.field_type(name).clone(),
                _ => atom.list.as_ref()?.element_type.clone(),
            };
            atom = self.schema.resolve(&next)?.into_owned();
        }
        atom.list.as_ref().map(|list| list.semantics())
    }
}

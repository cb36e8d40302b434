//! Core schema elements and type definitions.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;

/// Schema is a list of named types.
///
/// Named types are indexed on first lookup; the index is built once and the
/// schema is never mutated afterwards, so a `&Schema` can be shared freely
/// across threads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<TypeDef>,

    #[serde(skip)]
    type_map: OnceCell<HashMap<String, usize>>,
}

/// TypeDef represents a named type in a schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeDef {
    /// Every top-level type has a unique name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(flatten)]
    pub atom: Atom,
}

/// TypeRef either refers to a named type or declares an inlined type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRef {
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "namedType")]
    pub named_type: Option<String>,

    #[serde(flatten)]
    pub inlined: Box<Atom>,

    /// Overrides the element relationship of the referred map or list type.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "elementRelationship"
    )]
    pub element_relationship: Option<ElementRelationship>,
}

/// Atom is the set of shapes a value at one position may take. A value is
/// interpreted with whichever of `scalar`, `list` or `map` matches its shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Atom {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar: Option<Scalar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<List>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<Map>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scalar {
    Numeric,
    String,
    Boolean,
    Untyped,
}

/// ElementRelationship describes how the items of a container relate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementRelationship {
    /// List items are identified by key fields (or, without keys, by value).
    Associative,
    /// The container is replaced as a whole and owned as a single leaf.
    Atomic,
    /// Items are independent; the default for maps.
    #[default]
    Separable,
}

/// Map describes a struct (named fields) and/or a string-keyed map
/// (`element_type` for every other key).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Map {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<StructField>,

    #[serde(default, rename = "elementType")]
    pub element_type: TypeRef,

    #[serde(
        default,
        skip_serializing_if = "is_separable",
        rename = "elementRelationship"
    )]
    pub element_relationship: ElementRelationship,

    #[serde(skip)]
    field_map: OnceCell<HashMap<String, usize>>,
}

impl PartialEq for Map {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
            && self.element_type == other.element_type
            && self.element_relationship == other.element_relationship
    }
}

impl Eq for Map {}

fn is_separable(er: &ElementRelationship) -> bool {
    *er == ElementRelationship::Separable
}

fn atomic() -> ElementRelationship {
    ElementRelationship::Atomic
}

/// StructField pairs a field name with a field type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, rename = "type")]
    pub field_type: TypeRef,

    /// Server-side default. Used to fill in missing associative key fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// List describes a sequence of values of one element type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct List {
    #[serde(default, rename = "elementType")]
    pub element_type: TypeRef,

    #[serde(default = "atomic", rename = "elementRelationship")]
    pub element_relationship: ElementRelationship,

    /// Key fields of the element map type, for associative lists.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

impl Default for List {
    fn default() -> Self {
        List {
            element_type: TypeRef::default(),
            element_relationship: ElementRelationship::Atomic,
            keys: Vec::new(),
        }
    }
}

/// How the entries of one list position are addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListSemantics {
    /// Entries are maps identified by the named sub-fields.
    Associative { keys: Vec<String> },
    /// Entries are scalars identified by their own value.
    Set,
    /// Entries are identified by index.
    Positional,
    /// The list is one indivisible leaf.
    Atomic,
}

impl List {
    pub fn semantics(&self) -> ListSemantics {
        match self.element_relationship {
            ElementRelationship::Atomic => ListSemantics::Atomic,
            ElementRelationship::Associative if self.keys.is_empty() => ListSemantics::Set,
            ElementRelationship::Associative => ListSemantics::Associative {
                keys: self.keys.clone(),
            },
            ElementRelationship::Separable => ListSemantics::Positional,
        }
    }
}

impl Schema {
    pub fn with_types(types: Vec<TypeDef>) -> Self {
        Schema {
            types,
            type_map: OnceCell::new(),
        }
    }

    pub fn find_named_type(&self, name: &str) -> Option<&TypeDef> {
        let map = self.type_map.get_or_init(|| {
            self.types
                .iter()
                .enumerate()
                .map(|(i, t)| (t.name.clone(), i))
                .collect()
        });
        map.get(name).map(|&i| &self.types[i])
    }

    /// Returns the atom referenced, whether it is named or inlined, with any
    /// element relationship override applied. Returns None for a dangling
    /// name.
    pub fn resolve<'a>(&'a self, tr: &'a TypeRef) -> Option<Cow<'a, Atom>> {
        let atom: &'a Atom = match tr.named_type {
            Some(ref named) => &self.find_named_type(named)?.atom,
            None => &tr.inlined,
        };

        let relationship = match tr.element_relationship {
            None => return Some(Cow::Borrowed(atom)),
            Some(er) => er,
        };

        let mut overridden = atom.clone();
        if let Some(map) = overridden.map.as_mut() {
            map.element_relationship = relationship;
        }
        if let Some(list) = overridden.list.as_mut() {
            list.element_relationship = relationship;
        }
        Some(Cow::Owned(overridden))
    }

    /// Appends the types of `other`, rejecting names defined twice.
    pub fn merge_types(&mut self, other: Schema) -> Result<(), String> {
        for t in &other.types {
            if self.find_named_type(&t.name).is_some() {
                return Err(t.name.clone());
            }
        }
        self.types.extend(other.types);
        self.type_map = OnceCell::new();
        Ok(())
    }
}

impl Map {
    pub fn with_element_type(element_type: TypeRef) -> Self {
        Map {
            element_type,
            ..Default::default()
        }
    }

    pub fn find_field(&self, name: &str) -> Option<&StructField> {
        let map = self.field_map.get_or_init(|| {
            self.fields
                .iter()
                .enumerate()
                .map(|(i, f)| (f.name.clone(), i))
                .collect()
        });
        map.get(name).map(|&i| &self.fields[i])
    }

    /// The declared type of `name`, or the element type for undeclared keys.
    pub fn field_type(&self, name: &str) -> &TypeRef {
        match self.find_field(name) {
            Some(field) => &field.field_type,
            None => &self.element_type,
        }
    }
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef {
            named_type: Some(name.into()),
            ..Default::default()
        }
    }
}

//! Path segments and paths.

use crate::value::{Field, FieldList, Value};
use std::cmp::Ordering;
use std::fmt;

/// PathElement is one step into a structured value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathElement {
    /// `.name`: a map or struct field.
    FieldName(String),
    /// `[k=v,...]`: an associative list entry, identified by its key fields.
    Key(FieldList),
    /// `[=v]`: an entry of a list of scalars with set semantics.
    Value(Value),
    /// `[i]`: a positional list entry.
    Index(usize),
}

impl PathElement {
    pub fn field_name(name: impl Into<String>) -> Self {
        PathElement::FieldName(name.into())
    }

    pub fn key(fields: FieldList) -> Self {
        PathElement::Key(fields)
    }

    /// Shorthand for the common single-field key, e.g. `[name="web"]`.
    pub fn key_by(name: impl Into<String>, value: impl Into<Value>) -> Self {
        PathElement::Key(FieldList::with_fields(vec![Field {
            name: name.into(),
            value: value.into(),
        }]))
    }

    pub fn value(v: Value) -> Self {
        PathElement::Value(v)
    }

    pub fn index(i: usize) -> Self {
        PathElement::Index(i)
    }

    pub fn as_field_name(&self) -> Option<&str> {
        match self {
            PathElement::FieldName(name) => Some(name),
            _ => None,
        }
    }
}

impl PartialOrd for PathElement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PathElement {
    fn cmp(&self, other: &Self) -> Ordering {
        fn type_order(pe: &PathElement) -> u8 {
            match pe {
                PathElement::FieldName(_) => 0,
                PathElement::Key(_) => 1,
                PathElement::Value(_) => 2,
                PathElement::Index(_) => 3,
            }
        }

        match (self, other) {
            (PathElement::FieldName(a), PathElement::FieldName(b)) => a.cmp(b),
            (PathElement::Key(a), PathElement::Key(b)) => a.cmp(b),
            (PathElement::Value(a), PathElement::Value(b)) => a.cmp(b),
            (PathElement::Index(a), PathElement::Index(b)) => a.cmp(b),
            _ => type_order(self).cmp(&type_order(other)),
        }
    }
}

/// Path addresses one location within a structured value.
///
/// Paths compare segment by segment. Associative entries are addressed by
/// their key fields, so reordering a list does not change any path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    elements: Vec<PathElement>,
}

impl Path {
    pub fn new() -> Self {
        Path {
            elements: Vec::new(),
        }
    }

    pub fn from_elements(elements: Vec<PathElement>) -> Self {
        Path { elements }
    }

    /// Builds a path of field names only, e.g. `["spec", "replicas"]`.
    pub fn from_fields(names: &[&str]) -> Self {
        names.iter().map(|n| PathElement::field_name(*n)).collect()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.elements.iter()
    }

    pub fn push(&mut self, element: PathElement) {
        self.elements.push(element);
    }

    pub fn pop(&mut self) -> Option<PathElement> {
        self.elements.pop()
    }

    pub fn first(&self) -> Option<&PathElement> {
        self.elements.first()
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.elements.last()
    }

    /// Returns a copy of this path with `element` appended.
    pub fn with(&self, element: PathElement) -> Self {
        let mut new_path = self.clone();
        new_path.push(element);
        new_path
    }

    pub fn as_slice(&self) -> &[PathElement] {
        &self.elements
    }

    /// True if every segment of `self` equals the corresponding segment of
    /// `other`. A path is a prefix of itself.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.elements.len() <= other.elements.len()
            && self
                .elements
                .iter()
                .zip(other.elements.iter())
                .all(|(a, b)| a == b)
    }

    /// Prefix test that excludes equality.
    pub fn is_strict_prefix_of(&self, other: &Path) -> bool {
        self.elements.len() < other.elements.len() && self.is_prefix_of(other)
    }
}

impl FromIterator<PathElement> for Path {
    fn from_iter<T: IntoIterator<Item = PathElement>>(iter: T) -> Self {
        Path {
            elements: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Path {
    type Item = PathElement;
    type IntoIter = std::vec::IntoIter<PathElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a PathElement;
    type IntoIter = std::slice::Iter<'a, PathElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

fn write_scalar(f: &mut fmt::Formatter<'_>, v: &Value) -> fmt::Result {
    match serde_json::to_string(&serde_json::Value::from(v)) {
        Ok(s) => write!(f, "{}", s),
        Err(_) => write!(f, "{:?}", v),
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::FieldName(name) => write!(f, ".{}", name),
            PathElement::Key(fields) => {
                write!(f, "[")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}=", field.name)?;
                    write_scalar(f, &field.value)?;
                }
                write!(f, "]")
            }
            PathElement::Value(v) => {
                write!(f, "[=")?;
                write_scalar(f, v)?;
                write!(f, "]")
            }
            PathElement::Index(i) => write!(f, "[{}]", i),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.elements {
            write!(f, "{}", element)?;
        }
        Ok(())
    }
}

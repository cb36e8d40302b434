//! Projection of a typed value onto a field set.

use super::typed_value::TypedValue;
use crate::fieldpath::{Path, PathElement, Set};
use crate::schema::{ElementRelationship, List, Map as MapType, TypeRef};
use crate::value::{Map, Value};

impl<'s> TypedValue<'s> {
    /// Returns the smallest sub-document of this value holding every path of
    /// `set` that the value contains, plus the containers needed to reach
    /// them.
    ///
    /// A path names its whole subtree. Entries of keyed and set lists keep
    /// their source order, and keyed entries always carry their key fields.
    /// Atomic containers reached by any path are copied whole, and so are
    /// positional lists: dropping an entry would shift the index of every
    /// entry after it. An empty set projects to `{}`.
    pub fn project(&self, set: &Set) -> Value {
        if set.contains_root() {
            return self.value().clone();
        }
        self.project_value(self.value(), self.type_ref(), set, &Path::new())
            .unwrap_or_else(|| Value::Map(Map::new()))
    }

    fn project_value(&self, value: &Value, type_ref: &TypeRef, set: &Set, path: &Path) -> Option<Value> {
        let atom = self.schema().resolve(type_ref)?;
        match (value, atom.map.as_ref(), atom.list.as_ref()) {
            (Value::Map(_), Some(map), _) if map.element_relationship == ElementRelationship::Atomic => {
                Some(value.clone())
            }
            (Value::Map(fields), Some(map), _) => self.project_map(fields, map, set, path),
            (Value::List(_), _, Some(list)) if list.element_relationship != ElementRelationship::Associative => {
                Some(value.clone())
            }
            (Value::List(items), _, Some(list)) => self.project_list(items, list, set, path),
            // A path beneath a scalar addresses nothing.
            _ => None,
        }
    }

    fn project_map(&self, fields: &Map, map: &MapType, set: &Set, path: &Path) -> Option<Value> {
        let mut out = Map::new();
        for (name, field) in fields.iter() {
            let pe = PathElement::field_name(name.clone());
            if set.members.contains(&pe) {
                out.set(name.clone(), field.clone());
            } else if let Some(sub) = set.child(&pe) {
                if let Some(projected) = self.project_value(field, map.field_type(name), sub, &path.with(pe)) {
                    out.set(name.clone(), projected);
                }
            }
        }
        if out.is_empty() {
            return None;
        }
        Some(Value::Map(out))
    }

    fn project_list(&self, items: &[Value], list: &List, set: &Set, path: &Path) -> Option<Value> {
        let mut out = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let pe = match self.list_item_element(item, list, i, path) {
                Ok(pe) => pe,
                Err(_) => continue,
            };
            if set.members.contains(&pe) {
                out.push(item.clone());
                continue;
            }
            let sub = match set.child(&pe) {
                Some(sub) => sub,
                None => continue,
            };
            let projected = match self.project_value(item, &list.element_type, sub, &path.with(pe)) {
                Some(projected) => projected,
                None => continue,
            };
            out.push(with_key_fields(projected, item, &list.keys));
        }
        if out.is_empty() {
            return None;
        }
        Some(Value::List(out))
    }
}

/// Copies the key fields of `source` into a projected entry so the entry
/// stays addressable.
fn with_key_fields(mut projected: Value, source: &Value, keys: &[String]) -> Value {
    if let (Some(out), Some(source)) = (projected.as_map_mut(), source.as_map()) {
        for key in keys {
            if let Some(value) = source.get(key) {
                out.set(key.clone(), value.clone());
            }
        }
    }
    projected
}

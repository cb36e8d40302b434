//! TypedValue implementation.

use super::validation::{ValidationError, ValidationErrors};
use crate::fieldpath::{Path, PathElement, Set};
use crate::schema::{Atom, ElementRelationship, KindSchema, List, Scalar, Schema, TypeRef};
use crate::value::{Field, FieldList, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// TypedValue is a Value paired with the schema type it was validated
/// against. Every TypedValue has passed validation, so list keys can be
/// computed for every entry.
#[derive(Debug, Clone)]
pub struct TypedValue<'s> {
    value: Value,
    schema: &'s Schema,
    type_ref: TypeRef,
}

impl<'s> TypedValue<'s> {
    /// Validates `value` against `type_ref` and wraps it.
    pub fn new(value: Value, schema: &'s Schema, type_ref: TypeRef) -> Result<Self, ValidationErrors> {
        let tv = TypedValue {
            value,
            schema,
            type_ref,
        };
        tv.validate()?;
        Ok(tv)
    }

    /// Validates `value` against the root type of a kind.
    pub fn for_kind(value: Value, kind: &KindSchema<'s>) -> Result<Self, ValidationErrors> {
        TypedValue::new(value, kind.schema(), kind.root().clone())
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn type_ref(&self) -> &TypeRef {
        &self.type_ref
    }

    pub fn schema(&self) -> &'s Schema {
        self.schema
    }

    /// Wraps a value derived from an already validated one.
    pub(crate) fn derived(&self, value: Value) -> TypedValue<'s> {
        TypedValue {
            value,
            schema: self.schema,
            type_ref: self.type_ref.clone(),
        }
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        self.validate_value(&self.value, &self.type_ref, &Path::new(), &mut errors);
        errors.into_result()
    }

    fn validate_value(&self, value: &Value, type_ref: &TypeRef, path: &Path, errors: &mut ValidationErrors) {
        let atom = match self.schema.resolve(type_ref) {
            Some(atom) => atom,
            None => {
                errors.add(ValidationError::schema_error(format!(
                    "{}: no type found matching {:?}",
                    path,
                    type_ref.named_type.as_deref().unwrap_or_default()
                )));
                return;
            }
        };

        match value {
            Value::Null => {}
            Value::Map(fields) => match atom.map.as_ref() {
                Some(map) => {
                    for (name, field) in fields.iter() {
                        let field_path = path.with(PathElement::field_name(name.clone()));
                        self.validate_value(field, map.field_type(name), &field_path, errors);
                    }
                }
                None => errors.add(ValidationError::type_mismatch(path.to_string(), describe(&atom), "map")),
            },
            Value::List(items) => match atom.list.as_ref() {
                Some(list) => self.validate_list(items, list, path, errors),
                None => errors.add(ValidationError::type_mismatch(path.to_string(), describe(&atom), "list")),
            },
            scalar => {
                let valid = match atom.scalar {
                    Some(Scalar::Numeric) => matches!(scalar, Value::Int(_) | Value::Float(_)),
                    Some(Scalar::String) => matches!(scalar, Value::String(_)),
                    Some(Scalar::Boolean) => matches!(scalar, Value::Bool(_)),
                    Some(Scalar::Untyped) => true,
                    None => false,
                };
                if !valid {
                    errors.add(ValidationError::type_mismatch(
                        path.to_string(),
                        describe(&atom),
                        scalar.type_name(),
                    ));
                }
            }
        }
    }

    fn validate_list(&self, items: &[Value], list: &List, path: &Path, errors: &mut ValidationErrors) {
        let keyed = list.element_relationship == ElementRelationship::Associative;
        let mut seen = BTreeSet::new();

        for (i, item) in items.iter().enumerate() {
            let pe = if keyed {
                match self.list_item_element(item, list, i, path) {
                    Ok(pe) => pe,
                    Err(e) => {
                        errors.add(e);
                        continue;
                    }
                }
            } else {
                PathElement::index(i)
            };

            if keyed && !seen.insert(pe.clone()) {
                errors.add(ValidationError::duplicate_key(path.to_string(), pe.to_string()));
            }
            self.validate_value(item, &list.element_type, &path.with(pe), errors);
        }
    }

    /// Computes the path element addressing `item`, the entry at `index` of a
    /// list typed by `list`. Associative entries missing a key field fall
    /// back to the field's schema default.
    pub(crate) fn list_item_element(
        &self,
        item: &Value,
        list: &List,
        index: usize,
        path: &Path,
    ) -> Result<PathElement, ValidationError> {
        if list.element_relationship != ElementRelationship::Associative {
            return Ok(PathElement::index(index));
        }
        if list.keys.is_empty() {
            return Ok(PathElement::value(item.clone()));
        }

        let entry = item.as_map().ok_or_else(|| {
            ValidationError::type_mismatch(path.with(PathElement::index(index)).to_string(), "map", item.type_name())
        })?;

        let element_atom = self.schema.resolve(&list.element_type);
        let mut fields = Vec::with_capacity(list.keys.len());
        for key in &list.keys {
            let value = match entry.get(key) {
                Some(value) => value.clone(),
                None => element_atom
                    .as_ref()
                    .and_then(|atom| key_default(atom, key))
                    .ok_or_else(|| {
                        ValidationError::missing_key(path.with(PathElement::index(index)).to_string(), key.clone())
                    })?,
            };
            fields.push(Field {
                name: key.clone(),
                value,
            });
        }
        Ok(PathElement::key(FieldList::with_fields(fields)))
    }

    /// Returns the set of paths this value sets.
    ///
    /// Scalars, atomic containers and empty containers are recorded as
    /// leaves. Entries of keyed, set and positional lists are recorded as
    /// members as well, so an entry stays owned even when it has no other
    /// fields.
    pub fn to_field_set(&self) -> Set {
        let mut set = Set::new();
        self.collect_field_set(&self.value, &self.type_ref, &Path::new(), &mut set);
        set
    }

    fn collect_field_set(&self, value: &Value, type_ref: &TypeRef, path: &Path, set: &mut Set) {
        let atom = match self.schema.resolve(type_ref) {
            Some(atom) => atom,
            None => {
                insert_non_root(set, path);
                return;
            }
        };

        match (value, atom.map.as_ref(), atom.list.as_ref()) {
            (Value::Map(fields), Some(map), _) => {
                if map.element_relationship == ElementRelationship::Atomic || fields.is_empty() {
                    insert_non_root(set, path);
                    return;
                }
                for (name, field) in fields.iter() {
                    let field_path = path.with(PathElement::field_name(name.clone()));
                    self.collect_field_set(field, map.field_type(name), &field_path, set);
                }
            }
            (Value::List(items), _, Some(list)) => {
                if list.element_relationship == ElementRelationship::Atomic || items.is_empty() {
                    insert_non_root(set, path);
                    return;
                }
                for (i, item) in items.iter().enumerate() {
                    let pe = match self.list_item_element(item, list, i, path) {
                        Ok(pe) => pe,
                        Err(_) => continue,
                    };
                    let item_path = path.with(pe);
                    set.insert(&item_path);
                    self.collect_field_set(item, &list.element_type, &item_path, set);
                }
            }
            _ => insert_non_root(set, path),
        }
    }

    /// Merges `rhs` into this value. Fields set in `rhs` win; keyed and set
    /// lists are merged entry by entry keeping the order of `self` and
    /// appending new entries; atomic and positional lists are replaced.
    pub fn merge(&self, rhs: &TypedValue<'_>) -> Result<TypedValue<'s>, ValidationErrors> {
        if self.type_ref != rhs.type_ref {
            return Err(ValidationErrors::from_error(ValidationError::schema_error(
                "expected objects of the same type",
            )));
        }
        let merged = self.merge_values(&self.value, &rhs.value, &self.type_ref, &Path::new());
        Ok(self.derived(merged))
    }

    fn merge_values(&self, lhs: &Value, rhs: &Value, type_ref: &TypeRef, path: &Path) -> Value {
        if rhs.is_null() {
            return lhs.clone();
        }
        let atom = match self.schema.resolve(type_ref) {
            Some(atom) => atom,
            None => return rhs.clone(),
        };

        match (lhs, rhs, atom.map.as_ref(), atom.list.as_ref()) {
            (Value::Map(lhs_fields), Value::Map(rhs_fields), Some(map), _)
                if map.element_relationship != ElementRelationship::Atomic =>
            {
                let mut result = lhs_fields.clone();
                for (name, rhs_field) in rhs_fields.iter() {
                    let merged = match lhs_fields.get(name) {
                        Some(lhs_field) => self.merge_values(
                            lhs_field,
                            rhs_field,
                            map.field_type(name),
                            &path.with(PathElement::field_name(name.clone())),
                        ),
                        None => rhs_field.clone(),
                    };
                    result.set(name.clone(), merged);
                }
                Value::Map(result)
            }
            (Value::List(lhs_items), Value::List(rhs_items), _, Some(list))
                if list.element_relationship == ElementRelationship::Associative =>
            {
                self.merge_lists(lhs_items, rhs_items, list, path)
            }
            _ => rhs.clone(),
        }
    }

    fn merge_lists(&self, lhs: &[Value], rhs: &[Value], list: &List, path: &Path) -> Value {
        let mut order: Vec<(PathElement, Value)> = Vec::with_capacity(lhs.len() + rhs.len());
        let mut positions: BTreeMap<PathElement, usize> = BTreeMap::new();

        for (i, item) in lhs.iter().enumerate() {
            let pe = self
                .list_item_element(item, list, i, path)
                .unwrap_or_else(|_| PathElement::index(i));
            positions.insert(pe.clone(), order.len());
            order.push((pe, item.clone()));
        }

        for (i, item) in rhs.iter().enumerate() {
            let pe = match self.list_item_element(item, list, i, path) {
                Ok(pe) => pe,
                Err(_) => continue,
            };
            match positions.get(&pe) {
                Some(&pos) => {
                    let item_path = path.with(pe);
                    let merged = self.merge_values(&order[pos].1, item, &list.element_type, &item_path);
                    order[pos].1 = merged;
                }
                None => {
                    positions.insert(pe.clone(), order.len());
                    order.push((pe, item.clone()));
                }
            }
        }

        Value::List(order.into_iter().map(|(_, item)| item).collect())
    }

    /// Returns a copy of this value without the locations in `items`.
    pub fn remove_items(&self, items: &Set) -> TypedValue<'s> {
        if items.contains_root() {
            return self.derived(Value::Null);
        }
        let removed = self.remove_from(&self.value, &self.type_ref, items, &Path::new());
        self.derived(removed)
    }

    fn remove_from(&self, value: &Value, type_ref: &TypeRef, items: &Set, path: &Path) -> Value {
        let atom = match self.schema.resolve(type_ref) {
            Some(atom) => atom,
            None => return value.clone(),
        };

        match (value, atom.map.as_ref(), atom.list.as_ref()) {
            (Value::Map(fields), Some(map), _) => {
                let mut result = Map::new();
                for (name, field) in fields.iter() {
                    let pe = PathElement::field_name(name.clone());
                    if items.members.contains(&pe) {
                        continue;
                    }
                    let kept = match items.child(&pe) {
                        Some(sub) => self.remove_from(field, map.field_type(name), sub, &path.with(pe)),
                        None => field.clone(),
                    };
                    result.set(name.clone(), kept);
                }
                Value::Map(result)
            }
            (Value::List(entries), _, Some(list)) if list.element_relationship != ElementRelationship::Atomic => {
                let mut result = Vec::with_capacity(entries.len());
                for (i, item) in entries.iter().enumerate() {
                    let pe = self
                        .list_item_element(item, list, i, path)
                        .unwrap_or_else(|_| PathElement::index(i));
                    if items.members.contains(&pe) {
                        continue;
                    }
                    let kept = match items.child(&pe) {
                        Some(sub) => self.remove_from(item, &list.element_type, sub, &path.with(pe)),
                        None => item.clone(),
                    };
                    result.push(kept);
                }
                Value::List(result)
            }
            _ => value.clone(),
        }
    }
}

/// The schema default of a key field, if the element type declares one.
fn key_default(element: &Atom, key: &str) -> Option<Value> {
    let field = element.map.as_ref()?.find_field(key)?;
    field.default.as_ref().map(Value::from)
}

fn insert_non_root(set: &mut Set, path: &Path) {
    if !path.is_empty() {
        set.insert(path);
    }
}

/// Names the shapes an atom accepts, for error messages.
fn describe(atom: &Atom) -> String {
    let mut shapes = Vec::new();
    if atom.scalar.is_some() {
        shapes.push("scalar");
    }
    if atom.list.is_some() {
        shapes.push("list");
    }
    if atom.map.is_some() {
        shapes.push("map");
    }
    if shapes.is_empty() {
        return "nothing".to_string();
    }
    shapes.join(" or ")
}

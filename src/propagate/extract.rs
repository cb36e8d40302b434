//! Ownership extraction: the part of an object a set of managers wrote.

use crate::cluster::Object;
use crate::fieldpath::{ManagedFieldsEntry, ManagedFieldsError, Set};
use crate::schema::KindSchema;
use crate::typed::{TypedValue, ValidationErrors};
use crate::value::Value;
use thiserror::Error;

/// ManagerSelector picks the managed fields entries whose paths are
/// propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerSelector {
    Any,
    Only(String),
    Exclude(Vec<String>),
}

impl ManagerSelector {
    pub fn excluding<I, S>(managers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ManagerSelector::Exclude(managers.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, manager: &str) -> bool {
        match self {
            ManagerSelector::Any => true,
            ManagerSelector::Only(m) => m == manager,
            ManagerSelector::Exclude(excluded) => !excluded.iter().any(|m| m == manager),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    ManagedFields(#[from] ManagedFieldsError),

    #[error("object does not match its schema: {0}")]
    Schema(#[from] ValidationErrors),
}

/// The leaf paths owned by the selected managers.
pub fn owned_fields(entries: &[ManagedFieldsEntry], select: &ManagerSelector) -> Set {
    entries
        .iter()
        .filter(|e| select.matches(&e.manager))
        .fold(Set::new(), |acc, e| acc.union(&e.fields))
        .leaves()
}

/// Projects `object` onto the leaves its selected managers own.
///
/// Server-maintained metadata is dropped first; it is never owned and
/// would only be type-checked for nothing.
pub fn extract(object: &Object, kind: &KindSchema<'_>, select: &ManagerSelector) -> Result<Value, ExtractError> {
    let entries = object.managed_fields()?;
    let fields = owned_fields(&entries, select);

    let mut source = object.clone();
    source.strip_server_fields();
    let typed = TypedValue::for_kind(source.into_value(), kind)?;
    Ok(typed.project(&fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::GroupVersionKind;
    use crate::fieldpath::Path;
    use crate::schema::SchemaRegistry;
    use crate::value::from_yaml;
    use pretty_assertions::assert_eq;

    fn deployment(body: &str) -> Object {
        Object::from_value(from_yaml(body).unwrap()).unwrap()
    }

    const OBJECT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: default
  resourceVersion: "7"
  managedFields:
  - manager: user
    operation: Apply
    apiVersion: apps/v1
    fieldsType: FieldsV1
    fieldsV1:
      f:spec:
        f:replicas: {}
        f:template:
          f:spec:
            f:containers:
              'k:{"name":"a"}':
                .: {}
                f:name: {}
                f:image: {}
  - manager: scheduler
    operation: Update
    apiVersion: apps/v1
    fieldsType: FieldsV1
    fieldsV1:
      f:spec:
        f:template:
          f:spec:
            f:containers:
              'k:{"name":"a"}':
                f:resources:
                  f:limits:
                    f:cpu: {}
spec:
  replicas: 3
  template:
    spec:
      containers:
      - name: a
        image: x
        resources:
          limits:
            cpu: 500m
"#;

    #[test]
    fn test_selector() {
        assert!(ManagerSelector::Any.matches("anyone"));
        assert!(ManagerSelector::Only("user".into()).matches("user"));
        assert!(!ManagerSelector::Only("user".into()).matches("other"));

        let select = ManagerSelector::excluding(["propagate-controller", "kubectl"]);
        assert!(!select.matches("kubectl"));
        assert!(select.matches("scheduler"));
    }

    #[test]
    fn test_owned_fields_are_leaves() {
        let object = deployment(OBJECT);
        let fields = owned_fields(&object.managed_fields().unwrap(), &ManagerSelector::Only("user".into()));

        // the "." marker of the container entry is dropped: its children are owned
        assert_eq!(fields.leaf_count(), fields.len());
        assert!(fields.has(&Path::from_fields(&["spec", "replicas"])));
        assert!(!fields.has_prefix(&Path::from_fields(&["metadata"])));
    }

    #[test]
    fn test_extract_single_manager() {
        let registry = SchemaRegistry::builtin().unwrap();
        let kind = registry.lookup(&GroupVersionKind::new("apps", "v1", "Deployment"));
        let object = deployment(OBJECT);

        let user = extract(&object, &kind, &ManagerSelector::Only("user".into())).unwrap();
        assert_eq!(
            user,
            from_yaml("spec: {replicas: 3, template: {spec: {containers: [{name: a, image: x}]}}}").unwrap()
        );

        let others = extract(&object, &kind, &ManagerSelector::excluding(["user"])).unwrap();
        assert_eq!(
            others,
            from_yaml("spec: {template: {spec: {containers: [{name: a, resources: {limits: {cpu: 500m}}}]}}}")
                .unwrap()
        );
    }

    #[test]
    fn test_extract_nothing_selected() {
        let registry = SchemaRegistry::builtin().unwrap();
        let kind = registry.lookup(&GroupVersionKind::new("apps", "v1", "Deployment"));
        let object = deployment(OBJECT);

        let nobody = extract(&object, &kind, &ManagerSelector::Only("nobody".into())).unwrap();
        assert_eq!(nobody, from_yaml("{}").unwrap());
    }

    #[test]
    fn test_extract_errors() {
        let registry = SchemaRegistry::builtin().unwrap();
        let kind = registry.lookup(&GroupVersionKind::new("apps", "v1", "Deployment"));

        let mistyped = deployment("apiVersion: apps/v1\nkind: Deployment\nmetadata: {name: web}\nspec: {replicas: [1]}\n");
        let err = extract(&mistyped, &kind, &ManagerSelector::Any).unwrap_err();
        assert!(matches!(err, ExtractError::Schema(_)));

        let bad_fields = deployment(
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n  managedFields:\n  - manager: m\n    fieldsType: FieldsV2\n",
        );
        let err = extract(&bad_fields, &kind, &ManagerSelector::Any).unwrap_err();
        assert!(matches!(err, ExtractError::ManagedFields(_)));
    }
}

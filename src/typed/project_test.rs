//! Tests for projecting values onto field sets.

#[cfg(test)]
mod tests {
    use crate::cluster::GroupVersionKind;
    use crate::fieldpath::{Path, PathElement, Set};
    use crate::schema::{Schema, SchemaRegistry, TypeRef};
    use crate::typed::TypedValue;
    use crate::value::{from_yaml, Value};
    use pretty_assertions::assert_eq;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builtin().unwrap()
    }

    fn deployment() -> GroupVersionKind {
        GroupVersionKind::new("apps", "v1", "Deployment")
    }

    fn yaml(s: &str) -> Value {
        from_yaml(s).unwrap()
    }

    fn fields_v1(json: &str) -> Set {
        Set::from_json(json.as_bytes()).unwrap()
    }

    fn containers() -> Path {
        Path::from_fields(&["spec", "template", "spec", "containers"])
    }

    /// Returns true if every location of `small` is present, with the same
    /// scalar value, in `big`.
    fn is_subdocument(small: &Value, big: &Value) -> bool {
        match (small, big) {
            (Value::Map(s), Value::Map(b)) => s
                .iter()
                .all(|(k, v)| b.get(k).map_or(false, |bv| is_subdocument(v, bv))),
            (Value::List(s), Value::List(b)) => {
                let mut rest = b.iter();
                s.iter().all(|item| rest.any(|candidate| is_subdocument(item, candidate)))
            }
            _ => small == big,
        }
    }

    const DEPLOYMENT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  labels:
    app: web
    tier: front
  finalizers: [a, b, c]
spec:
  replicas: 3
  selector:
    matchLabels:
      app: web
  template:
    metadata:
      labels:
        app: web
    spec:
      containers:
      - name: a
        image: x
        resources:
          limits:
            cpu: "1"
        ports:
        - containerPort: 80
        - containerPort: 53
          protocol: UDP
      - name: b
        image: y
        args: [--one, --two]
status:
  replicas: 3
"#;

    #[test]
    fn test_associative_entry_keeps_only_owned_fields() {
        let registry = registry();
        let kind = registry.lookup(&deployment());
        let tv = TypedValue::for_kind(
            yaml("spec:\n  template:\n    spec:\n      containers:\n      - name: a\n        image: x\n        resources:\n          limits:\n            cpu: \"1\"\n"),
            &kind,
        )
        .unwrap();

        let user = fields_v1(
            r#"{"f:spec":{"f:template":{"f:spec":{"f:containers":{"k:{\"name\":\"a\"}":{".":{},"f:name":{},"f:image":{}}}}}}}"#,
        );
        assert_eq!(
            tv.project(&user.leaves()),
            yaml("spec:\n  template:\n    spec:\n      containers:\n      - name: a\n        image: x\n")
        );

        let scheduler = fields_v1(
            r#"{"f:spec":{"f:template":{"f:spec":{"f:containers":{"k:{\"name\":\"a\"}":{"f:resources":{"f:limits":{"f:cpu":{}}}}}}}}}"#,
        );
        assert_eq!(
            tv.project(&scheduler.leaves()),
            yaml("spec:\n  template:\n    spec:\n      containers:\n      - name: a\n        resources:\n          limits:\n            cpu: \"1\"\n")
        );
    }

    #[test]
    fn test_empty_set_and_root() {
        let registry = registry();
        let kind = registry.lookup(&deployment());
        let tv = TypedValue::for_kind(yaml(DEPLOYMENT), &kind).unwrap();

        assert_eq!(tv.project(&Set::new()), yaml("{}"));

        let root: Set = vec![Path::new()].into_iter().collect();
        assert_eq!(&tv.project(&root), tv.value());
    }

    #[test]
    fn test_paths_missing_from_value_are_dropped() {
        let registry = registry();
        let kind = registry.lookup(&deployment());
        let tv = TypedValue::for_kind(yaml(DEPLOYMENT), &kind).unwrap();

        let set: Set = vec![
            Path::from_fields(&["spec", "paused"]),
            containers().with(PathElement::key_by("name", "zzz")),
            Path::from_fields(&["spec", "replicas", "nested"]),
        ]
        .into_iter()
        .collect();
        assert_eq!(tv.project(&set), yaml("{}"));
    }

    #[test]
    fn test_member_copies_whole_subtree() {
        let registry = registry();
        let kind = registry.lookup(&deployment());
        let tv = TypedValue::for_kind(yaml(DEPLOYMENT), &kind).unwrap();

        let set: Set = vec![
            Path::from_fields(&["metadata", "labels"]),
            containers().with(PathElement::key_by("name", "b")),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            tv.project(&set),
            yaml(
                "metadata:\n  labels: {app: web, tier: front}\nspec:\n  template:\n    spec:\n      containers:\n      - name: b\n        image: y\n        args: [--one, --two]\n"
            )
        );
    }

    #[test]
    fn test_entries_keep_source_order() {
        let registry = registry();
        let kind = registry.lookup(&deployment());
        let tv = TypedValue::for_kind(yaml(DEPLOYMENT), &kind).unwrap();

        let set: Set = vec![
            containers()
                .with(PathElement::key_by("name", "b"))
                .with(PathElement::field_name("image")),
            containers()
                .with(PathElement::key_by("name", "a"))
                .with(PathElement::field_name("image")),
            Path::from_fields(&["metadata", "finalizers"]).with(PathElement::value(Value::from("c"))),
            Path::from_fields(&["metadata", "finalizers"]).with(PathElement::value(Value::from("a"))),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            tv.project(&set),
            yaml(
                "metadata:\n  finalizers: [a, c]\nspec:\n  template:\n    spec:\n      containers:\n      - {name: a, image: x}\n      - {name: b, image: y}\n"
            )
        );
    }

    #[test]
    fn test_defaulted_key_matches_without_inventing_fields() {
        let registry = registry();
        let kind = registry.lookup(&deployment());
        let tv = TypedValue::for_kind(yaml(DEPLOYMENT), &kind).unwrap();

        let ports = fields_v1(
            r#"{"f:spec":{"f:template":{"f:spec":{"f:containers":{"k:{\"name\":\"a\"}":{"f:ports":{"k:{\"containerPort\":80,\"protocol\":\"TCP\"}":{".":{},"f:containerPort":{}}}}}}}}}"#,
        );
        assert_eq!(
            tv.project(&ports.leaves()),
            yaml("spec:\n  template:\n    spec:\n      containers:\n      - name: a\n        ports:\n        - containerPort: 80\n")
        );
    }

    #[test]
    fn test_atomic_containers_project_whole() {
        let registry = registry();
        let kind = registry.lookup(&deployment());
        let tv = TypedValue::for_kind(yaml(DEPLOYMENT), &kind).unwrap();

        let set: Set = vec![
            Path::from_fields(&["spec", "selector", "matchLabels", "app"]),
            containers()
                .with(PathElement::key_by("name", "b"))
                .with(PathElement::field_name("args"))
                .with(PathElement::index(1)),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            tv.project(&set),
            yaml(
                "spec:\n  selector:\n    matchLabels: {app: web}\n  template:\n    spec:\n      containers:\n      - name: b\n        args: [--one, --two]\n"
            )
        );
    }

    #[test]
    fn test_unknown_kind_lists_are_atomic() {
        let registry = registry();
        let kind = registry.lookup(&GroupVersionKind::new("example.com", "v1", "Widget"));
        let tv = TypedValue::for_kind(
            yaml("spec:\n  size: 2\n  parts:\n  - {id: a, color: red}\n  - {id: b, color: blue}\n"),
            &kind,
        )
        .unwrap();

        let set: Set = vec![Path::from_fields(&["spec", "parts"])
            .with(PathElement::index(0))
            .with(PathElement::field_name("color"))]
        .into_iter()
        .collect();
        assert_eq!(
            tv.project(&set),
            yaml("spec:\n  parts:\n  - {id: a, color: red}\n  - {id: b, color: blue}\n")
        );

        let size: Set = vec![Path::from_fields(&["spec", "size"])].into_iter().collect();
        assert_eq!(tv.project(&size), yaml("spec:\n  size: 2\n"));
    }

    #[test]
    fn test_positional_list_projects_whole() {
        let schema: Schema = serde_yaml::from_str(
            r#"types:
- name: steps
  map:
    fields:
    - name: steps
      type:
        list:
          elementType:
            map:
              elementType:
                scalar: string
          elementRelationship: separable
    - name: other
      type:
        scalar: string
"#,
        )
        .unwrap();
        let tv = TypedValue::new(
            yaml("steps:\n- {run: build}\n- {run: test}\nother: x\n"),
            &schema,
            TypeRef::named("steps"),
        )
        .unwrap();

        let set: Set = vec![Path::from_fields(&["steps"])
            .with(PathElement::index(1))
            .with(PathElement::field_name("run"))]
        .into_iter()
        .collect();
        let once = tv.project(&set);
        assert_eq!(once, yaml("steps:\n- {run: build}\n- {run: test}\n"));
        assert_eq!(tv.derived(once.clone()).project(&set), once);
    }

    #[test]
    fn test_projection_is_idempotent_and_monotonic() {
        let registry = registry();
        let kind = registry.lookup(&deployment());
        let tv = TypedValue::for_kind(yaml(DEPLOYMENT), &kind).unwrap();
        let full = tv.to_field_set();

        let a = containers().with(PathElement::key_by("name", "a"));
        let chain: Vec<Set> = vec![
            Set::new(),
            vec![Path::from_fields(&["spec", "replicas"])].into_iter().collect(),
            vec![
                Path::from_fields(&["spec", "replicas"]),
                a.with(PathElement::field_name("image")),
            ]
            .into_iter()
            .collect(),
            vec![
                Path::from_fields(&["spec", "replicas"]),
                a.with(PathElement::field_name("image")),
                a.with(PathElement::field_name("resources"))
                    .with(PathElement::field_name("limits"))
                    .with(PathElement::field_name("cpu")),
                Path::from_fields(&["metadata", "finalizers"]).with(PathElement::value(Value::from("b"))),
                Path::from_fields(&["spec", "selector"]),
            ]
            .into_iter()
            .collect(),
            full.leaves(),
            full.clone(),
        ];

        for set in &chain {
            let once = tv.project(set);
            let again = TypedValue::for_kind(once.clone(), &kind).unwrap().project(set);
            assert_eq!(again, once, "projection is not idempotent for {:?}", set.paths());
        }

        for pair in chain.windows(2) {
            let (smaller, larger) = (&pair[0], &pair[1]);
            assert_eq!(larger.union(smaller), larger.clone());
            assert!(
                is_subdocument(&tv.project(smaller), &tv.project(larger)),
                "projection is not monotonic for {:?}",
                smaller.paths()
            );
        }

        assert_eq!(&tv.project(&full.leaves()), tv.value());
    }
}

//! End-to-end propagation between two in-memory clusters, driven by their
//! watch events.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use propagate_controller::cluster::{
    ApplyOptions, Cluster, GroupVersionKind, InMemoryCluster, Object, ObjectKey, WATCH_BUFFER_SIZE,
};
use propagate_controller::config::Config;
use propagate_controller::controller::Reconciler;
use propagate_controller::propagate::{Propagator, Side};
use propagate_controller::schema::SchemaRegistry;
use propagate_controller::value::{from_yaml, Value};
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
hostNamespace: host
targets:
- {group: apps, version: v1, kind: Deployment}
"#;

struct Harness {
    tenant: Arc<InMemoryCluster>,
    host: Arc<InMemoryCluster>,
    engine: Arc<Propagator>,
    shutdown: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Harness {
    fn start() -> Self {
        let config = Config::from_yaml(CONFIG).unwrap();
        config.validate().unwrap();

        let registry = Arc::new(SchemaRegistry::builtin().unwrap());
        let tenant = Arc::new(InMemoryCluster::new("tenant", Arc::clone(&registry)));
        let host = Arc::new(InMemoryCluster::new("host", Arc::clone(&registry)));
        let engine = Arc::new(Propagator::new(
            config.identity(),
            &config.targets,
            config.workers,
            registry,
            tenant.clone(),
            host.clone(),
        ));

        let shutdown = CancellationToken::new();
        let router = engine.router();
        let mut tasks = vec![
            tokio::spawn(router.clone().forward(Side::Tenant, tenant.subscribe(), shutdown.clone())),
            tokio::spawn(router.forward(Side::Host, host.subscribe(), shutdown.clone())),
        ];
        {
            let engine = Arc::clone(&engine);
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move { engine.run(shutdown).await }));
        }

        Harness {
            tenant,
            host,
            engine,
            shutdown,
            tasks,
        }
    }

    fn parts(&self) -> (&InMemoryCluster, &InMemoryCluster, &Propagator) {
        (&self.tenant, &self.host, &self.engine)
    }

    async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("task did not stop")
                .unwrap();
        }
    }
}

fn deployment() -> GroupVersionKind {
    GroupVersionKind::new("apps", "v1", "Deployment")
}

fn object(namespace: &str, name: &str, body: &str) -> Object {
    let header = format!("apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {name}\n  namespace: {namespace}\n");
    Object::from_value(from_yaml(&format!("{header}{body}")).unwrap()).unwrap()
}

async fn lookup(cluster: &InMemoryCluster, key: &ObjectKey, path: &[&str]) -> Option<Value> {
    let object = cluster.get(&deployment(), key).await.ok()?;
    object.value().lookup(path).cloned()
}

/// Polls until `check` holds.
async fn eventually<F, Fut>(check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    eventually_within(Duration::from_secs(5), check).await
}

async fn eventually_within<F, Fut>(limit: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(limit, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("never converged");
}

/// Lets queued reconciles run out.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spec_down_status_up() {
    let h = Harness::start();
    let (tenant, host, engine) = h.parts();
    let source = &ObjectKey::new("team-a", "web");
    let mirror = &ObjectKey::new("host", "web");

    tenant
        .apply(object("team-a", "web", "spec:\n  replicas: 3\n"), &ApplyOptions::new("user"))
        .await
        .unwrap();
    eventually(move || async move { lookup(host, mirror, &["spec", "replicas"]).await == Some(Value::Int(3)) }).await;

    let stored = host.get(&deployment(), mirror).await.unwrap();
    assert_eq!(stored.annotation("materialized-by"), Some("propagate-controller"));

    // a host-side controller reports on the mirror
    host
        .apply_status(
            object("host", "web", "status:\n  readyReplicas: 2\n"),
            &ApplyOptions::new("kubelet"),
        )
        .await
        .unwrap();
    eventually(move || async move {
        lookup(tenant, source, &["status", "readyReplicas"]).await == Some(Value::Int(2))
    })
    .await;

    // a spec change keeps flowing down
    tenant
        .apply(object("team-a", "web", "spec:\n  replicas: 5\n"), &ApplyOptions::new("user"))
        .await
        .unwrap();
    eventually(move || async move { lookup(host, mirror, &["spec", "replicas"]).await == Some(Value::Int(5)) }).await;
    settle().await;

    // nothing the engine wrote on the host came back up
    let current = tenant.get(&deployment(), source).await.unwrap();
    assert_eq!(current.value().lookup(&["spec"]), Some(&from_yaml("{replicas: 5}").unwrap()));
    assert_eq!(current.value().lookup(&["status"]), Some(&from_yaml("{readyReplicas: 2}").unwrap()));
    assert_eq!(current.annotation("materialized-by"), None);

    // the tenant status did not leak onto the mirror's spec side either
    let stored = host.get(&deployment(), mirror).await.unwrap();
    assert_eq!(stored.value().lookup(&["status"]), Some(&from_yaml("{readyReplicas: 2}").unwrap()));

    assert!(engine.conditions().is_empty());
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_converged_state_is_quiet() {
    let h = Harness::start();
    let (tenant, host, engine) = h.parts();
    let mirror = &ObjectKey::new("host", "web");

    tenant
        .apply(object("team-a", "web", "spec:\n  replicas: 3\n"), &ApplyOptions::new("user"))
        .await
        .unwrap();
    eventually(move || async move { lookup(host, mirror, &["spec", "replicas"]).await == Some(Value::Int(3)) }).await;
    settle().await;

    let host_writes = host.writes();
    let tenant_writes = tenant.writes();

    // an unchanged tenant object reconciles to a no-op
    let materializer = engine.materializer(&deployment()).unwrap();
    materializer
        .reconciler()
        .reconcile(&ObjectKey::new("team-a", "web"))
        .await
        .unwrap();
    assert_eq!(host.writes(), host_writes);

    // and so does a full resync
    assert_eq!(engine.resync().await.unwrap(), 2);
    settle().await;
    assert_eq!(host.writes(), host_writes);
    assert_eq!(tenant.writes(), tenant_writes);

    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_foreign_host_objects_are_left_alone() {
    let h = Harness::start();
    let (tenant, host, engine) = h.parts();

    // same kind, same namespace, not materialized by the engine
    tenant
        .apply(object("team-a", "db", "spec:\n  replicas: 1\n"), &ApplyOptions::new("user"))
        .await
        .unwrap();
    eventually(move || async move { engine.mirrors().source(&deployment(), &ObjectKey::new("host", "db")).is_some() })
        .await;
    settle().await;

    host
        .apply(object("host", "cache", "spec:\n  replicas: 1\n"), &ApplyOptions::new("someone"))
        .await
        .unwrap();
    host
        .apply_status(
            object("host", "cache", "status:\n  readyReplicas: 1\n"),
            &ApplyOptions::new("kubelet"),
        )
        .await
        .unwrap();
    let tenant_writes = tenant.writes();
    settle().await;

    assert_eq!(tenant.writes(), tenant_writes);
    assert_eq!(tenant.len(), 1);
    assert!(engine.conditions().is_empty());
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_keyed_lists_and_collisions() {
    let h = Harness::start();
    let (tenant, host, engine) = h.parts();
    let mirror = &ObjectKey::new("host", "web");

    tenant
        .apply(
            object(
                "team-a",
                "web",
                "spec:\n  template:\n    spec:\n      containers:\n      - name: a\n        image: x\n",
            ),
            &ApplyOptions::new("user"),
        )
        .await
        .unwrap();
    eventually(move || async move { lookup(host, mirror, &["spec", "template"]).await.is_some() }).await;

    // a host-side writer adds to the same container entry
    host
        .apply(
            object(
                "host",
                "web",
                "spec:\n  template:\n    spec:\n      containers:\n      - name: a\n        resources: {limits: {cpu: 500m}}\n",
            ),
            &ApplyOptions::new("scheduler"),
        )
        .await
        .unwrap();
    settle().await;
    assert_eq!(
        lookup(host, mirror, &["spec", "template", "spec", "containers"]).await,
        Some(from_yaml("[{name: a, image: x, resources: {limits: {cpu: 500m}}}]").unwrap())
    );
    // spec fields never reach the tenant
    assert_eq!(
        lookup(tenant, &ObjectKey::new("team-a", "web"), &["spec", "template", "spec", "containers"]).await,
        Some(from_yaml("[{name: a, image: x}]").unwrap())
    );

    // another tenant namespace claiming the same mirror fails permanently
    tenant
        .apply(object("team-b", "web", "spec:\n  replicas: 1\n"), &ApplyOptions::new("user"))
        .await
        .unwrap();
    eventually(move || async move { !engine.conditions().is_empty() }).await;
    let conditions = engine.conditions();
    assert_eq!(conditions.len(), 1);
    assert_eq!(conditions[0].key, ObjectKey::new("team-b", "web"));
    assert_eq!(lookup(host, mirror, &["spec", "replicas"]).await, None);

    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deleting_the_source_releases_the_mirror() {
    let h = Harness::start();
    let (tenant, host, engine) = h.parts();
    let source = &ObjectKey::new("team-a", "web");

    tenant
        .apply(object("team-a", "web", "spec:\n  replicas: 3\n"), &ApplyOptions::new("user"))
        .await
        .unwrap();
    eventually(move || async move { engine.mirrors().destination(&deployment(), source).is_some() }).await;

    tenant.delete(&deployment(), source).unwrap();
    eventually(move || async move { engine.mirrors().is_empty() }).await;

    // the name is free for another namespace now
    tenant
        .apply(object("team-b", "web", "spec:\n  replicas: 7\n"), &ApplyOptions::new("user"))
        .await
        .unwrap();
    eventually(move || async move {
        lookup(host, &ObjectKey::new("host", "web"), &["spec", "replicas"]).await == Some(Value::Int(7))
    })
    .await;
    assert!(engine.conditions().is_empty());

    h.stop().await;
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = Harness::start();
    let (tenant, host, engine) = h.parts();

    // nothing runs before the test task yields, so the first host call
    // is the materialize apply
    tenant
        .apply(object("team-a", "web", "spec:\n  replicas: 3\n"), &ApplyOptions::new("user"))
        .await
        .unwrap();
    host
        .fail_next(propagate_controller::ClusterError::Transport("connection reset".into()));

    eventually(move || async move { host.writes() == 1 }).await;
    assert_eq!(
        lookup(host, &ObjectKey::new("host", "web"), &["spec", "replicas"]).await,
        Some(Value::Int(3))
    );
    assert!(engine.conditions().is_empty());

    h.stop().await;
}

#[tokio::test]
async fn test_dropped_watch_events_are_recovered() {
    let h = Harness::start();
    let (tenant, host, engine) = h.parts();

    // nothing drains the watch before the test task yields, so the tenant
    // watch overflows and the router only sees the newest events
    let count = WATCH_BUFFER_SIZE + 76;
    for i in 0..count {
        tenant
            .apply(
                object("team-a", &format!("web-{i}"), "spec:\n  replicas: 1\n"),
                &ApplyOptions::new("user"),
            )
            .await
            .unwrap();
    }
    assert_eq!(tenant.len(), count);

    eventually_within(Duration::from_secs(60), move || async move { host.len() == count }).await;
    assert_eq!(
        lookup(host, &ObjectKey::new("host", "web-0"), &["spec", "replicas"]).await,
        Some(Value::Int(1))
    );
    assert_eq!(engine.mirrors().len(), count);
    assert!(engine.conditions().is_empty());

    h.stop().await;
}

#[tokio::test]
async fn test_rejected_mirror_does_not_hold_its_name() {
    let h = Harness::start();
    let (tenant, host, engine) = h.parts();

    // as above, the first host call is the materialize apply of team-a
    tenant
        .apply(object("team-a", "web", "spec:\n  replicas: 3\n"), &ApplyOptions::new("user"))
        .await
        .unwrap();
    host.fail_next(propagate_controller::ClusterError::Invalid("rejected by admission".into()));
    eventually(move || async move { !engine.conditions().is_empty() }).await;
    assert!(engine.mirrors().is_empty());

    tenant
        .apply(object("team-b", "web", "spec:\n  replicas: 7\n"), &ApplyOptions::new("user"))
        .await
        .unwrap();
    eventually(move || async move {
        lookup(host, &ObjectKey::new("host", "web"), &["spec", "replicas"]).await == Some(Value::Int(7))
    })
    .await;

    let conditions = engine.conditions();
    assert_eq!(conditions.len(), 1);
    assert_eq!(conditions[0].key, ObjectKey::new("team-a", "web"));
    assert_eq!(
        engine.mirrors().source(&deployment(), &ObjectKey::new("host", "web")),
        Some(ObjectKey::new("team-b", "web"))
    );

    h.stop().await;
}

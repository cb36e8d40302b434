//! Wiring: one materialize and one virtualize controller per target.

use super::identity::Identity;
use super::materialize::Materializer;
use super::mirror::MirrorRegistry;
use super::virtualize::Virtualizer;
use crate::cluster::{Cluster, ClusterError, ClusterEvent, GroupVersionKind, ObjectKey, WatchEvent};
use crate::controller::{Backoff, Conditions, Controller, FailureCondition, WorkQueue};
use crate::schema::SchemaRegistry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Which cluster an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Tenant,
    Host,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Tenant => f.write_str("tenant"),
            Side::Host => f.write_str("host"),
        }
    }
}

struct Target {
    gvk: GroupVersionKind,
    materialize: Controller<Materializer>,
    virtualize: Controller<Virtualizer>,
}

/// Propagator owns the controllers of every configured kind and the state
/// they share.
pub struct Propagator {
    identity: Arc<Identity>,
    tenant: Arc<dyn Cluster>,
    host: Arc<dyn Cluster>,
    mirrors: Arc<MirrorRegistry>,
    conditions: Arc<Conditions>,
    targets: Vec<Target>,
}

impl Propagator {
    pub fn new(
        identity: Identity,
        targets: &[GroupVersionKind],
        workers: usize,
        registry: Arc<SchemaRegistry>,
        tenant: Arc<dyn Cluster>,
        host: Arc<dyn Cluster>,
    ) -> Self {
        let identity = Arc::new(identity);
        let mirrors = Arc::new(MirrorRegistry::new());
        let conditions = Arc::new(Conditions::new());

        let targets = targets
            .iter()
            .map(|gvk| {
                let materializer = Materializer::new(
                    gvk.clone(),
                    Arc::clone(&tenant),
                    Arc::clone(&host),
                    Arc::clone(&registry),
                    Arc::clone(&mirrors),
                    Arc::clone(&identity),
                );
                let virtualizer = Virtualizer::new(
                    gvk.clone(),
                    Arc::clone(&tenant),
                    Arc::clone(&host),
                    Arc::clone(&registry),
                    Arc::clone(&mirrors),
                    Arc::clone(&identity),
                );
                Target {
                    gvk: gvk.clone(),
                    materialize: Controller::new(format!("materialize/{gvk}"), materializer, Arc::clone(&conditions))
                        .with_workers(workers),
                    virtualize: Controller::new(format!("virtualize/{gvk}"), virtualizer, Arc::clone(&conditions))
                        .with_workers(workers),
                }
            })
            .collect();

        Propagator {
            identity,
            tenant,
            host,
            mirrors,
            conditions,
            targets,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn mirrors(&self) -> &MirrorRegistry {
        &self.mirrors
    }

    fn target(&self, gvk: &GroupVersionKind) -> Option<&Target> {
        self.targets.iter().find(|t| &t.gvk == gvk)
    }

    pub fn materializer(&self, gvk: &GroupVersionKind) -> Option<&Controller<Materializer>> {
        self.target(gvk).map(|t| &t.materialize)
    }

    pub fn virtualizer(&self, gvk: &GroupVersionKind) -> Option<&Controller<Virtualizer>> {
        self.target(gvk).map(|t| &t.virtualize)
    }

    /// Objects the engine gave up on until their next change.
    pub fn conditions(&self) -> Vec<FailureCondition> {
        self.conditions.snapshot()
    }

    /// An entry point for watch events, feeding the controllers' queues.
    pub fn router(&self) -> EventRouter {
        let routes = self
            .targets
            .iter()
            .map(|t| {
                let route = Route {
                    materialize: Arc::clone(t.materialize.queue()),
                    virtualize: Arc::clone(t.virtualize.queue()),
                };
                (t.gvk.clone(), route)
            })
            .collect();
        EventRouter {
            identity: Arc::clone(&self.identity),
            tenant: Arc::clone(&self.tenant),
            host: Arc::clone(&self.host),
            mirrors: Arc::clone(&self.mirrors),
            routes: Arc::new(routes),
            relist_backoff: Arc::new(Backoff::default()),
        }
    }

    /// Queues every object of every target on both clusters. Host mirrors
    /// are listed first so that their mappings are known before any tenant
    /// object claims a destination.
    pub async fn resync(&self) -> Result<usize, ClusterError> {
        let mut queued = 0;
        for target in &self.targets {
            for mirror in self.host.list(&target.gvk, Some(&self.identity.host_namespace)).await? {
                if !self.identity.is_guarded(&mirror) {
                    continue;
                }
                if let Some(Err(collision)) = self.mirrors.restore(&target.gvk, &mirror) {
                    warn!(error = %collision, "conflicting mirrors on the host");
                }
                target.virtualize.enqueue(mirror.key());
                queued += 1;
            }
            for source in self.tenant.list(&target.gvk, None).await? {
                target.materialize.enqueue(source.key());
                queued += 1;
            }
        }
        info!(queued, mirrors = self.mirrors.len(), "resync queued objects");
        Ok(queued)
    }

    /// Runs every controller until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut controllers = JoinSet::new();
        for target in &self.targets {
            controllers.spawn(target.materialize.clone().run(shutdown.clone()));
            controllers.spawn(target.virtualize.clone().run(shutdown.clone()));
        }
        while controllers.join_next().await.is_some() {}
        debug!("all controllers stopped");
    }
}

#[derive(Clone)]
struct Route {
    materialize: Arc<WorkQueue<ObjectKey>>,
    virtualize: Arc<WorkQueue<ObjectKey>>,
}

/// EventRouter turns watch events into queued keys.
///
/// Tenant events always queue a materialize. Host events queue a
/// virtualize only if the object, before or after the change, carries the
/// engine's loop guard. When a watch drops events the router lists that
/// cluster again and queues everything it finds.
#[derive(Clone)]
pub struct EventRouter {
    identity: Arc<Identity>,
    tenant: Arc<dyn Cluster>,
    host: Arc<dyn Cluster>,
    mirrors: Arc<MirrorRegistry>,
    routes: Arc<HashMap<GroupVersionKind, Route>>,
    relist_backoff: Arc<Backoff<Side>>,
}

impl EventRouter {
    /// Returns true if the event was queued.
    pub fn tenant_event(&self, gvk: &GroupVersionKind, event: &WatchEvent) -> bool {
        let Some(route) = self.routes.get(gvk) else {
            return false;
        };
        trace!(kind = %gvk, key = %event.key(), event = event.kind_name(), "tenant object queued");
        route.materialize.add(event.key());
        true
    }

    /// Returns true if the event passed the loop guard and was queued.
    pub fn host_event(&self, gvk: &GroupVersionKind, event: &WatchEvent) -> bool {
        let Some(route) = self.routes.get(gvk) else {
            return false;
        };
        if !event.any_object(|o| self.identity.is_guarded(o)) {
            trace!(kind = %gvk, key = %event.key(), event = event.kind_name(), "host object not ours, ignored");
            return false;
        }
        trace!(kind = %gvk, key = %event.key(), event = event.kind_name(), "mirror queued");
        route.virtualize.add(event.key());
        true
    }

    pub fn route(&self, side: Side, event: &ClusterEvent) -> bool {
        match side {
            Side::Tenant => self.tenant_event(&event.gvk, &event.event),
            Side::Host => self.host_event(&event.gvk, &event.event),
        }
    }

    /// Queues every watched object of one cluster. Tenant sources that
    /// have a mirror are queued even when the listing no longer has them,
    /// so a missed delete still releases its mapping.
    pub async fn relist(&self, side: Side) -> Result<usize, ClusterError> {
        let mut queued = 0;
        for (gvk, route) in self.routes.iter() {
            match side {
                Side::Tenant => {
                    for object in self.tenant.list(gvk, None).await? {
                        route.materialize.add(object.key());
                        queued += 1;
                    }
                    for source in self.mirrors.sources(gvk) {
                        route.materialize.add(source);
                    }
                }
                Side::Host => {
                    for object in self.host.list(gvk, Some(&self.identity.host_namespace)).await? {
                        if self.identity.is_guarded(&object) {
                            route.virtualize.add(object.key());
                            queued += 1;
                        }
                    }
                }
            }
        }
        Ok(queued)
    }

    /// Relists `side` until it succeeds or `shutdown` is cancelled.
    async fn recover(&self, side: Side, shutdown: &CancellationToken) {
        loop {
            match self.relist(side).await {
                Ok(queued) => {
                    self.relist_backoff.forget(&side);
                    info!(%side, queued, "relisted after dropped watch events");
                    return;
                }
                Err(err) => {
                    let delay = self.relist_backoff.next_delay(&side);
                    warn!(%side, error = %err, ?delay, "relist failed, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Routes events from one cluster's watch until it closes or
    /// `shutdown` is cancelled.
    pub async fn forward(self, side: Side, mut events: Receiver<ClusterEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => {
                        self.route(side, &event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%side, skipped, "watch fell behind, relisting");
                        self.recover(side, &shutdown).await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!(%side, "event forwarding stopped");
    }
}

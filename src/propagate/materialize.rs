//! Tenant to host: mirror what the tenant's writers own.

use super::error::ReconcileError;
use super::extract::extract;
use super::identity::Identity;
use super::mirror::MirrorRegistry;
use crate::cluster::{ApplyOptions, Cluster, GroupVersionKind, Object, ObjectKey};
use crate::controller::Reconciler;
use crate::schema::SchemaRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Materializer keeps the host mirror of each tenant object of one kind in
/// line with the fields the tenant's managers own.
pub struct Materializer {
    gvk: GroupVersionKind,
    tenant: Arc<dyn Cluster>,
    host: Arc<dyn Cluster>,
    registry: Arc<SchemaRegistry>,
    mirrors: Arc<MirrorRegistry>,
    identity: Arc<Identity>,
}

impl Materializer {
    pub fn new(
        gvk: GroupVersionKind,
        tenant: Arc<dyn Cluster>,
        host: Arc<dyn Cluster>,
        registry: Arc<SchemaRegistry>,
        mirrors: Arc<MirrorRegistry>,
        identity: Arc<Identity>,
    ) -> Self {
        Materializer {
            gvk,
            tenant,
            host,
            registry,
            mirrors,
            identity,
        }
    }

    /// Builds the mirror of `source` without writing it.
    pub fn mirror_of(&self, source: &Object) -> Result<Object, ReconcileError> {
        let kind = self.registry.lookup(&self.gvk);
        let projected = extract(source, &kind, &self.identity.materialize_selector())?;

        let mut mirror = Object::from_value(projected)?;
        mirror.set_gvk(&self.gvk);
        mirror.set_key(&self.identity.mirror_key(&source.key()));
        self.identity.stamp(&mut mirror, &source.key());
        Ok(mirror)
    }
}

#[async_trait]
impl Reconciler for Materializer {
    type Error = ReconcileError;

    #[instrument(skip(self, key), fields(kind = %self.gvk, namespace = %key.namespace, name = %key.name))]
    async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let source = match self.tenant.get(&self.gvk, key).await {
            Ok(object) => object,
            Err(err) if err.is_not_found() => {
                if let Some(destination) = self.mirrors.release(&self.gvk, key) {
                    debug!(%destination, "source is gone, mapping released");
                }
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let mirror = self.mirror_of(&source)?;
        let destination = mirror.key();
        // Held while the apply is in flight; a mapping only outlives a
        // successful write.
        let fresh = self.mirrors.claim(&self.gvk, key, &destination)?;

        let options = ApplyOptions::new(self.identity.field_manager.clone()).force();
        let outcome = match self.host.apply(mirror, &options).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if fresh {
                    self.mirrors.release(&self.gvk, key);
                }
                return Err(err.into());
            }
        };
        if outcome.changed {
            info!(
                %destination,
                manager = %options.field_manager,
                resource_version = outcome.object.resource_version().unwrap_or_default(),
                "mirror updated"
            );
        } else {
            debug!(%destination, "mirror up to date");
        }
        Ok(())
    }
}

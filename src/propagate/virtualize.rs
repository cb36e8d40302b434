//! Host to tenant: report what happened to a mirror in the tenant's status.

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

/// Virtualizer copies the host-side fields of a mirror, minus the ones the
/// engine wrote, into the status of the tenant object it came from.
pub struct Virtualizer {
    gvk: GroupVersionKind,
    tenant: Arc<dyn Cluster>,
    host: Arc<dyn Cluster>,
    registry: Arc<SchemaRegistry>,
    mirrors: Arc<MirrorRegistry>,
    identity: Arc<Identity>,
}

impl Virtualizer {
    pub fn new(
        gvk: GroupVersionKind,
        tenant: Arc<dyn Cluster>,
        host: Arc<dyn Cluster>,
        registry: Arc<SchemaRegistry>,
        mirrors: Arc<MirrorRegistry>,
        identity: Arc<Identity>,
    ) -> Self {
        Virtualizer {
            gvk,
            tenant,
            host,
            registry,
            mirrors,
            identity,
        }
    }

    /// The tenant object `mirror` was materialized from.
    fn source_of(&self, mirror: &Object) -> Result<ObjectKey, ReconcileError> {
        if let Some(source) = self.mirrors.source(&self.gvk, &mirror.key()) {
            return Ok(source);
        }
        match self.mirrors.restore(&self.gvk, mirror) {
            Some(restored) => Ok(restored?),
            None => Err(ReconcileError::UnknownSource(mirror.key())),
        }
    }

    /// Builds the status-only object written to the tenant.
    pub fn status_of(&self, mirror: &Object, source: &ObjectKey) -> Result<Object, ReconcileError> {
        let kind = self.registry.lookup(&self.gvk);
        let projected = extract(mirror, &kind, &self.identity.virtualize_selector())?;

        let mut status = Object::from_value(projected)?;
        status.set_gvk(&self.gvk);
        status.set_key(source);
        Ok(status.status_only())
    }
}

#[async_trait]
impl Reconciler for Virtualizer {
    type Error = ReconcileError;

    #[instrument(skip(self, key), fields(kind = %self.gvk, namespace = %key.namespace, name = %key.name))]
    async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let mirror = match self.host.get(&self.gvk, key).await {
            Ok(object) => object,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        // Events are gated already; the object may have changed since.
        if !self.identity.is_guarded(&mirror) {
            debug!("not materialized by this engine, skipping");
            return Ok(());
        }

        let source = self.source_of(&mirror)?;
        let status = self.status_of(&mirror, &source)?;

        let options = ApplyOptions::new(self.identity.field_manager.clone()).force();
        match self.tenant.apply_status(status, &options).await {
            Ok(outcome) if outcome.changed => {
                info!(
                    %source,
                    manager = %options.field_manager,
                    resource_version = outcome.object.resource_version().unwrap_or_default(),
                    "tenant status updated"
                );
            }
            Ok(_) => debug!(%source, "tenant status up to date"),
            Err(err) if err.is_not_found() => debug!(%source, "source is gone, nothing to report"),
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }
}

//! Reconciliation engine
//!
//! Generic control loop shared by every controller. One pass:
//!
//! 1. Load the resource; a resource that no longer exists needs nothing.
//! 2. Deletion candidates run the delete branch: mark `Deleting`, wait for
//!    dependents to let go, tear down, mark `Deleted`, then drop the
//!    finalizer on the following pass.
//! 3. Everything else runs the ensure pipeline: finalizer, `Pending`, then
//!    the controller's own steps. A pipeline that runs to the end marks the
//!    resource `Success`.
//! 4. Errors are classified: critical errors become `Failure` or
//!    `DeleteFailed` and are absorbed, everything else becomes `Error` and is
//!    returned for backoff.
//! 5. The status is diffed against the value loaded in step 1 and patched
//!    only when it changed.

use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::controller::error::{Error, Result};
use crate::controller::finalizer::{EnsureFinalizer, is_deletion_candidate, remove_finalizer};
use crate::controller::pipeline::{EnsurePending, EnsureStep, Pipeline, REQUEUE_NOW, StepOutcome};
use crate::crd::{ManagedResource, ResourceStatus, Status};
use crate::health::{Metrics, ReconcileLabels};
use crate::store::ResourceStore;

/// Per-controller engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub finalizer: &'static str,
    /// Requeue delay while other resources still reference one being deleted
    pub dependency_requeue: Duration,
    /// Requeue delay after a successful pass
    pub resync_interval: Duration,
}

/// The kind-specific part of a controller
#[async_trait]
pub trait ResourceHandler<K: ManagedResource>: Send + Sync {
    /// Steps run after the finalizer and pending steps
    fn ensure_steps(&self) -> Vec<Box<dyn EnsureStep<K> + '_>>;

    /// Explain why the resource cannot be deleted yet, if something still
    /// references it
    async fn dependency_violation(&self, _resource: &K) -> Result<Option<String>> {
        Ok(None)
    }

    /// Undo external side effects; `Continue` confirms teardown is complete
    async fn teardown(&self, resource: &mut K) -> Result<StepOutcome>;
}

pub struct Engine<'a, K: ManagedResource> {
    store: &'a dyn ResourceStore<K>,
    config: &'a EngineConfig,
    metrics: Option<&'a Metrics>,
}

impl<'a, K: ManagedResource> Engine<'a, K> {
    pub fn new(store: &'a dyn ResourceStore<K>, config: &'a EngineConfig) -> Self {
        Self {
            store,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: &'a Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one reconciliation pass for the named resource
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        handler: &dyn ResourceHandler<K>,
    ) -> Result<Action> {
        let Some(mut resource) = self.store.get(namespace, name).await? else {
            debug!("{} {}/{} no longer exists", K::kind(&()), namespace, name);
            return Ok(Action::await_change());
        };
        let original = resource.resource_status().cloned().unwrap_or_default();
        let finalizer = self.config.finalizer;

        let deleting = resource.meta().deletion_timestamp.is_some();
        let result = if is_deletion_candidate(&resource, finalizer) {
            if original.status == Status::Deleted {
                remove_finalizer(self.store, &mut resource, finalizer).await?;
                return Ok(Action::await_change());
            }
            if self.terminal_unchanged(&resource, Status::DeleteFailed) {
                debug!("{} is DeleteFailed at this generation, waiting for a change", name);
                return Ok(Action::await_change());
            }
            self.delete(&mut resource, handler).await
        } else if deleting {
            // Someone else's finalizer keeps the object around
            return Ok(Action::await_change());
        } else {
            if self.terminal_unchanged(&resource, Status::Failure) {
                debug!("{} is Failure at this generation, waiting for a spec change", name);
                return Ok(Action::await_change());
            }
            self.ensure(&mut resource, handler).await
        };

        let result = self.classify(&mut resource, result, deleting);
        let persisted = self.persist(&mut resource, &original).await;

        match (result, persisted) {
            (Err(e), Err(patch_err)) => {
                warn!("Failed to persist status of {}: {}", name, patch_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(patch_err)) => Err(patch_err),
            (Ok(action), Ok(())) => Ok(action),
        }
    }

    /// Terminal statuses stay put until the generation moves
    fn terminal_unchanged(&self, resource: &K, terminal: Status) -> bool {
        resource.resource_status().is_some_and(|s| {
            s.status == terminal && s.observed_generation == resource.meta().generation
        })
    }

    async fn ensure(&self, resource: &mut K, handler: &dyn ResourceHandler<K>) -> Result<Action> {
        let pipeline = Pipeline::new()
            .step(EnsureFinalizer {
                store: self.store,
                finalizer: self.config.finalizer,
            })
            .step(EnsurePending)
            .steps(handler.ensure_steps());

        let outcome = pipeline.run(resource).await?;
        match outcome.to_action() {
            Some(action) => Ok(action),
            None => {
                resource.resource_status_mut().set(Status::Success, "");
                Ok(Action::requeue(self.config.resync_interval))
            }
        }
    }

    async fn delete(&self, resource: &mut K, handler: &dyn ResourceHandler<K>) -> Result<Action> {
        let current = resource.current_status();
        if !matches!(current, Status::Deleting | Status::DeleteFailed | Status::Error) {
            info!("Deleting {} {}", K::kind(&()), resource.name_any());
            resource.resource_status_mut().set(Status::Deleting, "");
            return Ok(Action::requeue(REQUEUE_NOW));
        }

        if let Some(reason) = handler.dependency_violation(resource).await? {
            info!("Deletion of {} blocked: {}", resource.name_any(), reason);
            resource.resource_status_mut().set(Status::Deleting, reason);
            return Ok(Action::requeue(self.config.dependency_requeue));
        }

        resource.resource_status_mut().set(Status::Deleting, "");
        let outcome = handler.teardown(resource).await?;
        match outcome.to_action() {
            Some(action) => Ok(action),
            None => {
                info!("Teardown of {} complete", resource.name_any());
                resource.resource_status_mut().set(Status::Deleted, "");
                Ok(Action::requeue(REQUEUE_NOW))
            }
        }
    }

    fn classify(&self, resource: &mut K, result: Result<Action>, deleting: bool) -> Result<Action> {
        let labels = ReconcileLabels::new(
            &K::kind(&()),
            &resource.namespace().unwrap_or_default(),
            &resource.name_any(),
        );

        match result {
            Ok(action) => Ok(action),
            Err(e) if e.is_critical() => {
                let terminal = if deleting {
                    Status::DeleteFailed
                } else {
                    Status::Failure
                };
                error!("{} {} failed terminally: {}", K::kind(&()), resource.name_any(), e);
                if let Some(metrics) = self.metrics {
                    metrics.record_critical(&labels);
                }
                resource.resource_status_mut().set(terminal, e.to_string());
                Ok(Action::await_change())
            }
            Err(e) => {
                warn!("{} {} failed, will retry: {}", K::kind(&()), resource.name_any(), e);
                if let Some(metrics) = self.metrics {
                    metrics.record_error(&labels);
                }
                resource.resource_status_mut().set(Status::Error, e.to_string());
                Err(e)
            }
        }
    }

    async fn persist(&self, resource: &mut K, original: &ResourceStatus) -> Result<()> {
        let namespace = resource.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let name = resource.name_any();
        let generation = resource.meta().generation;

        let status = resource.resource_status_mut();
        status.observed_generation = generation;
        if status.status != original.status {
            status.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
        }
        if *status == *original {
            return Ok(());
        }

        match self.store.patch_status(&namespace, &name, status).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("{} vanished before its status could be patched", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

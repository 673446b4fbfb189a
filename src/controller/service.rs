//! Service controller
//!
//! Resolves the `ServiceProvider` named by the Service and hands the
//! instance lifecycle to it.

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::controller::engine::ResourceHandler;
use crate::controller::error::{Error, Result};
use crate::controller::pipeline::{EnsureStep, StepOutcome};
use crate::crd::{ManagedResource, Service, ServiceCredentials};
use crate::provider::{ProviderRegistry, ServiceProvider};
use crate::store::ResourceStore;

pub const SERVICE_FINALIZER: &str = "multicloud.io/service-finalizer";

/// Look up a registered provider; a missing provider is transient since its
/// ServiceProvider may not have been reconciled yet
pub fn resolve_provider(
    registry: &ProviderRegistry,
    namespace: &str,
    name: &str,
) -> Result<Arc<dyn ServiceProvider>> {
    registry
        .get(namespace, name)
        .ok_or_else(|| Error::NotReady(format!("service provider {name} is not registered")))
}

pub struct ServiceHandler<'a> {
    registry: &'a ProviderRegistry,
    credentials: &'a dyn ResourceStore<ServiceCredentials>,
}

impl<'a> ServiceHandler<'a> {
    pub fn new(
        registry: &'a ProviderRegistry,
        credentials: &'a dyn ResourceStore<ServiceCredentials>,
    ) -> Self {
        Self {
            registry,
            credentials,
        }
    }
}

struct ReconcileInstance<'a> {
    registry: &'a ProviderRegistry,
}

#[async_trait]
impl EnsureStep<Service> for ReconcileInstance<'_> {
    fn name(&self) -> &'static str {
        "reconcile-instance"
    }

    async fn attempt(&self, service: &mut Service) -> Result<StepOutcome> {
        let ns = service.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let provider = resolve_provider(self.registry, &ns, &service.spec.provider)?;
        debug!(provider = provider.kind(), "Reconciling service instance");
        provider.reconcile(service).await
    }
}

#[async_trait]
impl ResourceHandler<Service> for ServiceHandler<'_> {
    fn ensure_steps(&self) -> Vec<Box<dyn EnsureStep<Service> + '_>> {
        vec![Box::new(ReconcileInstance {
            registry: self.registry,
        })]
    }

    async fn dependency_violation(&self, service: &Service) -> Result<Option<String>> {
        let ns = service.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let name = service.name_any();
        let mut users: Vec<String> = self
            .credentials
            .list(&ns, None)
            .await?
            .into_iter()
            .filter(|c| c.spec.service == name)
            .map(|c| c.name_any())
            .collect();
        if users.is_empty() {
            return Ok(None);
        }
        users.sort();
        Ok(Some(format!(
            "service is still bound by service credentials: {}",
            users.join(", ")
        )))
    }

    async fn teardown(&self, service: &mut Service) -> Result<StepOutcome> {
        let ns = service.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        match self.registry.get(&ns, &service.spec.provider) {
            Some(provider) => provider.delete(service).await,
            None if service.resource_status().and_then(|s| s.provider_id.as_ref()).is_none() => {
                // Never reached the provider, nothing to clean up
                Ok(StepOutcome::Continue)
            }
            None => {
                warn!(
                    "Service provider {} is not registered, cannot deprovision {}",
                    service.spec.provider,
                    service.name_any()
                );
                Err(Error::NotReady(format!(
                    "service provider {} is not registered",
                    service.spec.provider
                )))
            }
        }
    }
}

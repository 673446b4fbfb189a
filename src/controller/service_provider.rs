//! ServiceProvider controller
//!
//! Builds a provider from the resource's configuration and makes it
//! available to the Service and ServiceCredentials controllers through the
//! registry.

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use tracing::info;

use crate::controller::engine::ResourceHandler;
use crate::controller::error::{Error, Result};
use crate::controller::pipeline::{EnsureStep, StepOutcome};
use crate::crd::{Component, ManagedResource, Service, ServiceProvider, Status};
use crate::provider::{ProviderFactories, ProviderRegistry};
use crate::store::ResourceStore;

pub const SERVICE_PROVIDER_FINALIZER: &str = "multicloud.io/serviceprovider-finalizer";

/// Component reporting the registration of the provider
pub const REGISTRATION_COMPONENT: &str = "Registration";

pub struct ServiceProviderHandler<'a> {
    registry: &'a ProviderRegistry,
    factories: &'a ProviderFactories,
    services: &'a dyn ResourceStore<Service>,
}

impl<'a> ServiceProviderHandler<'a> {
    pub fn new(
        registry: &'a ProviderRegistry,
        factories: &'a ProviderFactories,
        services: &'a dyn ResourceStore<Service>,
    ) -> Self {
        Self {
            registry,
            factories,
            services,
        }
    }
}

struct RegisterProvider<'a> {
    registry: &'a ProviderRegistry,
    factories: &'a ProviderFactories,
}

#[async_trait]
impl EnsureStep<ServiceProvider> for RegisterProvider<'_> {
    fn name(&self) -> &'static str {
        "register-provider"
    }

    async fn attempt(&self, resource: &mut ServiceProvider) -> Result<StepOutcome> {
        let ns = resource.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let name = resource.name_any();

        // Rebuild only when the spec moved or the registry lost the entry
        let generation = resource.meta().generation;
        let current = resource.resource_status().is_some_and(|s| {
            s.observed_generation == generation
                && s.components.status_of(REGISTRATION_COMPONENT) == Status::Success
        });
        if current && self.registry.get(&ns, &name).is_some() {
            return Ok(StepOutcome::Continue);
        }

        let provider = match self
            .factories
            .create(&resource.spec.kind, resource.spec.configuration.as_ref())
        {
            Ok(provider) => provider,
            Err(e) => {
                // A provider built from an earlier spec must not outlive it
                self.registry.unregister(&ns, &name);
                resource.resource_status_mut().components.set_condition(
                    Component::new(REGISTRATION_COMPONENT, Status::Failure)
                        .with_message("Invalid configuration")
                        .with_detail(e.to_string()),
                );
                return Err(e);
            }
        };
        self.registry.register(&ns, &name, provider);

        let message = format!("{} provider registered", resource.spec.kind);
        resource.resource_status_mut().components.set_condition(
            Component::new(REGISTRATION_COMPONENT, Status::Success).with_message(message),
        );
        Ok(StepOutcome::Continue)
    }
}

#[async_trait]
impl ResourceHandler<ServiceProvider> for ServiceProviderHandler<'_> {
    fn ensure_steps(&self) -> Vec<Box<dyn EnsureStep<ServiceProvider> + '_>> {
        vec![Box::new(RegisterProvider {
            registry: self.registry,
            factories: self.factories,
        })]
    }

    async fn dependency_violation(&self, resource: &ServiceProvider) -> Result<Option<String>> {
        let ns = resource.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let name = resource.name_any();
        let mut users: Vec<String> = self
            .services
            .list(&ns, None)
            .await?
            .into_iter()
            .filter(|s| s.spec.provider == name)
            .map(|s| s.name_any())
            .collect();
        if users.is_empty() {
            return Ok(None);
        }
        users.sort();
        Ok(Some(format!(
            "service provider is still used by services: {}",
            users.join(", ")
        )))
    }

    async fn teardown(&self, resource: &mut ServiceProvider) -> Result<StepOutcome> {
        let ns = resource.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        if self.registry.unregister(&ns, &resource.name_any()).is_none() {
            info!("Service provider {} was not registered", resource.name_any());
        }
        resource.resource_status_mut().components.set_condition(
            Component::new(REGISTRATION_COMPONENT, Status::Deleted),
        );
        Ok(StepOutcome::Continue)
    }
}

//! ServiceCredentials controller
//!
//! Binds a ready Service through its provider and keeps the credential
//! payload in a Kubernetes Secret named by the resource.

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::controller::engine::ResourceHandler;
use crate::controller::error::{Error, Result};
use crate::controller::pipeline::{EnsureStep, StepOutcome};
use crate::controller::service::resolve_provider;
use crate::crd::{
    Component, ManagedResource, ResourceReference, Service, ServiceCredentials, Status,
};
use crate::provider::ProviderRegistry;
use crate::store::{ResourceStore, SecretStore};

pub const CREDENTIALS_FINALIZER: &str = "multicloud.io/servicecredentials-finalizer";

/// Component tracking the Secret holding the credentials
pub const SECRET_COMPONENT: &str = "Kubernetes Secret";

fn secret_reference(namespace: &str, name: &str) -> ResourceReference {
    ResourceReference {
        group: String::new(),
        version: "v1".to_string(),
        kind: "Secret".to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

/// Name of the Secret last written for `credentials`, if any
fn written_secret(credentials: &ServiceCredentials) -> Option<String> {
    credentials
        .resource_status()
        .and_then(|s| s.components.get_component(SECRET_COMPONENT))
        .and_then(|c| c.resource.as_ref())
        .map(|r| r.name.clone())
}

pub struct CredentialsHandler<'a> {
    registry: &'a ProviderRegistry,
    services: &'a dyn ResourceStore<Service>,
    secrets: &'a dyn SecretStore,
}

impl<'a> CredentialsHandler<'a> {
    pub fn new(
        registry: &'a ProviderRegistry,
        services: &'a dyn ResourceStore<Service>,
        secrets: &'a dyn SecretStore,
    ) -> Self {
        Self {
            registry,
            services,
            secrets,
        }
    }
}

struct BindService<'a> {
    registry: &'a ProviderRegistry,
    services: &'a dyn ResourceStore<Service>,
    secrets: &'a dyn SecretStore,
}

#[async_trait]
impl EnsureStep<ServiceCredentials> for BindService<'_> {
    fn name(&self) -> &'static str {
        "bind-service"
    }

    async fn attempt(&self, credentials: &mut ServiceCredentials) -> Result<StepOutcome> {
        let ns = credentials
            .namespace()
            .ok_or(Error::MissingObjectKey("namespace"))?;
        let service_name = credentials.spec.service.clone();

        let service = self
            .services
            .get(&ns, &service_name)
            .await?
            .ok_or_else(|| Error::NotReady(format!("service {service_name} does not exist")))?;
        if service.current_status() != Status::Success {
            return Err(Error::NotReady(format!("service {service_name} is not ready")));
        }
        let provider = resolve_provider(self.registry, &ns, &service.spec.provider)?;

        let secret_name = credentials.secret_name();
        let previous = written_secret(credentials);
        let payload_required = previous.as_deref() != Some(secret_name.as_str())
            || credentials
                .resource_status()
                .map(|s| s.components.status_of(SECRET_COMPONENT))
                .unwrap_or_default()
                != Status::Success;

        let result = provider
            .reconcile_credentials(&service, credentials, payload_required)
            .await?;

        if let Some(payload) = result.credentials {
            self.secrets.apply_credentials(credentials, &payload).await?;
            info!("Wrote credentials to secret {}", secret_name);
            if let Some(old) = previous.filter(|old| *old != secret_name) {
                self.secrets.delete_secret(&ns, &old).await?;
            }
            credentials.resource_status_mut().components.set_condition(
                Component::new(SECRET_COMPONENT, Status::Success)
                    .with_resource(secret_reference(&ns, &secret_name)),
            );
        } else if payload_required && result.outcome.is_continue() {
            warn!("Binding for {} returned no credentials", credentials.name_any());
            credentials.resource_status_mut().components.set_condition(
                Component::new(SECRET_COMPONENT, Status::Pending)
                    .with_message("Waiting for credentials")
                    .with_resource(secret_reference(&ns, &secret_name)),
            );
            return Err(Error::NotReady(format!(
                "provider returned no credentials for {}",
                credentials.name_any()
            )));
        }

        Ok(result.outcome)
    }
}

#[async_trait]
impl ResourceHandler<ServiceCredentials> for CredentialsHandler<'_> {
    fn ensure_steps(&self) -> Vec<Box<dyn EnsureStep<ServiceCredentials> + '_>> {
        vec![Box::new(BindService {
            registry: self.registry,
            services: self.services,
            secrets: self.secrets,
        })]
    }

    async fn teardown(&self, credentials: &mut ServiceCredentials) -> Result<StepOutcome> {
        let ns = credentials
            .namespace()
            .ok_or(Error::MissingObjectKey("namespace"))?;

        let secret_name = credentials.secret_name();
        self.secrets.delete_secret(&ns, &secret_name).await?;
        if let Some(old) = written_secret(credentials).filter(|old| *old != secret_name) {
            self.secrets.delete_secret(&ns, &old).await?;
        }
        credentials.resource_status_mut().components.set_condition(
            Component::new(SECRET_COMPONENT, Status::Deleted)
                .with_resource(secret_reference(&ns, &secret_name)),
        );

        let Some(service) = self.services.get(&ns, &credentials.spec.service).await? else {
            // The instance went with its Service, and the binding with it
            warn!(
                "Service {} no longer exists, skipping unbind of {}",
                credentials.spec.service,
                credentials.name_any()
            );
            return Ok(StepOutcome::Continue);
        };

        match self.registry.get(&ns, &service.spec.provider) {
            Some(provider) => provider.delete_credentials(&service, credentials).await,
            None if credentials
                .resource_status()
                .and_then(|s| s.provider_id.as_ref())
                .is_none() =>
            {
                Ok(StepOutcome::Continue)
            }
            None => Err(Error::NotReady(format!(
                "service provider {} is not registered",
                service.spec.provider
            ))),
        }
    }
}

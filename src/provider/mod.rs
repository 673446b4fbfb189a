//! Service providers
//!
//! A [`ServiceProvider`] fulfils `Service` and `ServiceCredentials`
//! resources. Providers are built by a [`ProviderFactory`] from the
//! configuration of a `ServiceProvider` resource and looked up through the
//! [`ProviderRegistry`] by the controllers.

pub mod osb;
pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::BindingResult;
use crate::controller::error::{Error, Result};
use crate::controller::pipeline::StepOutcome;
use crate::crd::{Service, ServiceCredentials};

pub use osb::{OsbConfig, OsbProvider, OsbProviderFactory};
pub use registry::ProviderRegistry;

#[cfg(test)]
use mockall::automock;

/// Capabilities of a provider backend
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Provider kind, matching `ServiceProvider.spec.kind`
    fn kind(&self) -> &'static str;

    /// Drive the service instance towards its spec
    async fn reconcile(&self, service: &mut Service) -> Result<StepOutcome>;

    /// Remove the service instance; `Continue` once it is gone
    async fn delete(&self, service: &mut Service) -> Result<StepOutcome>;

    /// Bind the service. Credentials are returned when they were obtained in
    /// this pass, or when `payload_required` is set for an existing binding.
    async fn reconcile_credentials(
        &self,
        service: &Service,
        credentials: &mut ServiceCredentials,
        payload_required: bool,
    ) -> Result<BindingResult>;

    /// Remove the binding; `Continue` once it is gone
    async fn delete_credentials(
        &self,
        service: &Service,
        credentials: &mut ServiceCredentials,
    ) -> Result<StepOutcome>;
}

/// Builds providers of one kind from resource configuration
pub trait ProviderFactory: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Validate the configuration and build a provider.
    ///
    /// Invalid configuration is reported as [`Error::InvalidConfig`].
    fn create(&self, configuration: Option<&serde_json::Value>) -> Result<Arc<dyn ServiceProvider>>;
}

/// Settings shared by every provider built at runtime
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

/// Factories by provider kind, assembled at start-up
#[derive(Clone, Default)]
pub struct ProviderFactories {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factories for every built-in provider kind
    pub fn builtin(settings: ProviderSettings) -> Self {
        Self::new().with(OsbProviderFactory::new(settings))
    }

    pub fn with(mut self, factory: impl ProviderFactory + 'static) -> Self {
        self.factories
            .insert(factory.kind().to_string(), Arc::new(factory));
        self
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build a provider of `kind`; an unknown kind is invalid configuration
    pub fn create(
        &self,
        kind: &str,
        configuration: Option<&serde_json::Value>,
    ) -> Result<Arc<dyn ServiceProvider>> {
        let factory = self.factories.get(kind).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "unknown provider kind '{}', expected one of: {}",
                kind,
                self.kinds().join(", ")
            ))
        })?;
        factory.create(configuration)
    }
}

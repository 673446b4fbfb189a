//! Open Service Broker provider
//!
//! Maps `Service` and `ServiceCredentials` onto broker instances and
//! bindings. Service kinds and plan names are translated to the broker's
//! catalog ids through the provider configuration.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ProviderFactory, ProviderSettings, ServiceProvider};
use crate::broker::state_machine::components::{BIND, PROVISION};
use crate::broker::{
    BindingResult, BindingSpec, BrokerClient, BrokerStateMachine, HttpBrokerClient,
    HttpBrokerConfig, InstanceSpec,
};
use crate::controller::error::{Error, Result};
use crate::controller::pipeline::StepOutcome;
use crate::crd::{ManagedResource, ResourceStatus, Service, ServiceCredentials, Status};

pub const KIND: &str = "osb";

const DEFAULT_API_VERSION: &str = "2.14";

/// Typed configuration of an OSB `ServiceProvider`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OsbConfig {
    /// Base URL of the broker
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Catalog entries by service kind
    #[serde(default)]
    pub services: BTreeMap<String, OsbServiceConfig>,

    /// Plan used when a Service does not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_plan: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OsbServiceConfig {
    pub service_id: String,

    /// Plan ids by plan name
    #[serde(default)]
    pub plans: BTreeMap<String, String>,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

impl OsbConfig {
    /// Decode and validate provider configuration
    pub fn parse(configuration: Option<&serde_json::Value>) -> Result<Self> {
        let value = configuration
            .ok_or_else(|| Error::InvalidConfig("osb provider requires a configuration".to_string()))?;
        let config: OsbConfig = serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidConfig(format!("malformed osb configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "broker url '{}' must start with http:// or https://",
                self.url
            )));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(Error::InvalidConfig(
                "broker password given without a username".to_string(),
            ));
        }
        if self.services.is_empty() {
            return Err(Error::InvalidConfig(
                "osb configuration must map at least one service kind".to_string(),
            ));
        }
        for (kind, service) in &self.services {
            if service.service_id.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "service kind '{kind}' has an empty serviceId"
                )));
            }
            if service.plans.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "service kind '{kind}' has no plans"
                )));
            }
        }
        Ok(())
    }

    /// Broker ids for a service kind and plan name
    pub fn resolve(&self, kind: &str, plan: &str) -> Result<(String, String)> {
        let service = self.services.get(kind).ok_or_else(|| {
            Error::InvalidConfig(format!("service kind '{kind}' is not offered by this provider"))
        })?;

        let plan = if plan.is_empty() {
            self.default_plan.as_deref().ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "no plan given for service kind '{kind}' and no default plan configured"
                ))
            })?
        } else {
            plan
        };

        let plan_id = service.plans.get(plan).ok_or_else(|| {
            Error::InvalidConfig(format!("plan '{plan}' is not offered for service kind '{kind}'"))
        })?;
        Ok((service.service_id.clone(), plan_id.clone()))
    }
}

/// Whether the broker was never asked to create anything for this resource
fn never_requested(status: Option<&ResourceStatus>, component: &str) -> bool {
    status.is_none_or(|s| {
        s.provider_id.is_none() || s.components.status_of(component) == Status::Unknown
    })
}

pub struct OsbProvider {
    config: OsbConfig,
    client: Arc<dyn BrokerClient>,
    poll_interval: Duration,
}

impl OsbProvider {
    pub fn new(config: OsbConfig, client: Arc<dyn BrokerClient>, poll_interval: Duration) -> Self {
        Self {
            config,
            client,
            poll_interval,
        }
    }

    fn state_machine(&self) -> BrokerStateMachine<'_> {
        BrokerStateMachine::new(self.client.as_ref(), self.poll_interval)
    }

    fn instance_spec(&self, service: &Service) -> Result<InstanceSpec> {
        let (service_id, plan_id) = self.config.resolve(&service.spec.kind, &service.spec.plan)?;
        Ok(InstanceSpec {
            service_id,
            plan_id,
            parameters: service.spec.configuration.clone(),
        })
    }

    fn binding_spec(&self, service: &Service, credentials: &ServiceCredentials) -> Result<BindingSpec> {
        let instance = self.instance_spec(service)?;
        let instance_id = service
            .resource_status()
            .and_then(|s| s.provider_id.clone())
            .ok_or_else(|| {
                Error::NotReady(format!("service {} has no instance id yet", service.name_any()))
            })?;
        Ok(BindingSpec {
            instance_id,
            service_id: instance.service_id,
            plan_id: instance.plan_id,
            parameters: credentials.spec.configuration.clone(),
        })
    }
}

#[async_trait]
impl ServiceProvider for OsbProvider {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn reconcile(&self, service: &mut Service) -> Result<StepOutcome> {
        let spec = self.instance_spec(service)?;
        self.state_machine()
            .reconcile_instance(service.resource_status_mut(), &spec)
            .await
    }

    async fn delete(&self, service: &mut Service) -> Result<StepOutcome> {
        // Catalog ids are not resolved for an instance that never existed
        if never_requested(service.resource_status(), PROVISION) {
            debug!(service = %service.name_any(), "instance never provisioned, nothing to remove");
            return Ok(StepOutcome::Continue);
        }
        let spec = self.instance_spec(service)?;
        self.state_machine()
            .delete_instance(service.resource_status_mut(), &spec)
            .await
    }

    async fn reconcile_credentials(
        &self,
        service: &Service,
        credentials: &mut ServiceCredentials,
        payload_required: bool,
    ) -> Result<BindingResult> {
        let spec = self.binding_spec(service, credentials)?;
        self.state_machine()
            .reconcile_binding(credentials.resource_status_mut(), &spec, payload_required)
            .await
    }

    async fn delete_credentials(
        &self,
        service: &Service,
        credentials: &mut ServiceCredentials,
    ) -> Result<StepOutcome> {
        // Without an instance there can be no binding
        if service.resource_status().and_then(|s| s.provider_id.as_ref()).is_none()
            || never_requested(credentials.resource_status(), BIND)
        {
            return Ok(StepOutcome::Continue);
        }
        let spec = self.binding_spec(service, credentials)?;
        self.state_machine()
            .delete_binding(credentials.resource_status_mut(), &spec)
            .await
    }
}

/// Builds [`OsbProvider`]s backed by the HTTP broker client
pub struct OsbProviderFactory {
    settings: ProviderSettings,
}

impl OsbProviderFactory {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

impl ProviderFactory for OsbProviderFactory {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn create(&self, configuration: Option<&serde_json::Value>) -> Result<Arc<dyn ServiceProvider>> {
        let config = OsbConfig::parse(configuration)?;
        let client = HttpBrokerClient::new(HttpBrokerConfig {
            url: config.url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            api_version: config.api_version.clone(),
            timeout: self.settings.request_timeout,
        })
        .map_err(|e| Error::InvalidConfig(format!("cannot build broker client: {e}")))?;

        Ok(Arc::new(OsbProvider::new(
            config,
            Arc::new(client),
            self.settings.poll_interval,
        )))
    }
}

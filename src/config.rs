//! Operator configuration from the environment

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::controller::engine::EngineConfig;
use crate::provider::ProviderSettings;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings of the operator process
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Leader election identity
    pub pod_name: Option<String>,
    /// Namespace holding the leader election lease
    pub pod_namespace: String,
    /// Restrict every controller to one namespace
    pub watch_namespace: Option<String>,
    pub health_addr: SocketAddr,
    /// Delay between polls of an asynchronous broker operation
    pub broker_poll_interval: Duration,
    /// Delay between checks while dependents block a deletion
    pub dependency_requeue: Duration,
    /// Delay between checks of a dependent resource's progress
    pub dependent_poll_interval: Duration,
    /// Delay before a successfully reconciled resource is checked again
    pub resync_interval: Duration,
    pub broker_request_timeout: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            pod_name: None,
            pod_namespace: "default".to_string(),
            watch_namespace: None,
            health_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            broker_poll_interval: Duration::from_secs(5),
            dependency_requeue: Duration::from_secs(30),
            dependent_poll_interval: Duration::from_secs(10),
            resync_interval: Duration::from_secs(300),
            broker_request_timeout: Duration::from_secs(30),
        }
    }
}

impl OperatorConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`; unset or empty values keep
    /// their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let secs = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match get(name) {
                None => Ok(default),
                Some(value) => match value.trim().parse::<u64>() {
                    Ok(0) => Err(ConfigError::Invalid {
                        name,
                        value,
                        reason: "must be greater than zero".to_string(),
                    }),
                    Ok(n) => Ok(Duration::from_secs(n)),
                    Err(e) => Err(ConfigError::Invalid {
                        name,
                        value,
                        reason: e.to_string(),
                    }),
                },
            }
        };

        let health_addr = match get("HEALTH_ADDR") {
            None => defaults.health_addr,
            Some(value) => value.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                name: "HEALTH_ADDR",
                value: value.clone(),
                reason: e.to_string(),
            })?,
        };

        Ok(Self {
            pod_name: get("POD_NAME"),
            pod_namespace: get("POD_NAMESPACE").unwrap_or(defaults.pod_namespace),
            watch_namespace: get("WATCH_NAMESPACE"),
            health_addr,
            broker_poll_interval: secs("BROKER_POLL_INTERVAL_SECS", defaults.broker_poll_interval)?,
            dependency_requeue: secs("DEPENDENCY_REQUEUE_SECS", defaults.dependency_requeue)?,
            dependent_poll_interval: secs(
                "DEPENDENT_POLL_INTERVAL_SECS",
                defaults.dependent_poll_interval,
            )?,
            resync_interval: secs("RESYNC_INTERVAL_SECS", defaults.resync_interval)?,
            broker_request_timeout: secs(
                "BROKER_REQUEST_TIMEOUT_SECS",
                defaults.broker_request_timeout,
            )?,
        })
    }

    /// Engine settings for a controller using `finalizer`
    pub fn engine(&self, finalizer: &'static str) -> EngineConfig {
        EngineConfig {
            finalizer,
            dependency_requeue: self.dependency_requeue,
            resync_interval: self.resync_interval,
        }
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            poll_interval: self.broker_poll_interval,
            request_timeout: self.broker_request_timeout,
        }
    }
}

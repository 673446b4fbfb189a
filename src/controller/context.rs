use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use kube::Client;

use crate::config::OperatorConfig;
use crate::health::HealthState;
use crate::provider::{ProviderFactories, ProviderRegistry};

/// Shared context for the controllers
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Providers built from ServiceProvider resources
    pub registry: Arc<ProviderRegistry>,
    /// Factories for every known provider kind
    pub factories: ProviderFactories,
    pub config: OperatorConfig,
    /// Health state for reconciliation timestamps and metrics
    pub health_state: Option<Arc<HealthState>>,
    retries: Arc<RetryCounter>,
}

impl Context {
    pub fn new(
        client: Client,
        registry: Arc<ProviderRegistry>,
        factories: ProviderFactories,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            client,
            registry,
            factories,
            config,
            health_state,
            retries: Arc::new(RetryCounter::default()),
        }
    }

    pub fn retries(&self) -> &RetryCounter {
        &self.retries
    }
}

/// Consecutive failed passes per object, reset once a pass succeeds
#[derive(Debug, Default)]
pub struct RetryCounter {
    counts: Mutex<HashMap<String, u32>>,
}

impl RetryCounter {
    /// Record a failure and return the number of failures before it
    pub fn next_attempt(&self, key: &str) -> u32 {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(key.to_string()).or_default();
        let attempt = *count;
        *count = count.saturating_add(1);
        attempt
    }

    pub fn reset(&self, key: &str) {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    pub fn get(&self, key: &str) -> u32 {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or_default()
    }
}

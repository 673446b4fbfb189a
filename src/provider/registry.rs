use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use super::ServiceProvider;

/// Providers registered by the ServiceProvider controller, keyed by the
/// namespace and name of their `ServiceProvider` resource
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn ServiceProvider>>>,
}

fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a provider
    pub fn register(&self, namespace: &str, name: &str, provider: Arc<dyn ServiceProvider>) {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        if providers.insert(key(namespace, name), provider).is_none() {
            info!("Registered service provider {}/{}", namespace, name);
        }
    }

    pub fn unregister(&self, namespace: &str, name: &str) -> Option<Arc<dyn ServiceProvider>> {
        let removed = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key(namespace, name));
        if removed.is_some() {
            info!("Unregistered service provider {}/{}", namespace, name);
        }
        removed
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<dyn ServiceProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Finalizer protocol
//!
//! The finalizer is added before any external side effect and removed only
//! once teardown has been confirmed, so a resource cannot disappear while it
//! still owns something outside the store.

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use tracing::info;

use crate::controller::error::{Error, Result};
use crate::controller::pipeline::{EnsureStep, StepOutcome};
use crate::crd::ManagedResource;
use crate::store::ResourceStore;

/// Check if the finalizer is present
pub fn has_finalizer<K: Resource>(resource: &K, finalizer: &str) -> bool {
    resource.finalizers().iter().any(|f| f == finalizer)
}

/// A resource is a deletion candidate when deletion was requested and it
/// still carries the finalizer
pub fn is_deletion_candidate<K: Resource>(resource: &K, finalizer: &str) -> bool {
    resource.meta().deletion_timestamp.is_some() && has_finalizer(resource, finalizer)
}

/// Add the finalizer to the resource, keeping any other finalizers
pub async fn add_finalizer<K: ManagedResource>(
    store: &dyn ResourceStore<K>,
    resource: &mut K,
    finalizer: &str,
) -> Result<()> {
    if has_finalizer(resource, finalizer) {
        return Ok(());
    }
    let ns = resource.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
    let name = resource.name_any();

    let mut finalizers = resource.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    store.set_finalizers(&ns, &name, finalizers.clone()).await?;
    resource.meta_mut().finalizers = Some(finalizers);

    info!("Added finalizer to {}", name);
    Ok(())
}

/// Remove the finalizer, allowing the store to complete deletion
pub async fn remove_finalizer<K: ManagedResource>(
    store: &dyn ResourceStore<K>,
    resource: &mut K,
    finalizer: &str,
) -> Result<()> {
    if !has_finalizer(resource, finalizer) {
        return Ok(());
    }
    let ns = resource.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
    let name = resource.name_any();

    let finalizers: Vec<String> = resource
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != finalizer)
        .cloned()
        .collect();
    store.set_finalizers(&ns, &name, finalizers.clone()).await?;
    resource.meta_mut().finalizers = Some(finalizers);

    info!("Removed finalizer from {}", name);
    Ok(())
}

/// First step of every pipeline
pub struct EnsureFinalizer<'a, K: ManagedResource> {
    pub store: &'a dyn ResourceStore<K>,
    pub finalizer: &'a str,
}

#[async_trait]
impl<K: ManagedResource> EnsureStep<K> for EnsureFinalizer<'_, K> {
    fn name(&self) -> &'static str {
        "ensure-finalizer"
    }

    async fn attempt(&self, resource: &mut K) -> Result<StepOutcome> {
        add_finalizer(self.store, resource, self.finalizer).await?;
        Ok(StepOutcome::Continue)
    }
}

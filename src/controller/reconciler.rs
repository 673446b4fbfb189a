//! Entry points called by the kube runtime
//!
//! Each function wires the Kubernetes-backed stores into the kind's handler
//! and runs one engine pass. [`error_policy`] turns errors returned by a pass
//! into a backoff delay.

use std::sync::Arc;
use std::time::Instant;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use crate::controller::cluster::{CLUSTER_FINALIZER, ClusterHandler};
use crate::controller::context::Context;
use crate::controller::credentials::{CREDENTIALS_FINALIZER, CredentialsHandler};
use crate::controller::engine::{Engine, ResourceHandler};
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::feature::{FEATURE_FINALIZER, FeatureHandler};
use crate::controller::service::{SERVICE_FINALIZER, ServiceHandler};
use crate::controller::service_provider::{SERVICE_PROVIDER_FINALIZER, ServiceProviderHandler};
use crate::crd::{Cluster, Feature, ManagedResource, Service, ServiceCredentials, ServiceProvider};
use crate::health::ReconcileLabels;
use crate::store::{KubeSecretStore, KubeStore, ResourceStore};

fn retry_key<K: ManagedResource>(resource: &K) -> String {
    format!(
        "{}/{}/{}",
        K::kind(&()),
        resource.namespace().unwrap_or_default(),
        resource.name_any()
    )
}

/// Run one engine pass and record its metrics
async fn run<K: ManagedResource>(
    resource: &K,
    ctx: &Context,
    store: &dyn ResourceStore<K>,
    finalizer: &'static str,
    handler: &dyn ResourceHandler<K>,
) -> Result<Action> {
    let ns = resource.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
    let name = resource.name_any();
    let start = Instant::now();

    info!("Reconciling {}", K::kind(&()));

    let config = ctx.config.engine(finalizer);
    let mut engine = Engine::new(store, &config);
    if let Some(state) = &ctx.health_state {
        engine = engine.with_metrics(&state.metrics);
    }
    let result = engine.reconcile(&ns, &name, handler).await;

    if let Some(state) = &ctx.health_state {
        let labels = ReconcileLabels::new(&K::kind(&()), &ns, &name);
        state
            .metrics
            .record_reconcile(&labels, start.elapsed().as_secs_f64());
        state.touch();
    }
    if result.is_ok() {
        ctx.retries().reset(&retry_key(resource));
    }
    result
}

#[instrument(skip(resource, ctx), fields(kind = "ServiceProvider", name = %resource.name_any(), namespace = resource.namespace().unwrap_or_default()))]
pub async fn reconcile_service_provider(
    resource: Arc<ServiceProvider>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let store = KubeStore::<ServiceProvider>::new(ctx.client.clone());
    let services = KubeStore::<Service>::new(ctx.client.clone());
    let handler = ServiceProviderHandler::new(&ctx.registry, &ctx.factories, &services);
    run(&*resource, &ctx, &store, SERVICE_PROVIDER_FINALIZER, &handler).await
}

#[instrument(skip(resource, ctx), fields(kind = "Service", name = %resource.name_any(), namespace = resource.namespace().unwrap_or_default()))]
pub async fn reconcile_service(resource: Arc<Service>, ctx: Arc<Context>) -> Result<Action> {
    let store = KubeStore::<Service>::new(ctx.client.clone());
    let credentials = KubeStore::<ServiceCredentials>::new(ctx.client.clone());
    let handler = ServiceHandler::new(&ctx.registry, &credentials);
    run(&*resource, &ctx, &store, SERVICE_FINALIZER, &handler).await
}

#[instrument(skip(resource, ctx), fields(kind = "ServiceCredentials", name = %resource.name_any(), namespace = resource.namespace().unwrap_or_default()))]
pub async fn reconcile_credentials(
    resource: Arc<ServiceCredentials>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let store = KubeStore::<ServiceCredentials>::new(ctx.client.clone());
    let services = KubeStore::<Service>::new(ctx.client.clone());
    let secrets = KubeSecretStore::new(ctx.client.clone());
    let handler = CredentialsHandler::new(&ctx.registry, &services, &secrets);
    run(&*resource, &ctx, &store, CREDENTIALS_FINALIZER, &handler).await
}

#[instrument(skip(resource, ctx), fields(kind = "Cluster", name = %resource.name_any(), namespace = resource.namespace().unwrap_or_default()))]
pub async fn reconcile_cluster(resource: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action> {
    let store = KubeStore::<Cluster>::new(ctx.client.clone());
    let services = KubeStore::<Service>::new(ctx.client.clone());
    let features = KubeStore::<Feature>::new(ctx.client.clone());
    let handler = ClusterHandler::new(&services, &features, ctx.config.dependent_poll_interval);
    run(&*resource, &ctx, &store, CLUSTER_FINALIZER, &handler).await
}

#[instrument(skip(resource, ctx), fields(kind = "Feature", name = %resource.name_any(), namespace = resource.namespace().unwrap_or_default()))]
pub async fn reconcile_feature(resource: Arc<Feature>, ctx: Arc<Context>) -> Result<Action> {
    let store = KubeStore::<Feature>::new(ctx.client.clone());
    let clusters = KubeStore::<Cluster>::new(ctx.client.clone());
    let services = KubeStore::<Service>::new(ctx.client.clone());
    let handler = FeatureHandler::new(&clusters, &services, ctx.config.dependent_poll_interval);
    run(&*resource, &ctx, &store, FEATURE_FINALIZER, &handler).await
}

/// Error policy shared by every controller: exponential backoff over the
/// object's consecutive failures
pub fn error_policy<K: ManagedResource>(resource: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = retry_key(&*resource);
    let attempt = ctx.retries().next_attempt(&key);
    let delay = BackoffConfig::default().delay_for_error(error, attempt);

    if error.is_retryable() {
        warn!(
            "Retryable error for {} (attempt {}): {}, requeuing in {:?}",
            key,
            attempt + 1,
            error,
            delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?} for manual intervention",
            key, error, delay
        );
    }

    Action::requeue(delay)
}

pub mod broker;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod provider;
pub mod resources;
pub mod store;

pub use config::{ConfigError, OperatorConfig};
pub use controller::{
    BackoffConfig, Context, Error, Result, error_policy, reconcile_cluster, reconcile_credentials,
    reconcile_feature, reconcile_service, reconcile_service_provider,
};
pub use crd::{Cluster, Feature, Service, ServiceCredentials, ServiceProvider};
pub use health::{HealthState, Metrics};
pub use provider::{ProviderFactories, ProviderRegistry};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::{Action, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{Config as WatcherConfig, Error as WatcherError};
use kube::runtime::Controller;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

type ReconcileResult<K> = std::result::Result<(ObjectRef<K>, Action), ControllerError<Error, WatcherError>>;

/// Log the outcome of a single reconciliation reported by the runtime
fn log_result<K: Resource<DynamicType = ()>>(kind: &str, result: ReconcileResult<K>) {
    match result {
        Ok((obj, _action)) => {
            tracing::debug!("Reconciled {}: {}", kind, obj.name);
        }
        Err(e) => {
            // Watch events for owned objects can outlive their owner
            let is_not_found = matches!(
                &e,
                ControllerError::ReconcilerFailed(err, _) if err.is_not_found()
            );
            if is_not_found {
                tracing::debug!("{} no longer exists (likely deleted): {:?}", kind, e);
            } else {
                tracing::error!("{} reconciliation error: {:?}", kind, e);
            }
        }
    }
}

fn scope(ctx: &Context) -> &str {
    ctx.config.watch_namespace.as_deref().unwrap_or("cluster-wide")
}

/// Run every controller until one of them stops.
///
/// All controllers share `ctx`, so providers registered by the
/// ServiceProvider controller are visible to the Service and
/// ServiceCredentials controllers.
pub async fn run_controllers(ctx: Arc<Context>) {
    if let Some(ref state) = ctx.health_state {
        state.set_ready(true).await;
    }

    tokio::select! {
        _ = run_service_provider_controller(ctx.clone()) => {}
        _ = run_service_controller(ctx.clone()) => {}
        _ = run_credentials_controller(ctx.clone()) => {}
        _ = run_cluster_controller(ctx.clone()) => {}
        _ = run_feature_controller(ctx) => {}
    }

    tracing::error!("Controller stream ended unexpectedly");
}

/// Run the ServiceProvider controller.
///
/// Honors `ctx.config.watch_namespace` to restrict the watch to one
/// namespace.
pub async fn run_service_provider_controller(ctx: Arc<Context>) {
    let namespace = ctx.config.watch_namespace.clone();
    tracing::info!(
        "Starting controller for ServiceProvider resources (scope: {})",
        scope(&ctx)
    );

    let providers: Api<ServiceProvider> = scoped_api(ctx.client.clone(), namespace.as_deref());

    Controller::new(providers, WatcherConfig::default().any_semantic())
        .run(
            reconcile_service_provider,
            error_policy::<ServiceProvider>,
            ctx,
        )
        .for_each(|result| async move { log_result("ServiceProvider", result) })
        .await;
}

/// Run the Service controller.
pub async fn run_service_controller(ctx: Arc<Context>) {
    let namespace = ctx.config.watch_namespace.clone();
    tracing::info!(
        "Starting controller for Service resources (scope: {})",
        scope(&ctx)
    );

    let services: Api<Service> = scoped_api(ctx.client.clone(), namespace.as_deref());

    Controller::new(services, WatcherConfig::default().any_semantic())
        .run(reconcile_service, error_policy::<Service>, ctx)
        .for_each(|result| async move { log_result("Service", result) })
        .await;
}

/// Run the ServiceCredentials controller, which also watches the Secrets it
/// writes.
pub async fn run_credentials_controller(ctx: Arc<Context>) {
    let namespace = ctx.config.watch_namespace.clone();
    tracing::info!(
        "Starting controller for ServiceCredentials resources (scope: {})",
        scope(&ctx)
    );

    let credentials: Api<ServiceCredentials> =
        scoped_api(ctx.client.clone(), namespace.as_deref());
    let secrets: Api<Secret> = scoped_api(ctx.client.clone(), namespace.as_deref());
    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(credentials, watcher_config.clone())
        .owns(secrets, watcher_config)
        .run(reconcile_credentials, error_policy::<ServiceCredentials>, ctx)
        .for_each(|result| async move { log_result("ServiceCredentials", result) })
        .await;
}

/// Run the Cluster controller, which also watches its admin Services.
pub async fn run_cluster_controller(ctx: Arc<Context>) {
    let namespace = ctx.config.watch_namespace.clone();
    tracing::info!(
        "Starting controller for Cluster resources (scope: {})",
        scope(&ctx)
    );

    let clusters: Api<Cluster> = scoped_api(ctx.client.clone(), namespace.as_deref());
    let services: Api<Service> = scoped_api(ctx.client.clone(), namespace.as_deref());
    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(clusters, watcher_config.clone())
        .owns(services, watcher_config)
        .run(reconcile_cluster, error_policy::<Cluster>, ctx)
        .for_each(|result| async move { log_result("Cluster", result) })
        .await;
}

/// Run the Feature controller, which also watches its admin Services.
pub async fn run_feature_controller(ctx: Arc<Context>) {
    let namespace = ctx.config.watch_namespace.clone();
    tracing::info!(
        "Starting controller for Feature resources (scope: {})",
        scope(&ctx)
    );

    let features: Api<Feature> = scoped_api(ctx.client.clone(), namespace.as_deref());
    let services: Api<Service> = scoped_api(ctx.client.clone(), namespace.as_deref());
    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(features, watcher_config.clone())
        .owns(services, watcher_config)
        .run(reconcile_feature, error_policy::<Feature>, ctx)
        .for_each(|result| async move { log_result("Feature", result) })
        .await;
}

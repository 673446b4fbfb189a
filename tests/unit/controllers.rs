//! Unit tests for the per-kind controllers, run through the engine against
//! in-memory stores

use std::sync::Arc;
use std::time::Duration;

use kube::{Resource, ResourceExt};
use kube::runtime::controller::Action;
use serde_json::json;

use multicloud_operator::controller::engine::{Engine, EngineConfig, ResourceHandler};
use multicloud_operator::controller::error::Result;
use multicloud_operator::controller::{
    CLUSTER_FINALIZER, CREDENTIALS_FINALIZER, ClusterHandler, CredentialsHandler,
    FEATURE_FINALIZER, FeatureHandler, SECRET_COMPONENT, SERVICE_FINALIZER,
    SERVICE_PROVIDER_FINALIZER, ServiceHandler, ServiceProviderHandler,
};
use multicloud_operator::crd::{
    Cluster, Feature, ManagedResource, Service, ServiceCredentials, ServiceProvider, Status,
};
use multicloud_operator::provider::{OsbConfig, OsbProvider, ProviderFactories, ProviderRegistry};

use crate::common::*;

const NS: &str = "team-a";
const POLL: Duration = Duration::from_secs(10);

/// Every store and collaborator the controllers share
struct World {
    providers: MemoryStore<ServiceProvider>,
    services: MemoryStore<Service>,
    credentials: MemoryStore<ServiceCredentials>,
    clusters: MemoryStore<Cluster>,
    features: MemoryStore<Feature>,
    secrets: MemorySecretStore,
    registry: ProviderRegistry,
    factories: ProviderFactories,
}

fn engine_config(finalizer: &'static str) -> EngineConfig {
    EngineConfig {
        finalizer,
        dependency_requeue: Duration::from_secs(30),
        resync_interval: Duration::from_secs(300),
    }
}

impl World {
    fn new() -> Self {
        Self {
            providers: MemoryStore::new(),
            services: MemoryStore::new(),
            credentials: MemoryStore::new(),
            clusters: MemoryStore::new(),
            features: MemoryStore::new(),
            secrets: MemorySecretStore::new(),
            registry: ProviderRegistry::new(),
            factories: ProviderFactories::new().with(FakeProviderFactory),
        }
    }

    /// Register a recording provider under `name`
    fn provider(&self, name: &str, provider: FakeProvider) -> Arc<FakeProvider> {
        let provider = Arc::new(provider);
        self.registry.register(NS, name, provider.clone());
        provider
    }

    async fn run<K: ManagedResource>(
        store: &MemoryStore<K>,
        finalizer: &'static str,
        name: &str,
        handler: &dyn ResourceHandler<K>,
    ) -> Result<Action> {
        let config = engine_config(finalizer);
        Engine::new(store, &config).reconcile(NS, name, handler).await
    }

    async fn reconcile_provider(&self, name: &str) -> Result<Action> {
        let handler = ServiceProviderHandler::new(&self.registry, &self.factories, &self.services);
        Self::run(&self.providers, SERVICE_PROVIDER_FINALIZER, name, &handler).await
    }

    async fn reconcile_service(&self, name: &str) -> Result<Action> {
        let handler = ServiceHandler::new(&self.registry, &self.credentials);
        Self::run(&self.services, SERVICE_FINALIZER, name, &handler).await
    }

    async fn reconcile_credentials(&self, name: &str) -> Result<Action> {
        let handler = CredentialsHandler::new(&self.registry, &self.services, &self.secrets);
        Self::run(&self.credentials, CREDENTIALS_FINALIZER, name, &handler).await
    }

    async fn reconcile_cluster(&self, name: &str) -> Result<Action> {
        let handler = ClusterHandler::new(&self.services, &self.features, POLL);
        Self::run(&self.clusters, CLUSTER_FINALIZER, name, &handler).await
    }

    async fn reconcile_feature(&self, name: &str) -> Result<Action> {
        let handler = FeatureHandler::new(&self.clusters, &self.services, POLL);
        Self::run(&self.features, FEATURE_FINALIZER, name, &handler).await
    }

    /// Mark every child service ready, as the Service controller would
    fn services_ready(&self) {
        for name in self.services.names() {
            self.services.set_status(NS, &name, Status::Success, "");
        }
    }
}

fn request_deletion<K: ManagedResource>(store: &MemoryStore<K>, name: &str) {
    store.update(NS, name, |o| o.meta_mut().deletion_timestamp = Some(deletion_timestamp()));
}

mod service_provider_tests {
    use super::*;

    #[tokio::test]
    async fn test_registers_provider() {
        let world = World::new();
        world
            .providers
            .insert(test_service_provider("broker", NS, "fake", json!({})));

        world.reconcile_provider("broker").await.unwrap();

        assert!(world.registry.get(NS, "broker").is_some());
        let status = world.providers.status(NS, "broker").unwrap();
        assert_eq!(status.status, Status::Success);
        let registration = status.components.get_component("Registration").unwrap();
        assert_eq!(registration.status, Status::Success);
        assert_eq!(registration.message, "fake provider registered");
    }

    #[tokio::test]
    async fn test_invalid_configuration_fails() {
        let world = World::new();
        world.providers.insert(test_service_provider(
            "broker",
            NS,
            "fake",
            json!({"invalid": true}),
        ));

        let action = world.reconcile_provider("broker").await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(world.registry.is_empty());

        let status = world.providers.status(NS, "broker").unwrap();
        assert_eq!(status.status, Status::Failure);
        assert_eq!(status.components.status_of("Registration"), Status::Failure);
    }

    #[tokio::test]
    async fn test_unknown_kind_fails() {
        let world = World::new();
        world
            .providers
            .insert(test_service_provider("broker", NS, "helm", json!({})));

        world.reconcile_provider("broker").await.unwrap();

        let status = world.providers.status(NS, "broker").unwrap();
        assert_eq!(status.status, Status::Failure);
        assert!(status.message.contains("unknown provider kind"));
    }

    #[tokio::test]
    async fn test_deletion_waits_for_services() {
        let world = World::new();
        world
            .providers
            .insert(test_service_provider("broker", NS, "fake", json!({})));
        world.reconcile_provider("broker").await.unwrap();
        world.services.insert(test_service("db", NS, "broker"));

        request_deletion(&world.providers, "broker");
        world.reconcile_provider("broker").await.unwrap();
        let action = world.reconcile_provider("broker").await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(30)));
        let status = world.providers.status(NS, "broker").unwrap();
        assert_eq!(status.status, Status::Deleting);
        assert!(status.message.contains("db"));
        assert!(world.registry.get(NS, "broker").is_some());

        world.services.remove(NS, "db");
        world.reconcile_provider("broker").await.unwrap();
        assert!(world.registry.get(NS, "broker").is_none());
        assert_eq!(
            world.providers.status(NS, "broker").unwrap().status,
            Status::Deleted
        );

        world.reconcile_provider("broker").await.unwrap();
        assert!(world.providers.object(NS, "broker").is_none());
    }
}

mod service_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_provider_is_transient() {
        let world = World::new();
        world.services.insert(test_service("db", NS, "broker"));

        let err = world.reconcile_service("db").await.unwrap_err();
        assert!(err.is_retryable());

        let status = world.services.status(NS, "db").unwrap();
        assert_eq!(status.status, Status::Error);
        assert!(status.message.contains("not registered"));
    }

    #[tokio::test]
    async fn test_delegates_to_provider() {
        let world = World::new();
        let provider = world.provider("broker", FakeProvider::new());
        world.services.insert(test_service("db", NS, "broker"));

        world.reconcile_service("db").await.unwrap();

        let service = world.services.object(NS, "db").unwrap();
        assert_eq!(service.finalizers(), &[SERVICE_FINALIZER.to_string()]);
        let status = service.resource_status().unwrap();
        assert_eq!(status.status, Status::Success);
        assert_eq!(status.provider_id.as_deref(), Some("instance-db"));
        assert_eq!(provider.calls(), vec!["reconcile:db"]);
    }

    #[tokio::test]
    async fn test_provider_failure_is_terminal() {
        let world = World::new();
        let provider = world.provider("broker", FakeProvider::failing("plan xl does not exist"));
        world.services.insert(test_service("db", NS, "broker"));

        world.reconcile_service("db").await.unwrap();
        world.reconcile_service("db").await.unwrap();

        let status = world.services.status(NS, "db").unwrap();
        assert_eq!(status.status, Status::Failure);
        assert_eq!(status.message, "plan xl does not exist");
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_deletion_waits_for_credentials() {
        let world = World::new();
        let provider = world.provider("broker", FakeProvider::new());
        world.services.insert(test_service("db", NS, "broker"));
        world.credentials.insert(test_credentials("db-creds", NS, "db"));
        world.reconcile_service("db").await.unwrap();

        request_deletion(&world.services, "db");
        world.reconcile_service("db").await.unwrap();
        world.reconcile_service("db").await.unwrap();
        let status = world.services.status(NS, "db").unwrap();
        assert_eq!(status.status, Status::Deleting);
        assert!(status.message.contains("db-creds"));
        assert!(!provider.calls().contains(&"delete:db".to_string()));

        world.credentials.remove(NS, "db-creds");
        world.reconcile_service("db").await.unwrap();
        assert_eq!(provider.calls(), vec!["reconcile:db", "delete:db"]);

        world.reconcile_service("db").await.unwrap();
        assert!(world.services.object(NS, "db").is_none());
    }

    #[tokio::test]
    async fn test_unknown_kind_service_deletes_cleanly() {
        let world = World::new();
        let broker = Arc::new(OfflineBroker::new());
        let config = OsbConfig::parse(Some(&json!({
            "url": "https://broker.example.com",
            "services": {
                "postgresql": { "serviceId": "svc-pg", "plans": { "small": "plan-s" } }
            }
        })))
        .unwrap();
        world.registry.register(
            NS,
            "broker",
            Arc::new(OsbProvider::new(config, broker.clone(), POLL)),
        );
        let mut service = test_service("db", NS, "broker");
        service.spec.kind = "redis".to_string();
        world.services.insert(service);

        world.reconcile_service("db").await.unwrap();
        let status = world.services.status(NS, "db").unwrap();
        assert_eq!(status.status, Status::Failure);
        assert!(status.message.contains("redis"));

        request_deletion(&world.services, "db");
        for _ in 0..3 {
            world.reconcile_service("db").await.unwrap();
            if world.services.status(NS, "db").unwrap().status == Status::Deleted {
                break;
            }
        }
        assert_eq!(world.services.status(NS, "db").unwrap().status, Status::Deleted);

        world.reconcile_service("db").await.unwrap();
        assert!(world.services.object(NS, "db").is_none());
        assert!(broker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unprovisioned_service_deletes_without_provider() {
        let world = World::new();
        world.services.insert(deleting(
            with_status(test_service("db", NS, "gone"), Status::Error),
            &[SERVICE_FINALIZER],
        ));

        world.reconcile_service("db").await.unwrap();
        assert_eq!(world.services.status(NS, "db").unwrap().status, Status::Deleted);
    }
}

mod credentials_tests {
    use super::*;

    fn ready_world() -> (World, Arc<FakeProvider>) {
        let world = World::new();
        let provider = world.provider("broker", FakeProvider::new());
        world.services.insert(with_status(
            test_service("db", NS, "broker"),
            Status::Success,
        ));
        world.credentials.insert(test_credentials("db-creds", NS, "db"));
        (world, provider)
    }

    #[tokio::test]
    async fn test_waits_for_service() {
        let world = World::new();
        world.services.insert(test_service("db", NS, "broker"));
        world.credentials.insert(test_credentials("db-creds", NS, "db"));

        let err = world.reconcile_credentials("db-creds").await.unwrap_err();
        assert!(!err.is_critical());
        assert!(err.to_string().contains("not ready"));
        assert_eq!(world.secrets.len(), 0);
    }

    #[tokio::test]
    async fn test_writes_secret() {
        let (world, provider) = ready_world();

        world.reconcile_credentials("db-creds").await.unwrap();

        let secret = world.secrets.secret(NS, "db-creds").unwrap();
        assert_eq!(secret["username"], "app");

        let status = world.credentials.status(NS, "db-creds").unwrap();
        assert_eq!(status.status, Status::Success);
        let component = status.components.get_component(SECRET_COMPONENT).unwrap();
        assert_eq!(component.status, Status::Success);
        let reference = component.resource.as_ref().unwrap();
        assert_eq!(reference.kind, "Secret");
        assert_eq!(reference.name, "db-creds");

        // An unchanged binding does not ask for the payload again
        let patches = world.credentials.status_patches();
        world.reconcile_credentials("db-creds").await.unwrap();
        assert_eq!(provider.calls(), vec!["bind:db-creds", "bind:db-creds"]);
        assert_eq!(world.credentials.status_patches(), patches);
        assert_eq!(world.secrets.len(), 1);
    }

    #[tokio::test]
    async fn test_renamed_secret_is_rewritten() {
        let (world, _provider) = ready_world();
        world.reconcile_credentials("db-creds").await.unwrap();

        world.credentials.update(NS, "db-creds", |c| {
            c.spec.secret_name = Some("app-db".to_string());
        });
        world.reconcile_credentials("db-creds").await.unwrap();

        assert!(world.secrets.secret(NS, "app-db").is_some());
        assert!(world.secrets.secret(NS, "db-creds").is_none());
    }

    #[tokio::test]
    async fn test_deletion_removes_secret_and_binding() {
        let (world, provider) = ready_world();
        world.reconcile_credentials("db-creds").await.unwrap();

        request_deletion(&world.credentials, "db-creds");
        world.reconcile_credentials("db-creds").await.unwrap();
        world.reconcile_credentials("db-creds").await.unwrap();

        assert_eq!(world.secrets.len(), 0);
        assert_eq!(provider.calls(), vec!["bind:db-creds", "unbind:db-creds"]);
        assert_eq!(
            world.credentials.status(NS, "db-creds").unwrap().status,
            Status::Deleted
        );
    }
}

mod cluster_tests {
    use super::*;

    fn cluster() -> Cluster {
        test_cluster(
            "prod",
            NS,
            vec![admin_service("logging", 2), admin_service("metrics", 1)],
        )
    }

    #[tokio::test]
    async fn test_admin_services_become_ready() {
        let world = World::new();
        world.clusters.insert(cluster());

        let action = world.reconcile_cluster("prod").await.unwrap();
        assert_eq!(action, Action::requeue(POLL));
        assert_eq!(world.clusters.status(NS, "prod").unwrap().status, Status::Pending);

        for _ in 0..3 {
            world.services_ready();
            world.reconcile_cluster("prod").await.unwrap();
        }

        assert_eq!(world.services.created(), vec!["metrics", "logging"]);
        let status = world.clusters.status(NS, "prod").unwrap();
        assert_eq!(status.status, Status::Success);
        assert_eq!(status.components.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_cluster_creates_nothing() {
        let world = World::new();
        let mut invalid = cluster();
        invalid.spec.region = String::new();
        world.clusters.insert(invalid);

        world.reconcile_cluster("prod").await.unwrap();

        assert_eq!(world.clusters.status(NS, "prod").unwrap().status, Status::Failure);
        assert!(world.services.created().is_empty());
    }

    #[tokio::test]
    async fn test_deletion_waits_for_features_then_tears_down() {
        let world = World::new();
        world.clusters.insert(cluster());
        for _ in 0..4 {
            world.services_ready();
            world.reconcile_cluster("prod").await.unwrap();
        }
        world
            .features
            .insert(test_feature("mesh", NS, "prod", vec![]));

        request_deletion(&world.clusters, "prod");
        world.reconcile_cluster("prod").await.unwrap();
        world.reconcile_cluster("prod").await.unwrap();
        let status = world.clusters.status(NS, "prod").unwrap();
        assert_eq!(status.status, Status::Deleting);
        assert!(status.message.contains("features: mesh"));
        assert!(world.services.deleted().is_empty());

        world.features.remove(NS, "mesh");
        let mut passes = 0;
        while world.clusters.status(NS, "prod").unwrap().status != Status::Deleted {
            world.reconcile_cluster("prod").await.unwrap();
            passes += 1;
            assert!(passes < 10);
        }
        assert_eq!(world.services.deleted(), vec!["logging", "metrics"]);
        assert!(world.clusters.status(NS, "prod").unwrap().components.is_empty());

        world.reconcile_cluster("prod").await.unwrap();
        assert!(world.clusters.object(NS, "prod").is_none());
    }

    #[tokio::test]
    async fn test_user_services_block_deletion() {
        let world = World::new();
        world.clusters.insert(deleting(
            with_status(cluster(), Status::Success),
            &[CLUSTER_FINALIZER],
        ));
        let mut app = test_service("app-db", NS, "broker");
        app.spec.cluster = Some("prod".to_string());
        world.services.insert(app);

        world.reconcile_cluster("prod").await.unwrap();
        world.reconcile_cluster("prod").await.unwrap();

        let status = world.clusters.status(NS, "prod").unwrap();
        assert!(status.message.contains("services: app-db"));
    }
}

mod feature_tests {
    use super::*;

    fn feature() -> Feature {
        test_feature("mesh", NS, "prod", vec![admin_service("istio", 0)])
    }

    #[tokio::test]
    async fn test_waits_for_cluster() {
        let world = World::new();
        world.clusters.insert(test_cluster("prod", NS, vec![]));
        world.features.insert(feature());

        let err = world.reconcile_feature("mesh").await.unwrap_err();
        assert!(err.is_retryable());

        let status = world.features.status(NS, "mesh").unwrap();
        assert_eq!(status.status, Status::Error);
        assert_eq!(status.components.status_of("Cluster/prod"), Status::Pending);
        assert!(world.services.created().is_empty());
    }

    #[tokio::test]
    async fn test_installs_services_on_ready_cluster() {
        let world = World::new();
        world
            .clusters
            .insert(with_status(test_cluster("prod", NS, vec![]), Status::Success));
        world.features.insert(feature());

        world.reconcile_feature("mesh").await.unwrap();
        world.services_ready();
        world.reconcile_feature("mesh").await.unwrap();

        let istio = world.services.object(NS, "istio").unwrap();
        assert_eq!(istio.spec.cluster.as_deref(), Some("prod"));
        assert_eq!(istio.owner_references()[0].kind, "Feature");

        let status = world.features.status(NS, "mesh").unwrap();
        assert_eq!(status.status, Status::Success);
        assert_eq!(status.components.status_of("Cluster/prod"), Status::Success);
        assert_eq!(status.components.status_of("Service/istio"), Status::Success);
    }

    #[tokio::test]
    async fn test_disabling_removes_services() {
        let world = World::new();
        world
            .clusters
            .insert(with_status(test_cluster("prod", NS, vec![]), Status::Success));
        world.features.insert(feature());
        world.reconcile_feature("mesh").await.unwrap();
        world.services_ready();
        world.reconcile_feature("mesh").await.unwrap();

        world.features.update(NS, "mesh", |f| f.spec.enabled = false);
        world.reconcile_feature("mesh").await.unwrap();
        world.reconcile_feature("mesh").await.unwrap();

        assert_eq!(world.services.deleted(), vec!["istio"]);
        let status = world.features.status(NS, "mesh").unwrap();
        assert_eq!(status.status, Status::Success);
        assert!(status.components.is_empty());
    }
}

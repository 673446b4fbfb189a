pub mod cluster;
pub mod context;
pub mod credentials;
pub mod dependents;
pub mod engine;
pub mod error;
pub mod feature;
pub mod finalizer;
pub mod pipeline;
pub mod reconciler;
pub mod service;
pub mod service_provider;
pub mod validation;

pub use cluster::{CLUSTER_FINALIZER, ClusterHandler};
pub use context::{Context, RetryCounter};
pub use credentials::{CREDENTIALS_FINALIZER, CredentialsHandler, SECRET_COMPONENT};
pub use dependents::Dependents;
pub use engine::{Engine, EngineConfig, ResourceHandler};
pub use error::{BackoffConfig, Error, Result};
pub use feature::{FEATURE_FINALIZER, FeatureHandler};
pub use pipeline::{EnsureStep, Pipeline, StepOutcome};
pub use reconciler::{
    error_policy, reconcile_cluster, reconcile_credentials, reconcile_feature, reconcile_service,
    reconcile_service_provider,
};
pub use service::{SERVICE_FINALIZER, ServiceHandler};
pub use service_provider::{SERVICE_PROVIDER_FINALIZER, ServiceProviderHandler};
pub use validation::{validate_admin_services, validate_cluster, validate_feature};

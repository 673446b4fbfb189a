mod cluster;
mod feature;
mod service;
mod service_credentials;
mod service_provider;
mod status;

pub use cluster::*;
pub use feature::*;
pub use service::*;
pub use service_credentials::*;
pub use service_provider::*;
pub use status::*;

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// API group of every custom resource managed by the operator
pub const API_GROUP: &str = "multicloud.io";

/// Label naming the kind of the parent that owns a dependent resource
pub const OWNER_KIND_LABEL: &str = "multicloud.io/owner-kind";

/// Label naming the parent that owns a dependent resource
pub const OWNER_NAME_LABEL: &str = "multicloud.io/owner-name";

/// Annotation carrying the creation priority of a dependent resource
pub const PRIORITY_ANNOTATION: &str = "multicloud.io/priority";

/// A resource under control of the reconciliation engine.
///
/// Implemented by every CRD in this module; gives the engine uniform access
/// to the shared [`ResourceStatus`].
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn resource_status(&self) -> Option<&ResourceStatus>;

    /// Mutable status, created empty on first access
    fn resource_status_mut(&mut self) -> &mut ResourceStatus;

    /// Reference to this object for use in another resource's components
    fn reference(&self) -> ResourceReference {
        ResourceReference {
            group: Self::group(&()).to_string(),
            version: Self::version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            namespace: self.namespace().unwrap_or_default(),
            name: self.name_any(),
        }
    }

    /// Current overall status, `Unknown` when never reconciled
    fn current_status(&self) -> Status {
        self.resource_status()
            .map(|s| s.status)
            .unwrap_or_default()
    }
}

macro_rules! impl_managed_resource {
    ($($kind:ty),+ $(,)?) => {
        $(
            impl ManagedResource for $kind {
                fn resource_status(&self) -> Option<&ResourceStatus> {
                    self.status.as_ref()
                }

                fn resource_status_mut(&mut self) -> &mut ResourceStatus {
                    self.status.get_or_insert_with(ResourceStatus::default)
                }
            }
        )+
    };
}

impl_managed_resource!(Cluster, Feature, Service, ServiceCredentials, ServiceProvider);

//! Cluster CRD definition
//!
//! A Cluster describes a Kubernetes cluster at a cloud provider together with
//! the admin services that must be installed for it. The cloud cluster itself
//! is created by a provider adapter; this resource tracks it and orchestrates
//! its admin services in priority order.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::{ResourceStatus, preserve_unknown_fields};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "multicloud.io",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters",
    shortname = "mcl",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"Provider", "type":"string", "jsonPath":".spec.provider"}"#,
    printcolumn = r#"{"name":"Region", "type":"string", "jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cloud provider hosting the cluster
    pub provider: CloudProvider,

    /// Region the cluster runs in
    pub region: String,

    /// Services installed for the cluster, created in priority order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admin_services: Vec<AdminServiceSpec>,
}

/// Supported cloud providers
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aks,
    Eks,
    Gke,
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudProvider::Aks => write!(f, "aks"),
            CloudProvider::Eks => write!(f, "eks"),
            CloudProvider::Gke => write!(f, "gke"),
        }
    }
}

/// A service owned by a parent resource
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminServiceSpec {
    /// Name of the Service object to create
    pub name: String,

    /// ServiceProvider fulfilling the service
    pub provider: String,

    /// Service kind offered by the provider
    pub kind: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plan: String,

    /// Lower priorities are created first and deleted last
    #[serde(default)]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub configuration: Option<serde_json::Value>,
}

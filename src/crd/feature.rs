//! Feature CRD definition
//!
//! A Feature is a cross-cutting capability (monitoring, logging, ...) enabled
//! on a Cluster by installing a set of admin services.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::cluster::AdminServiceSpec;
use super::status::ResourceStatus;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "multicloud.io",
    version = "v1alpha1",
    kind = "Feature",
    plural = "features",
    shortname = "feat",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.cluster"}"#,
    printcolumn = r#"{"name":"Enabled", "type":"boolean", "jsonPath":".spec.enabled"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSpec {
    /// Cluster in the same namespace the feature applies to
    pub cluster: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admin_services: Vec<AdminServiceSpec>,
}

fn default_enabled() -> bool {
    true
}

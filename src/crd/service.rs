//! Service CRD definition
//!
//! A Service is an instance provisioned through a registered ServiceProvider,
//! either requested directly or created as an admin service of a Cluster or
//! Feature.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::{ResourceStatus, preserve_unknown_fields};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "multicloud.io",
    version = "v1alpha1",
    kind = "Service",
    plural = "services",
    shortname = "msvc",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"Provider", "type":"string", "jsonPath":".spec.provider"}"#,
    printcolumn = r#"{"name":"Kind", "type":"string", "jsonPath":".spec.kind"}"#,
    printcolumn = r#"{"name":"Plan", "type":"string", "jsonPath":".spec.plan"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Name of the ServiceProvider in the same namespace
    pub provider: String,

    /// Service kind offered by the provider, e.g. `postgresql`
    pub kind: String,

    /// Plan name; the provider's default plan is used when empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plan: String,

    /// Cluster this service is attached to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,

    /// Parameters passed to the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub configuration: Option<serde_json::Value>,
}

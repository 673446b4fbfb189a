//! ServiceProvider CRD definition
//!
//! A ServiceProvider registers a backend (for example an Open Service Broker)
//! that fulfils `Service` and `ServiceCredentials` resources.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::{ResourceStatus, preserve_unknown_fields};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "multicloud.io",
    version = "v1alpha1",
    kind = "ServiceProvider",
    plural = "serviceproviders",
    shortname = "svcprov",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"Kind", "type":"string", "jsonPath":".spec.kind"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProviderSpec {
    /// Provider implementation, e.g. `osb`
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Provider specific configuration, validated by the provider factory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub configuration: Option<serde_json::Value>,
}

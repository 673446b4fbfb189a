//! ServiceCredentials CRD definition
//!
//! ServiceCredentials binds a Service and stores the resulting credentials in
//! a Kubernetes Secret.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::{ResourceStatus, preserve_unknown_fields};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "multicloud.io",
    version = "v1alpha1",
    kind = "ServiceCredentials",
    plural = "servicecredentials",
    shortname = "svccreds",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"Service", "type":"string", "jsonPath":".spec.service"}"#,
    printcolumn = r#"{"name":"Secret", "type":"string", "jsonPath":".spec.secretName"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCredentialsSpec {
    /// Name of the Service in the same namespace
    pub service: String,

    /// Secret receiving the credentials; defaults to the resource name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Binding parameters passed to the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub configuration: Option<serde_json::Value>,
}

impl ServiceCredentials {
    /// Name of the Secret the credentials are written to
    pub fn secret_name(&self) -> String {
        self.spec
            .secret_name
            .clone()
            .unwrap_or_else(|| kube::ResourceExt::name_any(self))
    }
}

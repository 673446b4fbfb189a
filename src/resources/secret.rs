use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::ServiceCredentials;
use crate::resources::common::{owner_labels, owner_reference};

/// Generate the Secret holding the credentials of a binding
pub fn generate_credentials_secret(
    credentials: &ServiceCredentials,
    payload: &BTreeMap<String, String>,
) -> Secret {
    let data = payload
        .iter()
        .map(|(k, v)| (k.clone(), ByteString(v.clone().into_bytes())))
        .collect();

    Secret {
        metadata: ObjectMeta {
            name: Some(credentials.secret_name()),
            namespace: credentials.namespace(),
            labels: Some(owner_labels(credentials)),
            owner_references: Some(vec![owner_reference(credentials)]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

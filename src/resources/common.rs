//! Common utilities for generating Kubernetes objects
//!
//! Shared by the dependent-resource orchestration and the credentials
//! controller so every generated object is labelled and owned the same way.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::{ManagedResource, OWNER_KIND_LABEL, OWNER_NAME_LABEL};

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "multicloud-operator";

/// Generate a controller owner reference to `owner`
///
/// Objects owned this way are garbage collected with their owner and trigger
/// a reconciliation of the owner when they change.
pub fn owner_reference<K: ManagedResource>(owner: &K) -> OwnerReference {
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.name_any(),
        uid: owner.meta().uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Labels identifying the parent of a generated object
pub fn owner_labels<K: ManagedResource>(owner: &K) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
        (OWNER_KIND_LABEL.to_string(), K::kind(&()).to_string()),
        (OWNER_NAME_LABEL.to_string(), owner.name_any()),
    ])
}

/// Label selector matching every object generated for `owner`
pub fn owner_selector<K: ManagedResource>(owner: &K) -> String {
    format!(
        "{}={},{}={}",
        OWNER_KIND_LABEL,
        K::kind(&()),
        OWNER_NAME_LABEL,
        owner.name_any()
    )
}

/// True when `object` is controlled by `owner`
pub fn is_owned_by<K: ManagedResource, O: Resource>(object: &O, owner: &K) -> bool {
    let uid = owner.meta().uid.as_deref();
    object.owner_references().iter().any(|r| {
        r.kind == K::kind(&()) && r.name == owner.name_any() && (uid.is_none() || Some(r.uid.as_str()) == uid)
    })
}

//! Access to the declarative resource store
//!
//! The reconciliation engine talks to the Kubernetes API only through
//! [`ResourceStore`], so every controller can be driven against an in-memory
//! store in tests.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::crd::{ManagedResource, ResourceStatus, ServiceCredentials};
use crate::resources::common::FIELD_MANAGER;
use crate::resources::secret::generate_credentials_secret;

/// Status keys cleared with `null` when absent, since a merge patch only
/// removes keys that are explicitly set to null
const STATUS_KEYS: &[&str] = &[
    "message",
    "components",
    "providerID",
    "providerData",
    "observedGeneration",
    "lastTransitionTime",
];

/// Store of one kind of managed resource
#[async_trait]
pub trait ResourceStore<K: ManagedResource>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn list(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<K>>;

    async fn create(&self, namespace: &str, object: &K) -> Result<K>;

    /// Apply the spec, labels, annotations and owner references of `object`
    async fn patch_spec(&self, namespace: &str, object: &K) -> Result<K>;

    async fn set_finalizers(&self, namespace: &str, name: &str, finalizers: Vec<String>) -> Result<()>;

    async fn patch_status(&self, namespace: &str, name: &str, status: &ResourceStatus) -> Result<()>;

    /// Request deletion; deleting an object that is already gone succeeds
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Store of the Secrets credentials are written to
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn apply_credentials(
        &self,
        owner: &ServiceCredentials,
        payload: &BTreeMap<String, String>,
    ) -> Result<()>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`ResourceStore`] backed by the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self::new(self.client.clone())
    }
}

impl<K: ManagedResource> KubeStore<K> {
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn status_patch(status: &ResourceStatus) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(status)?;
    if let Some(map) = value.as_object_mut() {
        for key in STATUS_KEYS {
            map.entry(*key).or_insert(serde_json::Value::Null);
        }
    }
    Ok(json!({ "status": value }))
}

fn spec_patch<K: ManagedResource>(object: &K) -> Result<serde_json::Value> {
    let value = serde_json::to_value(object)?;
    let meta = object.meta();

    let mut metadata = serde_json::Map::new();
    metadata.insert("name".to_string(), json!(object.name_any()));
    if let Some(labels) = &meta.labels {
        metadata.insert("labels".to_string(), json!(labels));
    }
    if let Some(annotations) = &meta.annotations {
        metadata.insert("annotations".to_string(), json!(annotations));
    }
    if let Some(owners) = &meta.owner_references {
        metadata.insert("ownerReferences".to_string(), serde_json::to_value(owners)?);
    }

    Ok(json!({
        "apiVersion": K::api_version(&()),
        "kind": K::kind(&()),
        "metadata": metadata,
        "spec": value.get("spec").cloned().unwrap_or_default(),
    }))
}

#[async_trait]
impl<K: ManagedResource> ResourceStore<K> for KubeStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn list(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        Ok(self.api(namespace).list(&params).await?.items)
    }

    async fn create(&self, namespace: &str, object: &K) -> Result<K> {
        let created = self
            .api(namespace)
            .create(&PostParams::default(), object)
            .await?;
        debug!(kind = %K::kind(&()), name = %created.name_any(), "created resource");
        Ok(created)
    }

    async fn patch_spec(&self, namespace: &str, object: &K) -> Result<K> {
        let patch = spec_patch(object)?;
        Ok(self
            .api(namespace)
            .patch(
                &object.name_any(),
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&patch),
            )
            .await?)
    }

    async fn set_finalizers(&self, namespace: &str, name: &str, finalizers: Vec<String>) -> Result<()> {
        let finalizers = if finalizers.is_empty() {
            serde_json::Value::Null
        } else {
            json!(finalizers)
        };
        let patch = json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_status(&self, namespace: &str, name: &str, status: &ResourceStatus) -> Result<()> {
        let patch = status_patch(status)?;
        self.api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}

/// [`SecretStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn apply_credentials(
        &self,
        owner: &ServiceCredentials,
        payload: &BTreeMap<String, String>,
    ) -> Result<()> {
        let namespace = owner.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let secret = generate_credentials_secret(owner, payload);
        let name = secret
            .metadata
            .name
            .clone()
            .ok_or(Error::MissingObjectKey("name"))?;

        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&secret),
        )
        .await?;
        debug!(secret = %name, "applied credentials secret");
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}

//! Status vocabulary shared by every managed resource
//!
//! Every custom resource reconciled by this operator carries the same status
//! sub-resource: a coarse [`Status`], a human message, and an ordered list of
//! [`Component`]s that report the outcome of each provisioning step.

use std::fmt;

use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Coarse outcome of a resource or of one of its components
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq, Hash)]
pub enum Status {
    /// Work is in progress, reconciliation will continue
    Pending,
    /// Desired state has been reached
    Success,
    /// A recoverable error occurred, reconciliation will retry
    Error,
    /// A terminal failure, requires a spec change or operator action
    Failure,
    /// External resources are being torn down
    Deleting,
    /// Teardown confirmed, the finalizer is about to be removed
    Deleted,
    /// Teardown failed terminally
    DeleteFailed,
    /// Reached desired state with caveats
    Warning,
    /// Not yet observed
    #[default]
    Unknown,
}

impl Status {
    /// Statuses counted as failed when aggregating component errors
    pub fn is_failed(&self) -> bool {
        matches!(self, Status::Error | Status::Failure | Status::DeleteFailed)
    }

    /// Terminal statuses are not retried until the spec changes
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Failure | Status::DeleteFailed)
    }

    /// Recoverable statuses are retried by the next reconciliation pass
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Status::Error | Status::Pending)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pending => "Pending",
            Status::Success => "Success",
            Status::Error => "Error",
            Status::Failure => "Failure",
            Status::Deleting => "Deleting",
            Status::Deleted => "Deleted",
            Status::DeleteFailed => "DeleteFailed",
            Status::Warning => "Warning",
            Status::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Reference to another Kubernetes object a component represents
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// A named, independently tracked step of a resource's provisioning
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Unique name within the owning resource
    pub name: String,

    #[serde(default)]
    pub status: Status,

    /// Human readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Technical detail, usually the underlying error
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,

    /// Object this component represents, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceReference>,
}

impl Component {
    pub fn new(name: impl Into<String>, status: Status) -> Self {
        Self {
            name: name.into(),
            status,
            message: String::new(),
            detail: String::new(),
            resource: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_resource(mut self, resource: ResourceReference) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Update status, message and detail in place, keeping the name and reference
    pub fn update(&mut self, status: Status, message: impl Into<String>, detail: impl Into<String>) {
        self.status = status;
        self.message = message.into();
        self.detail = detail.into();
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} - {}: {}",
            self.status, self.name, self.message, self.detail
        )
    }
}

/// Combined error of every failed component
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ComponentsError(pub String);

/// Ordered collection of components keyed by name
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(transparent)]
pub struct Components(Vec<Component>);

impl Components {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Look up a component by name
    pub fn get_component(&self, name: &str) -> Option<&Component> {
        self.0.iter().find(|c| c.name == name)
    }

    pub fn get_component_mut(&mut self, name: &str) -> Option<&mut Component> {
        self.0.iter_mut().find(|c| c.name == name)
    }

    /// Status of the named component, `Unknown` when it has never run
    pub fn status_of(&self, name: &str) -> Status {
        self.get_component(name)
            .map(|c| c.status)
            .unwrap_or(Status::Unknown)
    }

    /// Insert the component, replacing any existing component with the same name.
    ///
    /// The existing position is kept so display order is stable across passes.
    /// A resource reference already recorded is kept when the new value has none.
    pub fn set_condition(&mut self, component: Component) {
        match self.get_component_mut(&component.name) {
            Some(existing) => {
                let resource = component.resource.or_else(|| existing.resource.take());
                *existing = Component {
                    resource,
                    ..component
                };
            }
            None => self.0.push(component),
        }
    }

    /// Upsert a component by name with the given status, message and detail
    pub fn set_status(
        &mut self,
        name: &str,
        status: Status,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) {
        match self.get_component_mut(name) {
            Some(existing) => existing.update(status, message, detail),
            None => self.0.push(
                Component::new(name, status)
                    .with_message(message)
                    .with_detail(detail),
            ),
        }
    }

    /// Explicitly remove a component
    pub fn remove(&mut self, name: &str) -> Option<Component> {
        let idx = self.0.iter().position(|c| c.name == name)?;
        Some(self.0.remove(idx))
    }

    /// True when any component has the given status
    pub fn has_status(&self, status: Status) -> bool {
        self.0.iter().any(|c| c.status == status)
    }

    /// True when every component has the given status.
    ///
    /// An empty collection satisfies every status.
    pub fn has_status_for_all(&self, status: Status) -> bool {
        self.0.iter().all(|c| c.status == status)
    }

    /// Aggregate error of all failed components, `None` if nothing failed
    pub fn error(&self) -> Option<ComponentsError> {
        let failed: Vec<String> = self
            .0
            .iter()
            .filter(|c| c.status.is_failed())
            .map(|c| c.to_string())
            .collect();

        if failed.is_empty() {
            None
        } else {
            Some(ComponentsError(failed.join(", ")))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Component> for Components {
    fn from_iter<I: IntoIterator<Item = Component>>(iter: I) -> Self {
        let mut components = Components::new();
        for c in iter {
            components.set_condition(c);
        }
        components
    }
}

/// Status sub-resource common to every managed resource
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// Overall status of the resource
    #[serde(default)]
    pub status: Status,

    /// Human readable message explaining the status
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Per-step progress
    #[serde(default, skip_serializing_if = "Components::is_empty")]
    pub components: Components,

    /// Identifier of the instance or binding at the remote provider
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Provider bookkeeping such as an in-flight operation token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub provider_data: Option<serde_json::Value>,

    /// Generation the status was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// When the overall status last changed (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl ResourceStatus {
    /// Set the overall status and message
    pub fn set(&mut self, status: Status, message: impl Into<String>) {
        self.status = status;
        self.message = message.into();
    }

    /// Decode provider data into a typed value
    pub fn provider_data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.provider_data
            .clone()
            .map(serde_json::from_value)
            .transpose()
    }

    /// Encode a typed value into provider data
    pub fn set_provider_data<T: Serialize>(&mut self, data: &T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(data)?;
        self.provider_data = match value {
            serde_json::Value::Null => None,
            serde_json::Value::Object(ref map) if map.is_empty() => None,
            other => Some(other),
        };
        Ok(())
    }
}

/// Schema for free-form JSON fields
pub(crate) fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

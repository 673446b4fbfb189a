//! Provisioning and binding state machine
//!
//! Drives a service instance or binding through the broker protocol. Each
//! operation is tracked as a component of the owning resource:
//!
//! ```text
//! Unknown ──call──► Success                      (synchronous completion)
//!    │
//!    └──call──► Pending ──poll──► Pending        (in progress, requeue)
//!                  │
//!                  ├──poll──► Success            (succeeded)
//!                  └──poll──► Failure            (failed, critical)
//! ```
//!
//! The operation token returned by an asynchronous call is stored in the
//! resource's provider data and used by the next pass to poll. Transient
//! failures leave the component in `Error`; the next pass resumes polling if
//! an operation was in flight, or repeats the call otherwise. Every call
//! carries the instance or binding id stored in `providerID`, so repeating a
//! call is safe.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::{
    BindRequest, BrokerClient, BrokerError, DeprovisionRequest, GetBindingRequest,
    LastOperationRequest, LastOperationState, OperationResponse, ProvisionRequest, UnbindRequest,
    UpdateRequest,
};
use crate::controller::error::{Error, Result};
use crate::controller::pipeline::StepOutcome;
use crate::crd::{Components, ResourceStatus, Status};

/// Component names used by the state machine
pub mod components {
    pub const PROVISION: &str = "Provision";
    pub const UPDATE: &str = "Update";
    pub const DEPROVISION: &str = "Deprovision";
    pub const BIND: &str = "Bind";
    pub const UNBIND: &str = "Unbind";
}

use components::{BIND, DEPROVISION, PROVISION, UNBIND, UPDATE};

/// Decoded credentials of a binding, ready to be written to a Secret
pub type Credentials = BTreeMap<String, String>;

/// Bookkeeping persisted in the resource's `providerData`
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationData {
    /// Token of the in-flight asynchronous operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    /// Component whose operation is being polled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_progress: Option<String>,

    /// Spec sent with the in-flight provision or update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<AppliedSpec>,

    /// Spec the instance was last successfully provisioned or updated with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied: Option<AppliedSpec>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedSpec {
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Broker identifiers and parameters for an instance
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSpec {
    pub service_id: String,
    pub plan_id: String,
    pub parameters: Option<serde_json::Value>,
}

impl InstanceSpec {
    fn applied(&self) -> AppliedSpec {
        AppliedSpec {
            plan_id: self.plan_id.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Broker identifiers and parameters for a binding of an instance
#[derive(Debug, Clone, PartialEq)]
pub struct BindingSpec {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub parameters: Option<serde_json::Value>,
}

/// Result of a binding pass
#[derive(Debug, Clone, PartialEq)]
pub struct BindingResult {
    pub outcome: StepOutcome,
    /// Present when the credentials were fetched during this pass
    pub credentials: Option<Credentials>,
}

impl BindingResult {
    fn waiting(outcome: StepOutcome) -> Self {
        Self {
            outcome,
            credentials: None,
        }
    }
}

/// Where a single broker interaction left the component
enum Progress {
    /// Accepted or still running; poll again later
    Waiting,
    /// Remote side finished; carries credentials of a synchronous bind
    Done(Option<serde_json::Value>),
}

enum Call<'r> {
    Provision(&'r ProvisionRequest),
    Update(&'r UpdateRequest),
    Deprovision(&'r DeprovisionRequest),
    Bind(&'r BindRequest),
    Unbind(&'r UnbindRequest),
}

enum PollTarget {
    Instance,
    Binding,
}

/// Generate the idempotency identifier once and persist it
fn ensure_provider_id(status: &mut ResourceStatus) -> String {
    status
        .provider_id
        .get_or_insert_with(|| Uuid::new_v4().to_string())
        .clone()
}

/// Flatten a credentials payload into string values
pub fn decode_credentials(payload: serde_json::Value) -> std::result::Result<Credentials, BrokerError> {
    match payload {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect()),
        serde_json::Value::Null => Ok(Credentials::new()),
        other => Err(BrokerError::InvalidResponse(format!(
            "credentials must be an object, got {other}"
        ))),
    }
}

pub struct BrokerStateMachine<'a> {
    client: &'a dyn BrokerClient,
    poll_interval: Duration,
}

impl<'a> BrokerStateMachine<'a> {
    pub fn new(client: &'a dyn BrokerClient, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    /// Provision the instance, then keep it updated with the spec
    pub async fn reconcile_instance(
        &self,
        status: &mut ResourceStatus,
        spec: &InstanceSpec,
    ) -> Result<StepOutcome> {
        let instance_id = ensure_provider_id(status);
        let mut data: OperationData = status.provider_data_as()?.unwrap_or_default();
        let result = self
            .drive_instance(&mut status.components, &mut data, &instance_id, spec)
            .await;
        status.set_provider_data(&data)?;
        result
    }

    /// Deprovision the instance; an instance the broker no longer knows is gone
    pub async fn delete_instance(
        &self,
        status: &mut ResourceStatus,
        spec: &InstanceSpec,
    ) -> Result<StepOutcome> {
        let Some(instance_id) = status.provider_id.clone() else {
            debug!("instance was never provisioned");
            return Ok(StepOutcome::Continue);
        };
        if status.components.status_of(PROVISION) == Status::Unknown {
            debug!(instance_id = %instance_id, "provision never attempted");
            return Ok(StepOutcome::Continue);
        }

        let mut data: OperationData = status.provider_data_as()?.unwrap_or_default();
        let result = self
            .drive_deprovision(&mut status.components, &mut data, &instance_id, spec)
            .await;
        status.set_provider_data(&data)?;
        result
    }

    /// Bind the instance. Credentials are returned on the pass the binding
    /// completes, or when `payload_required` is set for an existing binding.
    pub async fn reconcile_binding(
        &self,
        status: &mut ResourceStatus,
        spec: &BindingSpec,
        payload_required: bool,
    ) -> Result<BindingResult> {
        let binding_id = ensure_provider_id(status);
        let mut data: OperationData = status.provider_data_as()?.unwrap_or_default();
        let result = self
            .drive_binding(
                &mut status.components,
                &mut data,
                &binding_id,
                spec,
                payload_required,
            )
            .await;
        status.set_provider_data(&data)?;
        result
    }

    /// Remove the binding; a binding the broker no longer knows is gone
    pub async fn delete_binding(
        &self,
        status: &mut ResourceStatus,
        spec: &BindingSpec,
    ) -> Result<StepOutcome> {
        let Some(binding_id) = status.provider_id.clone() else {
            return Ok(StepOutcome::Continue);
        };
        if status.components.status_of(BIND) == Status::Unknown {
            return Ok(StepOutcome::Continue);
        }

        let mut data: OperationData = status.provider_data_as()?.unwrap_or_default();
        let result = self
            .drive_unbind(&mut status.components, &mut data, &binding_id, spec)
            .await;
        status.set_provider_data(&data)?;
        result
    }

    async fn drive_instance(
        &self,
        components: &mut Components,
        data: &mut OperationData,
        instance_id: &str,
        spec: &InstanceSpec,
    ) -> Result<StepOutcome> {
        if components.status_of(PROVISION) != Status::Success {
            let progress = if data.in_progress.as_deref() == Some(PROVISION) {
                let request = self.instance_poll(instance_id, spec, data);
                self.poll(components, data, PROVISION, PollTarget::Instance, &request, false)
                    .await?
            } else {
                let request = ProvisionRequest {
                    instance_id: instance_id.to_string(),
                    service_id: spec.service_id.clone(),
                    plan_id: spec.plan_id.clone(),
                    parameters: spec.parameters.clone(),
                };
                data.requested = Some(spec.applied());
                self.invoke(components, data, PROVISION, Call::Provision(&request), false)
                    .await?
            };

            return Ok(match progress {
                Progress::Waiting => StepOutcome::RequeueAfter(self.poll_interval),
                Progress::Done(_) => {
                    self.complete(components, data, PROVISION);
                    info!(instance_id = %instance_id, "instance provisioned");
                    StepOutcome::Continue
                }
            });
        }

        let desired = spec.applied();
        if data.last_applied.as_ref() == Some(&desired) && data.in_progress.is_none() {
            // A spec reverted after a failed update leaves nothing to apply
            if !matches!(components.status_of(UPDATE), Status::Unknown | Status::Success) {
                debug!(instance_id = %instance_id, "spec matches the applied state, clearing update");
                data.requested = None;
                components.set_status(UPDATE, Status::Success, "", "");
            }
            return Ok(StepOutcome::Continue);
        }

        let progress = if data.in_progress.as_deref() == Some(UPDATE) {
            let request = self.instance_poll(instance_id, spec, data);
            self.poll(components, data, UPDATE, PollTarget::Instance, &request, false)
                .await?
        } else {
            let request = UpdateRequest {
                instance_id: instance_id.to_string(),
                service_id: spec.service_id.clone(),
                plan_id: spec.plan_id.clone(),
                parameters: spec.parameters.clone(),
                previous_plan_id: data.last_applied.as_ref().map(|a| a.plan_id.clone()),
            };
            data.requested = Some(desired);
            self.invoke(components, data, UPDATE, Call::Update(&request), false)
                .await?
        };

        Ok(match progress {
            Progress::Waiting => StepOutcome::RequeueAfter(self.poll_interval),
            Progress::Done(_) => {
                self.complete(components, data, UPDATE);
                info!(instance_id = %instance_id, "instance updated");
                StepOutcome::Continue
            }
        })
    }

    async fn drive_deprovision(
        &self,
        components: &mut Components,
        data: &mut OperationData,
        instance_id: &str,
        spec: &InstanceSpec,
    ) -> Result<StepOutcome> {
        if components.status_of(DEPROVISION) == Status::Success {
            return Ok(StepOutcome::Continue);
        }

        let progress = if data.in_progress.as_deref() == Some(DEPROVISION) {
            let request = self.instance_poll(instance_id, spec, data);
            self.poll(components, data, DEPROVISION, PollTarget::Instance, &request, true)
                .await?
        } else {
            let request = DeprovisionRequest {
                instance_id: instance_id.to_string(),
                service_id: spec.service_id.clone(),
                plan_id: spec.plan_id.clone(),
            };
            self.invoke(components, data, DEPROVISION, Call::Deprovision(&request), true)
                .await?
        };

        Ok(match progress {
            Progress::Waiting => StepOutcome::RequeueAfter(self.poll_interval),
            Progress::Done(_) => {
                self.complete(components, data, DEPROVISION);
                info!(instance_id = %instance_id, "instance deprovisioned");
                StepOutcome::Continue
            }
        })
    }

    async fn drive_binding(
        &self,
        components: &mut Components,
        data: &mut OperationData,
        binding_id: &str,
        spec: &BindingSpec,
        payload_required: bool,
    ) -> Result<BindingResult> {
        if components.status_of(BIND) == Status::Success {
            if !payload_required {
                return Ok(BindingResult::waiting(StepOutcome::Continue));
            }
            let credentials = self
                .fetch_credentials(components, data, binding_id, spec)
                .await?;
            return Ok(BindingResult {
                outcome: StepOutcome::Continue,
                credentials: Some(credentials),
            });
        }

        let polled = data.in_progress.as_deref() == Some(BIND);
        let progress = if polled {
            let request = LastOperationRequest {
                instance_id: spec.instance_id.clone(),
                binding_id: Some(binding_id.to_string()),
                service_id: spec.service_id.clone(),
                plan_id: spec.plan_id.clone(),
                operation: data.operation.clone(),
            };
            self.poll(components, data, BIND, PollTarget::Binding, &request, false)
                .await?
        } else {
            let request = BindRequest {
                instance_id: spec.instance_id.clone(),
                binding_id: binding_id.to_string(),
                service_id: spec.service_id.clone(),
                plan_id: spec.plan_id.clone(),
                parameters: spec.parameters.clone(),
            };
            self.invoke(components, data, BIND, Call::Bind(&request), false)
                .await?
        };

        let credentials = match progress {
            Progress::Waiting => {
                return Ok(BindingResult::waiting(StepOutcome::RequeueAfter(
                    self.poll_interval,
                )));
            }
            // Only a terminal poll guarantees the binding payload exists
            Progress::Done(None) if polled => {
                self.fetch_credentials(components, data, binding_id, spec)
                    .await?
            }
            Progress::Done(payload) => decode_credentials(payload.unwrap_or_default())
                .map_err(|e| self.fail(components, data, BIND, e))?,
        };

        self.complete(components, data, BIND);
        info!(binding_id = %binding_id, "binding created");
        Ok(BindingResult {
            outcome: StepOutcome::Continue,
            credentials: Some(credentials),
        })
    }

    async fn drive_unbind(
        &self,
        components: &mut Components,
        data: &mut OperationData,
        binding_id: &str,
        spec: &BindingSpec,
    ) -> Result<StepOutcome> {
        if components.status_of(UNBIND) == Status::Success {
            return Ok(StepOutcome::Continue);
        }

        let progress = if data.in_progress.as_deref() == Some(UNBIND) {
            let request = LastOperationRequest {
                instance_id: spec.instance_id.clone(),
                binding_id: Some(binding_id.to_string()),
                service_id: spec.service_id.clone(),
                plan_id: spec.plan_id.clone(),
                operation: data.operation.clone(),
            };
            self.poll(components, data, UNBIND, PollTarget::Binding, &request, true)
                .await?
        } else {
            let request = UnbindRequest {
                instance_id: spec.instance_id.clone(),
                binding_id: binding_id.to_string(),
                service_id: spec.service_id.clone(),
                plan_id: spec.plan_id.clone(),
            };
            self.invoke(components, data, UNBIND, Call::Unbind(&request), true)
                .await?
        };

        Ok(match progress {
            Progress::Waiting => StepOutcome::RequeueAfter(self.poll_interval),
            Progress::Done(_) => {
                self.complete(components, data, UNBIND);
                info!(binding_id = %binding_id, "binding removed");
                StepOutcome::Continue
            }
        })
    }

    fn instance_poll(
        &self,
        instance_id: &str,
        spec: &InstanceSpec,
        data: &OperationData,
    ) -> LastOperationRequest {
        LastOperationRequest {
            instance_id: instance_id.to_string(),
            binding_id: None,
            service_id: spec.service_id.clone(),
            plan_id: spec.plan_id.clone(),
            operation: data.operation.clone(),
        }
    }

    async fn fetch_credentials(
        &self,
        components: &mut Components,
        data: &mut OperationData,
        binding_id: &str,
        spec: &BindingSpec,
    ) -> Result<Credentials> {
        let request = GetBindingRequest {
            instance_id: spec.instance_id.clone(),
            binding_id: binding_id.to_string(),
        };
        let binding = self
            .client
            .get_binding(&request)
            .await
            .map_err(|e| self.fail(components, data, BIND, e))?;
        decode_credentials(binding.credentials.unwrap_or_default())
            .map_err(|e| self.fail(components, data, BIND, e))
    }

    async fn invoke(
        &self,
        components: &mut Components,
        data: &mut OperationData,
        component: &str,
        call: Call<'_>,
        gone_is_success: bool,
    ) -> Result<Progress> {
        let response = match call {
            Call::Provision(r) => self.client.provision_instance(r).await,
            Call::Update(r) => self.client.update_instance(r).await,
            Call::Deprovision(r) => self.client.deprovision_instance(r).await,
            Call::Bind(r) => self.client.bind(r).await,
            Call::Unbind(r) => self.client.unbind(r).await,
        };

        match response {
            Ok(OperationResponse {
                is_async: true,
                operation,
                description,
                ..
            }) => {
                info!(component, operation = ?operation, "broker accepted asynchronous operation");
                data.operation = operation;
                data.in_progress = Some(component.to_string());
                components.set_status(
                    component,
                    Status::Pending,
                    description.unwrap_or_else(|| "Operation accepted by the broker".to_string()),
                    "",
                );
                Ok(Progress::Waiting)
            }
            Ok(response) => Ok(Progress::Done(response.credentials)),
            Err(e) if gone_is_success && e.is_not_found() => {
                debug!(component, "broker reports the object is already gone");
                Ok(Progress::Done(None))
            }
            Err(e) => Err(self.fail(components, data, component, e)),
        }
    }

    async fn poll(
        &self,
        components: &mut Components,
        data: &mut OperationData,
        component: &str,
        target: PollTarget,
        request: &LastOperationRequest,
        gone_is_success: bool,
    ) -> Result<Progress> {
        let response = match target {
            PollTarget::Instance => self.client.poll_last_operation(request).await,
            PollTarget::Binding => self.client.poll_binding_last_operation(request).await,
        };

        match response {
            Ok(last) => match last.state {
                LastOperationState::InProgress => {
                    debug!(component, "broker operation still in progress");
                    components.set_status(
                        component,
                        Status::Pending,
                        last.description
                            .unwrap_or_else(|| "Operation in progress".to_string()),
                        "",
                    );
                    Ok(Progress::Waiting)
                }
                LastOperationState::Succeeded => Ok(Progress::Done(None)),
                LastOperationState::Failed => {
                    let description = last
                        .description
                        .unwrap_or_else(|| "no description provided by the broker".to_string());
                    Err(self.fail(
                        components,
                        data,
                        component,
                        BrokerError::OperationFailed(description),
                    ))
                }
            },
            Err(e) if gone_is_success && e.is_not_found() => {
                debug!(component, "broker reports the object is already gone");
                Ok(Progress::Done(None))
            }
            Err(e) => Err(self.fail(components, data, component, e)),
        }
    }

    fn complete(&self, components: &mut Components, data: &mut OperationData, component: &str) {
        data.operation = None;
        data.in_progress = None;
        if matches!(component, PROVISION | UPDATE) {
            data.last_applied = data.requested.take().or_else(|| data.last_applied.take());
        }
        components.set_status(component, Status::Success, "", "");
    }

    /// Record a failed interaction on the component and convert it
    fn fail(
        &self,
        components: &mut Components,
        data: &mut OperationData,
        component: &str,
        error: BrokerError,
    ) -> Error {
        if error.is_critical() {
            warn!(component, error = %error, "broker operation failed permanently");
            data.operation = None;
            data.in_progress = None;
            data.requested = None;
            components.set_status(
                component,
                Status::Failure,
                "The broker rejected the operation",
                error.to_string(),
            );
        } else {
            warn!(component, error = %error, "broker call failed, will retry");
            components.set_status(
                component,
                Status::Error,
                "Broker call failed",
                error.to_string(),
            );
        }
        Error::BrokerError(error)
    }
}

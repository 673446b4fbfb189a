//! Broker protocol types and client abstraction
//!
//! Models the Open Service Broker calls used by the provisioning state
//! machine. Every mutating call carries an idempotency identifier (instance
//! or binding id) and answers either synchronously or with an operation
//! token that must be polled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Errors returned by a broker
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("broker returned HTTP {status}: {description}")]
    Http {
        status: u16,
        error: Option<String>,
        description: String,
    },

    #[error("broker request failed: {0}")]
    Transport(String),

    #[error("broker operation failed: {0}")]
    OperationFailed(String),

    #[error("invalid broker response: {0}")]
    InvalidResponse(String),
}

impl BrokerError {
    /// The broker rejected the request as malformed
    pub fn is_bad_request(&self) -> bool {
        matches!(self, BrokerError::Http { status: 400, .. })
    }

    /// The instance or binding does not exist (404) or is gone (410)
    pub fn is_not_found(&self) -> bool {
        matches!(self, BrokerError::Http { status: 404 | 410, .. })
    }

    /// Errors the broker will keep returning however often we retry
    pub fn is_critical(&self) -> bool {
        self.is_bad_request() || matches!(self, BrokerError::OperationFailed(_))
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(e: reqwest::Error) -> Self {
        BrokerError::Transport(e.to_string())
    }
}

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionRequest {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub parameters: Option<serde_json::Value>,
    pub previous_plan_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeprovisionRequest {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindRequest {
    pub instance_id: String,
    pub binding_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnbindRequest {
    pub instance_id: String,
    pub binding_id: String,
    pub service_id: String,
    pub plan_id: String,
}

/// Poll of an asynchronous operation; `binding_id` selects the binding variant
#[derive(Debug, Clone, PartialEq)]
pub struct LastOperationRequest {
    pub instance_id: String,
    pub binding_id: Option<String>,
    pub service_id: String,
    pub plan_id: String,
    pub operation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetBindingRequest {
    pub instance_id: String,
    pub binding_id: String,
}

/// Answer to a provision, update, deprovision, bind or unbind call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationResponse {
    /// The broker accepted the request and will complete it asynchronously
    pub is_async: bool,
    /// Token to poll when `is_async` is set
    pub operation: Option<String>,
    pub description: Option<String>,
    /// Credentials returned by a synchronous bind
    pub credentials: Option<serde_json::Value>,
}

impl OperationResponse {
    pub fn sync() -> Self {
        Self::default()
    }

    pub fn accepted(operation: impl Into<String>) -> Self {
        Self {
            is_async: true,
            operation: Some(operation.into()),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastOperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LastOperationResponse {
    pub state: LastOperationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BindingResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<serde_json::Value>,
}

/// Client for a remote service broker
///
/// This trait allows mocking the broker in tests while using the HTTP
/// client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn provision_instance(&self, request: &ProvisionRequest) -> BrokerResult<OperationResponse>;

    async fn update_instance(&self, request: &UpdateRequest) -> BrokerResult<OperationResponse>;

    async fn deprovision_instance(
        &self,
        request: &DeprovisionRequest,
    ) -> BrokerResult<OperationResponse>;

    async fn poll_last_operation(
        &self,
        request: &LastOperationRequest,
    ) -> BrokerResult<LastOperationResponse>;

    async fn bind(&self, request: &BindRequest) -> BrokerResult<OperationResponse>;

    async fn unbind(&self, request: &UnbindRequest) -> BrokerResult<OperationResponse>;

    async fn poll_binding_last_operation(
        &self,
        request: &LastOperationRequest,
    ) -> BrokerResult<LastOperationResponse>;

    async fn get_binding(&self, request: &GetBindingRequest) -> BrokerResult<BindingResponse>;
}

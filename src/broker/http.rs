//! Open Service Broker HTTP client
//!
//! Implements [`BrokerClient`] over the OSB v2 REST API:
//!
//! | Call                     | Method | Path                                                            |
//! |--------------------------|--------|-----------------------------------------------------------------|
//! | provision                | PUT    | `/v2/service_instances/{id}`                                    |
//! | update                   | PATCH  | `/v2/service_instances/{id}`                                    |
//! | deprovision              | DELETE | `/v2/service_instances/{id}`                                    |
//! | last operation           | GET    | `/v2/service_instances/{id}/last_operation`                     |
//! | bind / get / unbind      | PUT/GET/DELETE | `/v2/service_instances/{id}/service_bindings/{bid}`     |
//! | binding last operation   | GET    | `/v2/service_instances/{id}/service_bindings/{bid}/last_operation` |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::client::{
    BindRequest, BindingResponse, BrokerClient, BrokerError, BrokerResult, DeprovisionRequest,
    GetBindingRequest, LastOperationRequest, LastOperationResponse, OperationResponse,
    ProvisionRequest, UnbindRequest, UpdateRequest,
};

/// Header carrying the OSB API version
const API_VERSION_HEADER: &str = "X-Broker-API-Version";

/// Connection settings for a broker
#[derive(Debug, Clone)]
pub struct HttpBrokerConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_version: String,
    pub timeout: Duration,
}

pub struct HttpBrokerClient {
    http: reqwest::Client,
    config: HttpBrokerConfig,
}

/// Body of a mutating call's response
#[derive(Deserialize, Default)]
struct AsyncBody {
    #[serde(default)]
    operation: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    credentials: Option<serde_json::Value>,
}

/// Body of an error response
#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl HttpBrokerClient {
    pub fn new(config: HttpBrokerConfig) -> BrokerResult<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    fn instance_url(&self, instance_id: &str) -> String {
        format!(
            "{}/v2/service_instances/{}",
            self.config.url.trim_end_matches('/'),
            instance_id
        )
    }

    fn binding_url(&self, instance_id: &str, binding_id: &str) -> String {
        format!(
            "{}/service_bindings/{}",
            self.instance_url(instance_id),
            binding_id
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header(API_VERSION_HEADER, &self.config.api_version);
        match &self.config.username {
            Some(user) => builder.basic_auth(user, self.config.password.as_ref()),
            None => builder,
        }
    }

    /// Send a mutating call and interpret 200/201 as synchronous completion
    /// and 202 as asynchronous acceptance
    async fn send_operation(&self, builder: RequestBuilder) -> BrokerResult<OperationResponse> {
        let response = builder.send().await?;
        let status = response.status();
        debug!(status = %status, "broker responded");

        match status {
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => {
                let body: AsyncBody = read_json_or_default(response).await?;
                Ok(OperationResponse {
                    is_async: status == StatusCode::ACCEPTED,
                    operation: body.operation,
                    description: body.description,
                    credentials: body.credentials,
                })
            }
            _ => Err(error_from_response(response).await),
        }
    }

    async fn send_poll(&self, builder: RequestBuilder) -> BrokerResult<LastOperationResponse> {
        let response = builder.send().await?;
        if response.status() == StatusCode::OK {
            response
                .json::<LastOperationResponse>()
                .await
                .map_err(|e| BrokerError::InvalidResponse(e.to_string()))
        } else {
            Err(error_from_response(response).await)
        }
    }

    fn poll_query(request: &LastOperationRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("service_id", request.service_id.clone()),
            ("plan_id", request.plan_id.clone()),
        ];
        if let Some(op) = &request.operation {
            query.push(("operation", op.clone()));
        }
        query
    }
}

async fn read_json_or_default<T: Default + for<'de> Deserialize<'de>>(
    response: Response,
) -> BrokerResult<T> {
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| BrokerError::InvalidResponse(e.to_string()))
}

async fn error_from_response(response: Response) -> BrokerError {
    let status = response.status();
    let body: ErrorBody = response
        .bytes()
        .await
        .ok()
        .and_then(|b| serde_json::from_slice(&b).ok())
        .unwrap_or_default();
    BrokerError::Http {
        status: status.as_u16(),
        error: body.error,
        description: body
            .description
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string()),
    }
}

#[async_trait]
impl BrokerClient for HttpBrokerClient {
    async fn provision_instance(&self, request: &ProvisionRequest) -> BrokerResult<OperationResponse> {
        let url = self.instance_url(&request.instance_id);
        let body = json!({
            "service_id": request.service_id,
            "plan_id": request.plan_id,
            "parameters": request.parameters,
        });
        self.send_operation(
            self.request(Method::PUT, &url)
                .query(&[("accepts_incomplete", "true")])
                .json(&body),
        )
        .await
    }

    async fn update_instance(&self, request: &UpdateRequest) -> BrokerResult<OperationResponse> {
        let url = self.instance_url(&request.instance_id);
        let body = json!({
            "service_id": request.service_id,
            "plan_id": request.plan_id,
            "parameters": request.parameters,
            "previous_values": { "plan_id": request.previous_plan_id },
        });
        self.send_operation(
            self.request(Method::PATCH, &url)
                .query(&[("accepts_incomplete", "true")])
                .json(&body),
        )
        .await
    }

    async fn deprovision_instance(
        &self,
        request: &DeprovisionRequest,
    ) -> BrokerResult<OperationResponse> {
        let url = self.instance_url(&request.instance_id);
        self.send_operation(self.request(Method::DELETE, &url).query(&[
            ("accepts_incomplete", "true"),
            ("service_id", request.service_id.as_str()),
            ("plan_id", request.plan_id.as_str()),
        ]))
        .await
    }

    async fn poll_last_operation(
        &self,
        request: &LastOperationRequest,
    ) -> BrokerResult<LastOperationResponse> {
        let url = format!("{}/last_operation", self.instance_url(&request.instance_id));
        self.send_poll(
            self.request(Method::GET, &url)
                .query(&Self::poll_query(request)),
        )
        .await
    }

    async fn bind(&self, request: &BindRequest) -> BrokerResult<OperationResponse> {
        let url = self.binding_url(&request.instance_id, &request.binding_id);
        let body = json!({
            "service_id": request.service_id,
            "plan_id": request.plan_id,
            "parameters": request.parameters,
        });
        self.send_operation(
            self.request(Method::PUT, &url)
                .query(&[("accepts_incomplete", "true")])
                .json(&body),
        )
        .await
    }

    async fn unbind(&self, request: &UnbindRequest) -> BrokerResult<OperationResponse> {
        let url = self.binding_url(&request.instance_id, &request.binding_id);
        self.send_operation(self.request(Method::DELETE, &url).query(&[
            ("accepts_incomplete", "true"),
            ("service_id", request.service_id.as_str()),
            ("plan_id", request.plan_id.as_str()),
        ]))
        .await
    }

    async fn poll_binding_last_operation(
        &self,
        request: &LastOperationRequest,
    ) -> BrokerResult<LastOperationResponse> {
        let binding_id = request.binding_id.as_deref().ok_or_else(|| {
            BrokerError::InvalidResponse("binding poll without a binding id".to_string())
        })?;
        let url = format!(
            "{}/last_operation",
            self.binding_url(&request.instance_id, binding_id)
        );
        self.send_poll(
            self.request(Method::GET, &url)
                .query(&Self::poll_query(request)),
        )
        .await
    }

    async fn get_binding(&self, request: &GetBindingRequest) -> BrokerResult<BindingResponse> {
        let url = self.binding_url(&request.instance_id, &request.binding_id);
        let response = self.request(Method::GET, &url).send().await?;
        if response.status() == StatusCode::OK {
            read_json_or_default(response).await
        } else {
            Err(error_from_response(response).await)
        }
    }
}

//! Error types shared by every controller
//!
//! Errors are split into two classes. Critical errors are terminal: the
//! resource is marked `Failure` (or `DeleteFailed`) and the reconciliation
//! pass reports success to the runtime, because retrying cannot help.
//! Everything else is transient: the resource is marked `Error` and the error
//! is returned so the runtime requeues with exponential backoff.

use std::time::Duration;

use thiserror::Error;

use crate::broker::BrokerError;

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `ValidationError`).
/// This is idiomatic for error enums and improves readability at call sites.
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Broker error: {0}")]
    BrokerError(#[from] BrokerError),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Dependency not ready: {0}")]
    NotReady(String),

    #[error("{0}")]
    Critical(String),
}

impl Error {
    /// Mark a failure as terminal
    pub fn critical(message: impl Into<String>) -> Self {
        Error::Critical(message.into())
    }

    /// Check if this error is terminal and must not be retried
    pub fn is_critical(&self) -> bool {
        match self {
            Error::Critical(_) => true,
            Error::InvalidConfig(_) => true,
            Error::ValidationError(_) => true,
            // A broker rejecting the request, or confirming the operation
            // failed, will not change its mind on retry
            Error::BrokerError(e) => e.is_critical(),
            Error::KubeError(_) => false,
            Error::SerializationError(_) => false,
            Error::MissingObjectKey(_) => false,
            Error::NotFound(_) => false,
            Error::NotReady(_) => false,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !self.is_critical()
    }

    /// Check if this error indicates a resource was not found
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::KubeError(e) => matches!(e, kube::Error::Api(api_err) if api_err.code == 404),
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300), // 5 minutes
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt.min(32) as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error, with different handling for retryable vs non-retryable
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            // Critical errors are normally absorbed by the engine; if one
            // escapes, wait for manual intervention
            self.max_delay
        }
    }
}

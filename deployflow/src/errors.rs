//! Error types for deployflow.
//!
//! A single taxonomy covers the whole pipeline: collaborator failures,
//! transport failures reported by the deployment gateway, outcomes of the
//! resilience layer, and the terminal failures of the deployment saga.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runlog::RunLogError;

/// The main error type for deployflow operations.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Local validation rejected the generated units.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The requirement extractor could not produce requirements.
    #[error("Requirement extraction failed: {0}")]
    Extraction(String),

    /// A single requirement could not be turned into a unit.
    #[error("Generation failed for requirement '{requirement}': {reason}")]
    Generation {
        /// The offending requirement (label or rule name).
        requirement: String,
        /// Why generation failed.
        reason: String,
    },

    /// The deployment gateway reported a transport or protocol failure.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// A retryable operation kept failing until the retry budget ran out.
    #[error("Retries exhausted for '{operation}' after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// The logical operation name.
        operation: String,
        /// Total number of calls made, including the first.
        attempts: u32,
        /// The last error observed.
        source: Box<DeployError>,
    },

    /// A circuit breaker rejected the call without invoking the dependency.
    #[error("Circuit breaker '{operation_class}' is open; retry after {retry_after_ms}ms")]
    CircuitOpen {
        /// The operation class guarded by the breaker.
        operation_class: String,
        /// Time left until the breaker admits a probe.
        retry_after_ms: u64,
    },

    /// The gateway accepted the deployment but it finished unsuccessfully.
    #[error("Deployment {deployment_id} finished with status {status}: {message}")]
    DeploymentFailed {
        /// External deployment id.
        deployment_id: String,
        /// Terminal status reported by the gateway.
        status: String,
        /// Gateway error message.
        message: String,
    },

    /// Some deployed components could not be found on the target.
    #[error("Verification failed: {} component(s) missing: {}", missing.len(), missing.join(", "))]
    VerificationFailed {
        /// Full names of the missing components.
        missing: Vec<String>,
    },

    /// The compensating rollback did not complete.
    #[error("Rollback of deployment {deployment_id} failed: {reason}")]
    RollbackFailed {
        /// The deployment that should have been rolled back.
        deployment_id: String,
        /// Why the rollback failed.
        reason: String,
    },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller cancelled the run.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// The run/step log could not be written or read.
    #[error("Run log error: {0}")]
    RunLog(#[from] RunLogError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Creates a generation error.
    #[must_use]
    pub fn generation(requirement: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Generation {
            requirement: requirement.into(),
            reason: reason.into(),
        }
    }

    /// Creates a rollback failure.
    #[must_use]
    pub fn rollback_failed(deployment_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RollbackFailed {
            deployment_id: deployment_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns the gateway error behind this error, looking through
    /// exhausted retries.
    #[must_use]
    pub fn gateway_error(&self) -> Option<&GatewayError> {
        match self {
            Self::Gateway(err) => Some(err),
            Self::RetriesExhausted { source, .. } => source.gateway_error(),
            _ => None,
        }
    }

    /// Returns true for 401/403 style failures.
    #[must_use]
    pub fn is_authorization(&self) -> bool {
        matches!(self.gateway_error(), Some(GatewayError::Unauthorized { .. }))
    }

    /// Short machine-readable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Extraction(_) => "ExtractionError",
            Self::Generation { .. } => "GenerationError",
            Self::Gateway(GatewayError::Unauthorized { .. }) => "AuthorizationError",
            Self::Gateway(_) => "GatewayError",
            Self::RetriesExhausted { .. } => "RetriesExhausted",
            Self::CircuitOpen { .. } => "CircuitOpen",
            Self::DeploymentFailed { .. } => "DeploymentFailure",
            Self::VerificationFailed { .. } => "VerificationFailure",
            Self::RollbackFailed { .. } => "RollbackFailure",
            Self::Configuration(_) => "ConfigurationError",
            Self::Cancelled(_) => "Cancelled",
            Self::RunLog(_) => "RunLogError",
            Self::Serialization(_) => "SerializationError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Converts to a JSON representation suitable for step payloads.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));

        match self {
            Self::Generation { requirement, .. } => {
                map.insert("requirement".to_string(), serde_json::json!(requirement));
            }
            Self::RetriesExhausted { attempts, source, .. } => {
                map.insert("attempts".to_string(), serde_json::json!(attempts));
                map.insert("last_error".to_string(), source.to_dict());
            }
            Self::DeploymentFailed { deployment_id, status, .. } => {
                map.insert("deployment_id".to_string(), serde_json::json!(deployment_id));
                map.insert("status".to_string(), serde_json::json!(status));
            }
            Self::VerificationFailed { missing } => {
                map.insert("missing".to_string(), serde_json::json!(missing));
            }
            Self::RollbackFailed { deployment_id, .. } => {
                map.insert("deployment_id".to_string(), serde_json::json!(deployment_id));
                map.insert("manual_intervention".to_string(), serde_json::json!(true));
            }
            Self::Gateway(err) => {
                if let Some(status) = err.status_code() {
                    map.insert("status_code".to_string(), serde_json::json!(status));
                }
            }
            _ => {}
        }

        serde_json::Value::Object(map)
    }
}

/// Error raised when generated units fail local validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Validation failed: {}", errors.join("; "))]
pub struct ValidationError {
    /// Individual validation failures.
    pub errors: Vec<String>,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(errors: Vec<String>) -> Self {
        Self { errors }
    }
}

/// Failures reported by a deployment gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayError {
    /// The remote system throttled the request (HTTP 429 or equivalent).
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Error message.
        message: String,
        /// Server-suggested wait, if any.
        retry_after_ms: Option<u64>,
    },

    /// The request did not complete in time.
    #[error("Request timed out: {message}")]
    Timeout {
        /// Error message.
        message: String,
    },

    /// A transport-level failure identified by an error code such as
    /// `ECONNREFUSED`.
    #[error("Network error {code}: {message}")]
    Network {
        /// Transport error code.
        code: String,
        /// Error message.
        message: String,
    },

    /// A non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Authentication or authorization was refused.
    #[error("Unauthorized (HTTP {status}): {message}")]
    Unauthorized {
        /// HTTP status code (401 or 403).
        status: u16,
        /// Error message.
        message: String,
    },

    /// The gateway refused the request for a protocol reason.
    #[error("Request rejected: {message}")]
    Rejected {
        /// Error message.
        message: String,
    },
}

impl GatewayError {
    /// Maps an HTTP status to the matching error variant.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Unauthorized { status, message },
            429 => Self::RateLimited {
                message,
                retry_after_ms: None,
            },
            _ => Self::Status { status, message },
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// The HTTP status associated with this error, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Status { status, .. } | Self::Unauthorized { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true for 5xx responses.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status >= 500)
    }

    /// The human-readable message carried by the error.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::RateLimited { message, .. }
            | Self::Timeout { message }
            | Self::Network { message, .. }
            | Self::Status { message, .. }
            | Self::Unauthorized { message, .. }
            | Self::Rejected { message } => message,
        }
    }
}

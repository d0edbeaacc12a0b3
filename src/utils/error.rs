//! Error types and handling
//!
//! Every failure in the certificate lifecycle surfaces as a [`LifecycleError`].
//! Nothing is retried or swallowed here; the HTTP ingress converts errors into
//! a consistent JSON body so the invoking platform can decide on redelivery.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Lifecycle error types
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Missing or malformed configuration (CA credential reference, endpoints)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Incoming event does not decode to exactly one lifecycle variant
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// CSR text could not be parsed
    #[error("Invalid CSR: {0}")]
    InvalidCsr(String),

    /// CSR self-signature does not verify against its embedded public key
    #[error("CSR signature verification failed")]
    InvalidSignature,

    /// CA credential object is absent from the store
    #[error("CA credential not found: {0}")]
    CredentialNotFound(String),

    /// CA credential object exists but cannot be used
    #[error("CA credential corrupt: {0}")]
    CredentialCorrupt(String),

    /// Credential store could not be reached
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    /// Certificate construction or signing failed
    #[error("Issuance error: {0}")]
    Issuance(String),

    /// Device registry call failed
    #[error("Registry error: {0}")]
    Registry(String),

    /// Message broker publish failed
    #[error("Broker error: {0}")]
    Broker(String),

    /// No device is bound to the expiring certificate
    #[error("No device bound to principal: {0}")]
    NoBoundDevice(String),

    /// More than one device is bound and the policy forbids fan-out
    #[error("Principal {principal} is bound to {count} devices")]
    AmbiguousBinding { principal: String, count: usize },

    /// Issuance ledger failure
    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl LifecycleError {
    /// Stable identifier used in error bodies and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::Configuration(_) => "configuration_error",
            LifecycleError::InvalidEvent(_) => "invalid_event",
            LifecycleError::InvalidCsr(_) => "invalid_csr",
            LifecycleError::InvalidSignature => "invalid_signature",
            LifecycleError::CredentialNotFound(_) => "credential_not_found",
            LifecycleError::CredentialCorrupt(_) => "credential_corrupt",
            LifecycleError::CredentialStore(_) => "credential_store_error",
            LifecycleError::Issuance(_) => "issuance_error",
            LifecycleError::Registry(_) => "registry_error",
            LifecycleError::Broker(_) => "broker_error",
            LifecycleError::NoBoundDevice(_) => "no_bound_device",
            LifecycleError::AmbiguousBinding { .. } => "ambiguous_binding",
            LifecycleError::Ledger(_) => "ledger_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            LifecycleError::InvalidEvent(_) | LifecycleError::InvalidCsr(_) => {
                StatusCode::BAD_REQUEST
            }
            LifecycleError::InvalidSignature => StatusCode::UNPROCESSABLE_ENTITY,
            LifecycleError::NoBoundDevice(_) => StatusCode::NOT_FOUND,
            LifecycleError::AmbiguousBinding { .. } => StatusCode::CONFLICT,
            LifecycleError::Registry(_)
            | LifecycleError::Broker(_)
            | LifecycleError::CredentialStore(_) => StatusCode::BAD_GATEWAY,
            LifecycleError::Configuration(_)
            | LifecycleError::CredentialNotFound(_)
            | LifecycleError::CredentialCorrupt(_)
            | LifecycleError::Issuance(_)
            | LifecycleError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

impl IntoResponse for LifecycleError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();

        if status.is_server_error() {
            error!(error = %self, error_type = kind, "Event processing failed");
        } else if matches!(self, LifecycleError::InvalidSignature) {
            warn!(error_type = kind, "Rejected CSR with invalid signature");
        }

        (status, Json(ErrorResponse::new(kind, self.to_string()))).into_response()
    }
}

impl From<sqlx::Error> for LifecycleError {
    fn from(err: sqlx::Error) -> Self {
        LifecycleError::Ledger(err.to_string())
    }
}

/// Result type alias for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

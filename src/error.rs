use crate::models::job::DataType;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortabilityError {
    #[error("Invalid {field}: {message}")]
    InvalidArgument { field: &'static str, message: String },
    #[error("Invalid job identity: {0}")]
    InvalidIdentity(String),
    #[error("No transfer extension registered for service '{0}'")]
    ServiceNotFound(String),
    #[error("Multiple transfer extensions registered for service '{0}'")]
    AmbiguousService(String),
    #[error("Service '{service_id}' does not support {capability} for {data_type}")]
    CapabilityNotSupported {
        service_id: String,
        data_type: DataType,
        capability: Capability,
    },
    #[error("Transfer extension '{service_id}' failed to initialize: {reason}")]
    ExtensionInitFailed { service_id: String, reason: String },
    #[error("Job creation failed: {0}")]
    JobCreationFailed(String),
    #[error("Internal invariant violated: {0}")]
    InternalInvariantViolation(String),
    #[error("No auth flow available from '{service_id}' for {data_type}: {reason}")]
    AuthGeneratorUnavailable {
        service_id: String,
        data_type: DataType,
        reason: String,
    },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Transfer failed for job {job_id}: {reason}")]
    TransferFailed { job_id: String, reason: String },
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// The three things a transfer extension can hand out for a data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Export,
    Import,
    AuthGenerator,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Export => write!(f, "export"),
            Capability::Import => write!(f, "import"),
            Capability::AuthGenerator => write!(f, "auth generation"),
        }
    }
}

impl PortabilityError {
    pub fn invalid_argument(field: &'static str, message: impl Into<String>) -> Self {
        PortabilityError::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    /// Registry failures that point at a broken deployment rather than bad input.
    pub fn is_deployment_defect(&self) -> bool {
        matches!(
            self,
            PortabilityError::ServiceNotFound(_) | PortabilityError::AmbiguousService(_)
        )
    }

    fn error_type(&self) -> &'static str {
        match self {
            PortabilityError::InvalidArgument { .. } => "invalid_argument",
            PortabilityError::InvalidIdentity(_) => "invalid_identity",
            PortabilityError::Unavailable(_) => "unavailable",
            _ => "internal_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    error_type: String,
    message: String,
}

impl ResponseError for PortabilityError {
    fn error_response(&self) -> HttpResponse {
        // Only validation failures reach the user verbatim; the rest stays in the logs.
        let message = match self {
            PortabilityError::InvalidArgument { .. } | PortabilityError::InvalidIdentity(_) => {
                self.to_string()
            }
            PortabilityError::Unavailable(_) => "Service temporarily unavailable".to_string(),
            _ => "An internal error occurred".to_string(),
        };

        let error_response = ErrorResponse {
            error: "request_failed".to_string(),
            error_type: self.error_type().to_string(),
            message,
        };

        match self {
            PortabilityError::InvalidArgument { .. } | PortabilityError::InvalidIdentity(_) => {
                HttpResponse::BadRequest().json(error_response)
            }
            PortabilityError::Unavailable(_) => {
                HttpResponse::ServiceUnavailable().json(error_response)
            }
            _ => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

pub type AppResult<T> = Result<T, PortabilityError>;

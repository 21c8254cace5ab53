//! Typed error handling for the zapi framework
//!
//! Request-facing failures are expressed as [`ZapiError`], whose variants map
//! 1:1 onto the wire error codes and HTTP status codes. Lower layers have their
//! own error types that are folded into `ZapiError` at the pipeline boundary:
//!
//! - [`DriverError`]: failures reported by a persistence driver
//! - [`PluginError`]: boot-time plugin registry / resolution / initialization failures
//! - [`EntityError`]: entity construction failures
//!
//! # Wire format
//!
//! ```json
//! {"error": {"code": "VALIDATION_ERROR", "message": "...", "details": [{"field": "email", "message": "Required"}]}}
//! ```

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message returned in place of internal error details in production mode
pub const GENERIC_INTERNAL_MESSAGE: &str = "Internal server error";

/// The main error type for request processing
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ZapiError {
    /// Client-fixable input error, attributed to fields
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<FieldValidationError>,
    },

    /// No authenticated user where one is required
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated user lacks permission
    #[error("{0}")]
    Forbidden(String),

    /// Resource or route does not exist
    #[error("{0}")]
    NotFound(String),

    /// Write conflicts with existing state (e.g. unique constraint)
    #[error("{0}")]
    Conflict(String),

    /// Catch-all server-side failure
    #[error("{0}")]
    Internal(String),
}

/// Stable machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    InternalError,
}

impl ErrorCode {
    /// HTTP status derived from the code
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// A single field validation error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValidationError {
    pub field: String,
    pub message: String,
}

impl FieldValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error envelope written to the response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

/// Inner error payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldValidationError>>,
}

impl ZapiError {
    /// Build a validation error from field errors
    pub fn validation(details: Vec<FieldValidationError>) -> Self {
        ZapiError::Validation {
            message: "Validation failed".to_string(),
            details,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ZapiError::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ZapiError::Internal(message.into())
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ZapiError::Validation { .. } => ErrorCode::ValidationError,
            ZapiError::Unauthorized(_) => ErrorCode::Unauthorized,
            ZapiError::Forbidden(_) => ErrorCode::Forbidden,
            ZapiError::NotFound(_) => ErrorCode::NotFound,
            ZapiError::Conflict(_) => ErrorCode::Conflict,
            ZapiError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        self.error_code().status_code()
    }

    /// Convert to the wire body.
    ///
    /// In production mode internal error messages are replaced by a generic one.
    pub fn to_body(&self, production: bool) -> ErrorBody {
        let message = match self {
            ZapiError::Internal(_) if production => GENERIC_INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        };
        let details = match self {
            ZapiError::Validation { details, .. } => Some(details.clone()),
            _ => None,
        };

        ErrorBody {
            error: ErrorPayload {
                code: self.error_code(),
                message,
                details,
            },
        }
    }
}

// =============================================================================
// Driver Errors
// =============================================================================

/// Errors reported by a persistence driver
#[derive(Debug, Error)]
pub enum DriverError {
    /// A unique constraint was violated
    #[error("Unique constraint failed on {entity}.{}", .fields.join(", "))]
    UniqueViolation { entity: String, fields: Vec<String> },

    /// A write targeted a record that does not exist
    #[error("{entity} record not found")]
    RecordNotFound { entity: String },

    /// A foreign key references a missing record
    #[error("Foreign key constraint failed on {entity}.{field}")]
    ForeignKeyViolation { entity: String, field: String },

    /// The driver does not implement the requested capability
    #[error("Driver does not support {0}")]
    Unsupported(String),

    /// Any other backend failure
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<DriverError> for ZapiError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::UniqueViolation { ref fields, .. } => ZapiError::Conflict(format!(
                "A record with this {} already exists",
                fields.join(", ")
            )),
            DriverError::RecordNotFound { entity } => {
                ZapiError::NotFound(format!("{} not found", entity))
            }
            DriverError::ForeignKeyViolation { ref field, .. } => ZapiError::Validation {
                message: "Invalid relation".to_string(),
                details: vec![FieldValidationError::new(
                    "relation",
                    format!("Related record for '{}' does not exist", field),
                )],
            },
            other => ZapiError::Internal(other.to_string()),
        }
    }
}

// =============================================================================
// Plugin Errors
// =============================================================================

/// Boot-time plugin errors. These are fatal and never become HTTP responses.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin factory \"{id}\" is already registered")]
    DuplicateFactory { id: String },

    #[error("Plugin \"{id}\" is already registered")]
    DuplicateInstance { id: String },

    #[error("Plugin factory \"{id}\" failed: {source}")]
    FactoryFailed {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Plugin \"{id}\" not found")]
    PluginNotFound { id: String },

    #[error("Entity \"{entity}\" not found in plugin \"{plugin_id}\"")]
    EntityNotFound { plugin_id: String, entity: String },

    #[error("Entity \"{entity}\" not found")]
    LocalEntityNotFound { entity: String },

    #[error("Invalid entity reference \"{reference}\"")]
    InvalidReference { reference: String },

    #[error("Circular dependency detected involving plugin \"{plugin_id}\"")]
    CircularDependency { plugin_id: String },

    #[error("Plugin \"{plugin_id}\" depends on missing plugin \"{dependency}\"")]
    MissingDependency {
        plugin_id: String,
        dependency: String,
    },

    #[error("Failed to initialize plugin \"{plugin_id}\": {source}")]
    InitFailed {
        plugin_id: String,
        #[source]
        source: anyhow::Error,
    },
}

// =============================================================================
// Entity Errors
// =============================================================================

/// Errors raised while constructing entities
#[derive(Debug, Error)]
pub enum EntityError {
    #[error("Invalid entity name \"{name}\": must start with a lowercase letter and contain only letters and digits")]
    InvalidName { name: String },

    #[error("Field \"{field}\" is declared more than once on entity \"{entity}\"")]
    DuplicateField { entity: String, field: String },

    #[error("Field \"{field}\" on entity \"{entity}\" is not a belongsTo relation")]
    NotBelongsTo { entity: String, field: String },

    #[error("Relation \"{field}\" on entity \"{entity}\" could not be resolved: {source}")]
    UnresolvedRelation {
        entity: String,
        field: String,
        #[source]
        source: PluginError,
    },
}

impl From<PluginError> for ZapiError {
    fn from(err: PluginError) -> Self {
        ZapiError::Internal(err.to_string())
    }
}

impl From<EntityError> for ZapiError {
    fn from(err: EntityError) -> Self {
        ZapiError::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for ZapiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ZapiError>() {
            Ok(zapi_err) => zapi_err,
            Err(other) => ZapiError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ZapiError {
    fn from(err: serde_json::Error) -> Self {
        ZapiError::Validation {
            message: "Invalid JSON".to_string(),
            details: vec![FieldValidationError::new("body", err.to_string())],
        }
    }
}

// =============================================================================
// Result type alias
// =============================================================================

/// A specialized Result type for request processing
pub type ZapiResult<T> = Result<T, ZapiError>;

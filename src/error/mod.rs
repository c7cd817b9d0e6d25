//! Error handling for the credential pool.
//!
//! Store-level failures (`NotFound`, duplicates) are plain values so the
//! resolver and failover executor can branch on them. Only storage outages
//! and corrupted records are treated as fatal for the current request.
//! HTTP adapters render every variant as an RFC 7807 problem document.

pub mod types;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Standard error response format following RFC 7807 Problem Details
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// A URI reference that identifies the problem type
    #[serde(rename = "type")]
    pub error_type: String,

    /// A short, human-readable summary of the problem type
    pub title: String,

    /// The HTTP status code
    pub status: u16,

    /// A human-readable explanation specific to this occurrence
    pub detail: String,

    /// A URI reference that identifies the specific occurrence
    pub instance: String,

    /// Request ID for tracing
    pub request_id: Option<String>,
}

/// Kind of record a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Credential,
    Backup,
    Binding,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Credential => "credential",
            Self::Backup => "backup",
            Self::Binding => "binding",
        };
        f.write_str(name)
    }
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    // Configuration errors
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String, line: Option<usize> },

    // Store-level outcomes
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    #[error("Credential id already exists: {id}")]
    DuplicateId { id: String },

    #[error("Binding already exists: {target_id} -> {credential_id}")]
    DuplicateBinding {
        target_id: String,
        credential_id: String,
    },

    #[error("Backup is already available: {id}")]
    AlreadyAvailable { id: String },

    // Routing outcomes
    #[error("No healthy credential bound to target: {target_id}")]
    NoHealthyCredential { target_id: String },

    #[error("Credential pool exhausted for target: {target_id}")]
    PoolExhausted { target_id: String },

    #[error("Request was cancelled before the next upstream attempt")]
    Cancelled,

    // Validation errors
    #[error("Validation failed: {field} - {message}")]
    Validation { field: String, message: String },

    // Storage errors
    #[error("Redis connection failed: {message}")]
    RedisConnection { message: String },

    #[error("Redis operation failed: {operation} - {message}")]
    RedisOperation { operation: String, message: String },

    #[error("Stored record is corrupted: {key} - {message}")]
    StorageCorruption { key: String, message: String },

    // System errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl AppError {
    /// Create a new configuration validation error
    pub fn config_validation(message: impl Into<String>, field: Option<impl Into<String>>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
            field: field.map(Into::into),
        }
    }

    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create a new internal error with context
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn corrupted(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StorageCorruption {
            key: key.into(),
            message: message.into(),
        }
    }

    /// True for outcomes an admin caller can recover from locally.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::DuplicateId { .. }
                | Self::DuplicateBinding { .. }
                | Self::AlreadyAvailable { .. }
                | Self::Validation { .. }
                | Self::NoHealthyCredential { .. }
        )
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            Self::ConfigParse { .. } | Self::Validation { .. } | Self::Serialization { .. } => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            Self::NotFound { .. } | Self::ConfigNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            Self::DuplicateId { .. }
            | Self::DuplicateBinding { .. }
            | Self::AlreadyAvailable { .. } => StatusCode::CONFLICT,

            // 408 Request Timeout
            Self::Cancelled => StatusCode::REQUEST_TIMEOUT,

            // 500 Internal Server Error
            Self::ConfigValidation { .. }
            | Self::Internal { .. }
            | Self::StorageCorruption { .. } => StatusCode::INTERNAL_SERVER_ERROR,

            // 503 Service Unavailable
            Self::NoHealthyCredential { .. }
            | Self::PoolExhausted { .. }
            | Self::RedisConnection { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            Self::RedisOperation { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Get the error type URI for RFC 7807 compliance
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ConfigValidation { .. }
            | Self::ConfigNotFound { .. }
            | Self::ConfigParse { .. } => {
                "https://key-relay.dev/errors/configuration"
            }
            Self::RedisConnection { .. }
            | Self::RedisOperation { .. }
            | Self::StorageCorruption { .. } => "https://key-relay.dev/errors/storage",
            Self::NotFound { .. } => "https://key-relay.dev/errors/not-found",
            Self::DuplicateId { .. }
            | Self::DuplicateBinding { .. }
            | Self::AlreadyAvailable { .. } => {
                "https://key-relay.dev/errors/conflict"
            }
            Self::NoHealthyCredential { .. } | Self::PoolExhausted { .. } | Self::Cancelled => {
                "https://key-relay.dev/errors/routing"
            }
            Self::Validation { .. } => "https://key-relay.dev/errors/validation",
            _ => "https://key-relay.dev/errors/internal",
        }
    }

    /// Get a human-readable title for the error
    pub fn title(&self) -> &'static str {
        match self {
            Self::ConfigValidation { .. }
            | Self::ConfigNotFound { .. }
            | Self::ConfigParse { .. } => {
                "Configuration Error"
            }
            Self::RedisConnection { .. }
            | Self::RedisOperation { .. }
            | Self::StorageCorruption { .. } => "Storage Error",
            Self::NotFound { .. } => "Not Found",
            Self::DuplicateId { .. }
            | Self::DuplicateBinding { .. }
            | Self::AlreadyAvailable { .. } => {
                "Conflict"
            }
            Self::NoHealthyCredential { .. } | Self::PoolExhausted { .. } => "Upstream Unavailable",
            Self::Cancelled => "Request Cancelled",
            Self::Validation { .. } => "Validation Error",
            _ => "Internal Server Error",
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self, request_id: Option<&str>) {
        let request_id = request_id.unwrap_or("unknown");

        if self.status_code().is_server_error() {
            error!(
                error = %self,
                request_id = request_id,
                error_type = self.error_type(),
                "Application error occurred"
            );
        } else {
            warn!(
                error = %self,
                request_id = request_id,
                error_type = self.error_type(),
                "Client error occurred"
            );
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();

        self.log(Some(&request_id));

        let status = self.status_code();
        let error_response = ErrorResponse {
            error_type: self.error_type().to_string(),
            title: self.title().to_string(),
            status: status.as_u16(),
            detail: self.to_string(),
            instance: format!("/errors/{request_id}"),
            request_id: Some(request_id),
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for the application
pub type Result<T, E = AppError> = std::result::Result<T, E>;

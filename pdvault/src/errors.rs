use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

use crate::storage::StorageError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Personal access token missing or not resolvable to an account
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Caller failed the trusted-application capability check
    #[error("{message}")]
    InvalidCredentials { message: String },

    /// Business-rule violation (wrong password, failed email sync, ...)
    #[error("{message}")]
    InvalidOperation {
        message: String,
        context: Option<serde_json::Value>,
    },

    /// Reset token unknown, expired, or bound to another username
    #[error("{message}")]
    InvalidAccessToken { message: String },

    /// Request parameters failed format validation
    #[error("{message}")]
    InvalidParameters { message: String },

    /// Requested resource not found
    #[error("Unknown {resource} \"{id}\"")]
    UnknownResource { resource: String, id: String },

    /// Internal consistency fault: a pipeline invariant did not hold.
    /// Never reachable from valid client input.
    #[error("Assertion failed: {message}")]
    Assertion { message: String },

    /// Storage collaborator failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Business-rule violation with an optional structured context that is
    /// returned to the caller alongside the message.
    pub fn invalid_operation(message: impl Into<String>, context: Option<serde_json::Value>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
            context,
        }
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Error::Assertion { message: message.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InvalidCredentials { .. } => StatusCode::UNAUTHORIZED,
            Error::InvalidOperation { .. } => StatusCode::BAD_REQUEST,
            Error::InvalidAccessToken { .. } => StatusCode::UNAUTHORIZED,
            Error::InvalidParameters { .. } => StatusCode::BAD_REQUEST,
            Error::UnknownResource { .. } => StatusCode::NOT_FOUND,
            Error::Assertion { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Storage(storage_err) => match storage_err {
                StorageError::NotFound => StatusCode::NOT_FOUND,
                StorageError::Conflict { .. } => StatusCode::CONFLICT,
                StorageError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable identifier for the error kind.
    pub fn error_id(&self) -> &'static str {
        match self {
            Error::Unauthenticated { .. } => "invalid-access-token",
            Error::InvalidCredentials { .. } => "invalid-credentials",
            Error::InvalidOperation { .. } => "invalid-operation",
            Error::InvalidAccessToken { .. } => "invalid-access-token",
            Error::InvalidParameters { .. } => "invalid-parameters-format",
            Error::UnknownResource { .. } => "unknown-resource",
            Error::Storage(StorageError::NotFound) => "unknown-resource",
            Error::Storage(StorageError::Conflict { .. }) => "item-already-exists",
            Error::Assertion { .. } | Error::Storage(StorageError::Other(_)) | Error::Other(_) => "unexpected",
        }
    }

    /// User-safe error message, without leaking internal detail.
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message
                .clone()
                .unwrap_or_else(|| "The access token is missing or invalid".to_string()),
            Error::InvalidCredentials { message } => message.clone(),
            Error::InvalidOperation { message, .. } => message.clone(),
            Error::InvalidAccessToken { message } => message.clone(),
            Error::InvalidParameters { message } => message.clone(),
            Error::UnknownResource { resource, id } => format!("Unknown {resource} \"{id}\""),
            Error::Storage(StorageError::NotFound) => "Resource not found".to_string(),
            Error::Storage(StorageError::Conflict { message }) => message.clone(),
            Error::Assertion { .. } | Error::Storage(StorageError::Other(_)) | Error::Other(_) => {
                "Unexpected error".to_string()
            }
        }
    }

    /// Structured context attached to the error, if any.
    fn data(&self) -> Option<serde_json::Value> {
        match self {
            Error::InvalidOperation { context, .. } => context.clone(),
            _ => None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Full detail into the logs, tiered by severity
        match &self {
            Error::Assertion { .. } | Error::Storage(StorageError::Other(_)) | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Storage(_) => {
                tracing::warn!("Storage error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::InvalidCredentials { .. } | Error::InvalidAccessToken { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::InvalidOperation { .. } | Error::InvalidParameters { .. } | Error::UnknownResource { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let mut error = json!({
            "id": self.error_id(),
            "message": self.user_message(),
        });
        if let Some(data) = self.data() {
            error["data"] = data;
        }

        (status, axum::response::Json(json!({ "error": error }))).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

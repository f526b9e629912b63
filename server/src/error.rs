//! Error types for the Engram server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use engram_store::{ErrorKind, StoreError};
use thiserror::Error;

use crate::mcp::protocol::JsonRpcError;

/// Errors surfaced by the service layer and its adapters.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Malformed or missing request input
    #[error("{0}")]
    Validation(String),

    /// A blocking task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

impl ServerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Validation(_) => ErrorKind::InvalidArgument,
            Self::Task(_) => ErrorKind::StorageFailure,
        }
    }

    /// Message safe to hand to clients
    pub fn public_message(&self) -> String {
        match self {
            Self::Store(e) => e.public_message(),
            Self::Validation(msg) => msg.clone(),
            Self::Task(_) => "Internal error".to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::StorageFailure => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::DependencyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<ServerError> for JsonRpcError {
    fn from(err: ServerError) -> Self {
        match err.kind() {
            ErrorKind::InvalidArgument => JsonRpcError::invalid_params(err.public_message()),
            _ => JsonRpcError::internal_error(err.public_message()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (
            status,
            Json(serde_json::json!({ "error": self.public_message() })),
        )
            .into_response()
    }
}

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServerError::from(StoreError::not_found("ep-1")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::validation("bad timestamp").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::from(StoreError::NoUpdatesProvided).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::from(StoreError::unavailable("embedder down")).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServerError::Task("join".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_jsonrpc_mapping() {
        let err: JsonRpcError = ServerError::validation("content is required").into();
        assert_eq!(err.code, JsonRpcError::INVALID_PARAMS);
        assert_eq!(err.message, "content is required");

        let err: JsonRpcError = ServerError::from(StoreError::schema("broken")).into();
        assert_eq!(err.code, JsonRpcError::INTERNAL_ERROR);
    }

    #[test]
    fn test_task_details_hidden() {
        let err = ServerError::Task("panicked at src/memory.rs".into());
        assert_eq!(err.public_message(), "Internal error");
    }
}

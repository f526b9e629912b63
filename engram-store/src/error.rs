//! Error types for engram-store

use thiserror::Error;

/// Coarse classification of store errors, used by adapters to pick a
/// protocol-level response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation targeted an id that does not exist
    NotFound,
    /// Caller supplied structurally invalid input
    InvalidArgument,
    /// Underlying engine failure
    StorageFailure,
    /// The embedding gateway failed or timed out
    DependencyUnavailable,
}

/// Errors that can occur in the episode store
#[derive(Debug, Error)]
pub enum StoreError {
    /// No episode with the given id
    #[error("Episode not found: {0}")]
    NotFound(String),

    /// Update called with an empty parameter set
    #[error("No updates provided")]
    NoUpdatesProvided,

    /// Structurally invalid input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Vector length does not match the embedding column
    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Caller-supplied id is already taken
    #[error("Episode already exists: {0}")]
    DuplicateId(String),

    /// RocksDB error, tagged with the operation that failed
    #[error("Storage error during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: rocksdb::Error,
    },

    /// Serialization error (bincode)
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored value has a shape the decoder does not recognize
    #[error("Decode error: {0}")]
    Decode(String),

    /// Catalog or table definition problem
    #[error("Schema error: {0}")]
    Schema(String),

    /// Migration aborted
    #[error("Migration failed at step '{step}': {reason}")]
    Migration { step: &'static str, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedding gateway failure or timeout
    #[error("Embedding service unavailable: {0}")]
    DependencyUnavailable(String),
}

impl StoreError {
    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create an invalid argument error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Wrap a RocksDB error with the failing operation
    pub fn storage(operation: &'static str, source: rocksdb::Error) -> Self {
        Self::Storage { operation, source }
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a migration error for the named step
    pub fn migration(step: &'static str, reason: impl ToString) -> Self {
        Self::Migration {
            step,
            reason: reason.to_string(),
        }
    }

    /// Create a dependency error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::DependencyUnavailable(msg.into())
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NoUpdatesProvided | Self::InvalidArgument(_) | Self::DimensionMismatch { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::DependencyUnavailable(_) => ErrorKind::DependencyUnavailable,
            Self::DuplicateId(_)
            | Self::Storage { .. }
            | Self::Bincode(_)
            | Self::Json(_)
            | Self::Decode(_)
            | Self::Schema(_)
            | Self::Migration { .. }
            | Self::Io(_) => ErrorKind::StorageFailure,
        }
    }

    /// Message that is safe to show to remote clients. Storage failures
    /// only reveal the operation name.
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage { operation, .. } => format!("Storage error during {operation}"),
            other if other.kind() == ErrorKind::StorageFailure => "Storage error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Extension for tagging RocksDB results with the operation name
pub(crate) trait StorageContext<T> {
    fn during(self, operation: &'static str) -> Result<T>;
}

impl<T> StorageContext<T> for std::result::Result<T, rocksdb::Error> {
    fn during(self, operation: &'static str) -> Result<T> {
        self.map_err(|e| StoreError::storage(operation, e))
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

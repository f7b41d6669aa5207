use thiserror::Error;

/// Errors from storage backends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Record to mutate does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Record to create already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Stored bytes could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Underlying backend failed
    #[error("backend error: {0}")]
    Backend(String),
}

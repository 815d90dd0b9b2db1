use thiserror::Error;

/// Errors surfaced by the storage contract.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The addressed row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Optimistic-concurrency or uniqueness violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A foreign reference points at a row that does not exist.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// The back end does not implement this optional capability.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Underlying back-end failure.
    #[error("storage error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StorageError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Short error code string for hosts that log codes rather than text.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::NotFound { .. } => "NOT_FOUND",
            StorageError::Conflict(_) => "CONFLICT",
            StorageError::InvalidReference(_) => "INVALID_REFERENCE",
            StorageError::NotSupported(_) => "NOT_SUPPORTED",
            StorageError::Backend(_) => "STORAGE_ERROR",
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

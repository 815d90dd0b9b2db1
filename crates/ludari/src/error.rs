use thiserror::Error;

use ludari_crypto::CryptoError;
use ludari_storage::StorageError;

/// Errors surfaced by the Manager's public API.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Invalid caller input. Never logged by the engine, always surfaced.
    #[error("validation error: {0}")]
    Validation(String),

    /// A public API was called before `initialize()`.
    #[error("manager is not initialized; call initialize() first")]
    NotInitialized,

    /// A public API was called after `destroy()`.
    #[error("manager has been destroyed")]
    Destroyed,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The Control retry helper gave up after repeated conflicts.
    #[error("control update failed after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
}

impl ManagerError {
    /// Short error code string for hosts that log codes rather than text.
    pub fn code(&self) -> &'static str {
        match self {
            ManagerError::Validation(_) => "VALIDATION_ERROR",
            ManagerError::NotInitialized => "NOT_INITIALIZED",
            ManagerError::Destroyed => "DESTROYED",
            ManagerError::Storage(e) => e.code(),
            ManagerError::Crypto(e) => e.code(),
            ManagerError::RetryExhausted { .. } => "RETRY_EXHAUSTED",
        }
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;

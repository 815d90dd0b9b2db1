//! `ludari-crypto` — at-rest protection for job query strings.
//!
//! Three pieces:
//!
//! - the **envelope**: base64(IV ‖ salt ‖ ciphertext) over AES-256-CTR with
//!   a PBKDF2-HMAC-SHA256 derived key; every encryption draws a fresh IV and
//!   salt so identical plaintexts produce distinct envelopes,
//! - **secret strength** rules enforced when a Manager is constructed with a
//!   query secret,
//! - the **sanitizer** a decrypted query must pass before it reaches the
//!   storage back end.

mod envelope;
mod sanitize;
mod secret;

pub use envelope::{decrypt, encrypt};
pub use sanitize::sanitize_query;
pub use secret::validate_query_secret;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The configured query secret fails the strength rules.
    #[error("weak query secret: {0}")]
    WeakSecret(String),

    /// Deliberately opaque: the cause of a decrypt failure is never leaked.
    #[error("failed to decrypt")]
    DecryptFailed,

    /// The query was rejected by the sanitizer.
    #[error("query rejected: {0}")]
    QueryRejected(String),
}

impl CryptoError {
    /// Short error code string for hosts that log codes rather than text.
    pub fn code(&self) -> &'static str {
        match self {
            CryptoError::WeakSecret(_) => "WEAK_SECRET",
            CryptoError::DecryptFailed => "DECRYPT_FAILED",
            CryptoError::QueryRejected(_) => "QUERY_REJECTED",
        }
    }
}

pub type Result<T> = std::result::Result<T, CryptoError>;

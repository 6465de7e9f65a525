use tcap_crypto::CryptoError;
use thiserror::Error;

use crate::types::CapsuleStatus;

pub type CapsuleResult<T> = Result<T, CapsuleError>;

#[derive(Debug, Error)]
pub enum CapsuleError {
    #[error("key generation error: {0}")]
    KeyGeneration(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    /// Wrong key, corruption and tampering are deliberately not told apart.
    #[error("decryption failed")]
    Decryption,

    #[error("access denied")]
    AccessDenied,

    #[error("no delivery condition has been met")]
    ConditionNotMet,

    #[error("password mismatch")]
    PasswordMismatch,

    #[error("capsule not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: CapsuleStatus, to: CapsuleStatus },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<CryptoError> for CapsuleError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::KeyGeneration(msg) => CapsuleError::KeyGeneration(msg),
            CryptoError::Decryption => CapsuleError::Decryption,
            CryptoError::InvalidKey(msg) => CapsuleError::InvalidInput(msg),
            CryptoError::Sharing(msg) => CapsuleError::InvalidInput(msg),
            CryptoError::Encryption(msg) | CryptoError::Kdf(msg) | CryptoError::Task(msg) => {
                CapsuleError::Encryption(msg)
            }
        }
    }
}

use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Wrong key, corrupted data and tampering all collapse into this variant.
    #[error("decryption failed")]
    Decryption,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("secret sharing error: {0}")]
    Sharing(String),

    #[error("crypto task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for CryptoError {
    fn from(e: tokio::task::JoinError) -> Self {
        CryptoError::Task(e.to_string())
    }
}

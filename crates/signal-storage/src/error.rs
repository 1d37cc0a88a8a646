//! Storage error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid uuid: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Invalid phone number: {0}")]
    InvalidNumber(String),

    #[error("Unknown key id: {0}")]
    InvalidKeyId(u32),

    #[error("Recipient is not registered: {0}")]
    UnregisteredRecipient(String),

    #[error("Recipient resolver is not attached")]
    ResolverNotWired,

    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl From<aes_gcm::Error> for StorageError {
    fn from(_: aes_gcm::Error) -> Self {
        StorageError::Crypto("AES-GCM encryption/decryption failed".to_string())
    }
}

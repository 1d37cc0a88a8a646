//! Manager error taxonomy.
//!
//! The CLI maps these variants onto its exit codes; everything the service or
//! the stores report is normalized into one of them here.

use signal_service::{KbsError, ServiceError};
use signal_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    UserError(String),

    #[error("Captcha required: {0}")]
    CaptchaRequired(String),

    #[error("Account is locked by a registration pin, {0} ms remaining")]
    PinLocked(u64),

    #[error("Incorrect pin, {0} tries remaining")]
    IncorrectPin(u32),

    #[error("Untrusted identity key for {0}")]
    UntrustedKey(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl From<StorageError> for Error {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidNumber(message) => {
                Error::UserError(format!("Invalid phone number: {message}"))
            }
            StorageError::UnregisteredRecipient(identifier) => {
                Error::UserError(format!("Recipient is not registered: {identifier}"))
            }
            other => Error::Io(other.to_string()),
        }
    }
}

impl From<ServiceError> for Error {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::CaptchaRequired(message) => Error::CaptchaRequired(message),
            ServiceError::Locked { time_remaining, .. } => Error::PinLocked(time_remaining),
            other => Error::Io(other.to_string()),
        }
    }
}

impl From<KbsError> for Error {
    fn from(error: KbsError) -> Self {
        match error {
            KbsError::WrongPin { tries_remaining } => Error::IncorrectPin(tries_remaining),
            // The server believes there is no backup for this account.
            other => Error::Io(other.to_string()),
        }
    }
}

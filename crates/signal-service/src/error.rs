//! Service error types.

use thiserror::Error;

use crate::types::AuthCredentials;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Captcha required: {0}")]
    CaptchaRequired(String),

    #[error("Account locked by registration lock, {time_remaining} ms remaining")]
    Locked {
        time_remaining: u64,
        backup_credentials: Option<AuthCredentials>,
    },

    #[error("Service error ({status}): {message}")]
    Api { status: u16, message: String },
}

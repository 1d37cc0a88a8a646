//! Key backup service client.
//!
//! The enclave is reached over an attested channel fronted by the backup
//! service; this client pins the expected MRENCLAVE and rejects responses
//! reporting a different enclave measurement.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use urlencoding::encode;

use crate::types::AuthCredentials;

#[derive(Debug, Error)]
pub enum KbsError {
    #[error("Key backup has no data for this account")]
    NoData,

    #[error("Wrong pin, {tries_remaining} tries remaining")]
    WrongPin { tries_remaining: u32 },

    #[error("Enclave attestation failed: {0}")]
    Attestation(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid enclave response: {0}")]
    Protocol(String),

    #[error("Key backup error ({status}): {message}")]
    Enclave { status: u16, message: String },
}

/// Backup token handed out by the enclave before a restore attempt.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KbsToken {
    pub token: String,
    #[serde(default)]
    pub tries: u32,
    #[serde(default)]
    mrenclave: Option<String>,
}

#[derive(Debug, Serialize)]
struct RestoreRequest<'a> {
    pin: String,
    token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreResponse {
    master_key: String,
}

#[derive(Debug, Deserialize)]
struct TriesResponse {
    tries: u32,
}

/// Client for the key backup enclave.
pub struct KeyBackupClient {
    client: Client,
    base_url: String,
    enclave_name: String,
    service_id: String,
    mrenclave: String,
}

impl KeyBackupClient {
    pub fn new(
        base_url: impl Into<String>,
        enclave_name: impl Into<String>,
        service_id: impl Into<String>,
        mrenclave: impl Into<String>,
    ) -> Result<Self, KbsError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            enclave_name: enclave_name.into(),
            service_id: service_id.into(),
            mrenclave: mrenclave.into(),
        })
    }

    /// Fetch a backup token using the credentials issued by the service.
    #[instrument(skip(self, credentials))]
    pub async fn get_token(&self, credentials: &AuthCredentials) -> Result<KbsToken, KbsError> {
        let url = format!(
            "{}/v1/token/{}",
            self.base_url,
            encode(&self.enclave_name)
        );
        let response = self
            .client
            .get(&url)
            .query(&[("serviceId", self.service_id.as_str())])
            .basic_auth(&credentials.username, Some(&credentials.password))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(KbsError::NoData);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = %status, "Key backup token request failed");
            return Err(KbsError::Enclave {
                status: status.as_u16(),
                message,
            });
        }

        let token: KbsToken = response
            .json()
            .await
            .map_err(|e| KbsError::Protocol(e.to_string()))?;
        if let Some(reported) = &token.mrenclave {
            if *reported != self.mrenclave {
                return Err(KbsError::Attestation(format!(
                    "enclave reported measurement {reported}, expected {}",
                    self.mrenclave
                )));
            }
        }
        debug!("Obtained key backup token, {} tries left", token.tries);
        Ok(token)
    }

    /// Exchange the pin for the account's master key.
    #[instrument(skip(self, pin, token, credentials))]
    pub async fn restore_master_key(
        &self,
        pin: &str,
        token: &str,
        credentials: &AuthCredentials,
    ) -> Result<[u8; 32], KbsError> {
        let url = format!(
            "{}/v1/backup/{}",
            self.base_url,
            encode(&self.enclave_name)
        );
        let request = RestoreRequest {
            pin: stretch_pin(pin),
            token,
        };
        let response = self
            .client
            .put(&url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            Err(KbsError::NoData)
        } else if status == StatusCode::CONFLICT {
            let tries = response
                .json::<TriesResponse>()
                .await
                .map(|t| t.tries)
                .unwrap_or(0);
            Err(KbsError::WrongPin {
                tries_remaining: tries,
            })
        } else if status.is_success() {
            let restored: RestoreResponse = response
                .json()
                .await
                .map_err(|e| KbsError::Protocol(e.to_string()))?;
            let bytes = base64_decode(&restored.master_key)?;
            <[u8; 32]>::try_from(bytes.as_slice())
                .map_err(|_| KbsError::Protocol("master key must be 32 bytes".to_string()))
        } else {
            let message = response.text().await.unwrap_or_default();
            warn!(status = %status, "Key backup restore failed");
            Err(KbsError::Enclave {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// The enclave never sees the raw pin, only a digest of its normalized form.
fn stretch_pin(pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pin.trim().as_bytes());
    hex::encode(hasher.finalize())
}

fn base64_decode(encoded: &str) -> Result<Vec<u8>, KbsError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD
        .decode(encoded)
        .map_err(|e| KbsError::Protocol(format!("invalid master key encoding: {e}")))
}

//! Service environment configuration.

use serde::Deserialize;

/// Endpoints and identity of the Signal service environment.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEnvironmentConfig {
    /// Signal service base URL
    #[serde(default = "default_service_url")]
    pub service_url: String,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Key backup service configuration
    #[serde(default)]
    pub key_backup: KeyBackupConfig,
}

/// Key backup enclave endpoint and pinned attestation values.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyBackupConfig {
    #[serde(default = "default_key_backup_url")]
    pub url: String,

    #[serde(default = "default_enclave_name")]
    pub enclave_name: String,

    #[serde(default = "default_service_id")]
    pub service_id: String,

    #[serde(default = "default_mrenclave")]
    pub mrenclave: String,
}

impl Default for ServiceEnvironmentConfig {
    fn default() -> Self {
        Self {
            service_url: default_service_url(),
            user_agent: default_user_agent(),
            key_backup: KeyBackupConfig::default(),
        }
    }
}

impl Default for KeyBackupConfig {
    fn default() -> Self {
        Self {
            url: default_key_backup_url(),
            enclave_name: default_enclave_name(),
            service_id: default_service_id(),
            mrenclave: default_mrenclave(),
        }
    }
}

fn default_service_url() -> String {
    "https://textsecure-service.whispersystems.org".into()
}

fn default_user_agent() -> String {
    "signal-cli".into()
}

fn default_key_backup_url() -> String {
    "https://api.backup.signal.org".into()
}

fn default_enclave_name() -> String {
    "fe7c1bfae98f9b073d220366ea31163ee82f6d04bead774f71ca8e5c40847bfe".into()
}

fn default_service_id() -> String {
    "fe7c1bfae98f9b073d220366ea31163ee82f6d04bead774f71ca8e5c40847bfe".into()
}

fn default_mrenclave() -> String {
    "a3baab19ef6ce6f34ab9ebb25ba722725ae44a8872dc0ff08ad6d83a9489de87".into()
}

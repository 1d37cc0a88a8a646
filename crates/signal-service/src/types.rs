//! Signal service API types.

use serde::{Deserialize, Serialize};

/// Basic-auth credentials, also handed out by the service for the key backup
/// enclave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCredentials {
    pub username: String,
    pub password: String,
}

/// Response to a successful account verification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyAccountResponse {
    pub uuid: String,
    #[serde(default)]
    pub storage_capable: bool,
}

/// Body of a 423 registration-lock response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LockedResponse {
    pub time_remaining: u64,
    #[serde(default)]
    pub backup_credentials: Option<AuthCredentials>,
}

/// Attributes describing this device to the service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub registration_id: u32,
    pub fetches_messages: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_lock: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unidentified_access_key: Option<String>,
    pub unrestricted_unidentified_access: bool,
    pub discoverable_by_phone_number: bool,
    pub capabilities: DeviceCapabilities,
}

/// Feature flags this client supports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    pub gv2: bool,
    pub storage: bool,
    pub gv1_migration: bool,
    pub sender_key: bool,
    pub announcement_group: bool,
    pub change_number: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            gv2: true,
            storage: true,
            gv1_migration: true,
            sender_key: false,
            announcement_group: false,
            change_number: false,
        }
    }
}

/// One-time pre-key batch upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyState {
    pub identity_key: String,
    pub pre_keys: Vec<PreKeyEntity>,
    pub signed_pre_key: SignedPreKeyEntity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyEntity {
    pub key_id: u32,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKeyEntity {
    pub key_id: u32,
    pub public_key: String,
    pub signature: String,
}

/// Remote storage manifest header.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageManifest {
    pub version: u64,
}

/// Profile upload. The name is ciphertext under the account's profile key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileWrite {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    pub avatar: bool,
}

//! Persistent state of the local device.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::StorageError;
use crate::keys::{IdentityKeyPair, MasterKey, ProfileKey};

/// Device id of the primary device.
pub const PRIMARY_DEVICE_ID: u32 = 1;

/// Pre-key ids wrap at the protocol's medium integer bound.
pub const PRE_KEY_MAX_ID: u32 = 0xFF_FFFF;

/// The local Signal account, owned exclusively by whichever manager currently
/// drives it. Every mutation is persisted immediately.
pub struct SignalAccount {
    file: PathBuf,
    number: String,
    password: String,
    aci: Option<Uuid>,
    device_id: u32,
    registration_id: u32,
    identity_key_pair: IdentityKeyPair,
    profile_key: ProfileKey,
    pin_master_key: Option<MasterKey>,
    registration_lock_pin: Option<String>,
    registered: bool,
    unrestricted_unidentified_access: bool,
    discoverable_by_phone_number: bool,
    encrypted_device_name: Option<String>,
    pre_key_id_offset: u32,
    next_signed_pre_key_id: u32,
}

impl SignalAccount {
    /// Create a fresh, unregistered account and persist it to `file`.
    pub fn create(file: impl Into<PathBuf>, number: &str) -> Result<Self, StorageError> {
        let mut rng = rand::thread_rng();
        let mut password_bytes = [0u8; 18];
        rng.fill_bytes(&mut password_bytes);

        let account = Self {
            file: file.into(),
            number: number.to_string(),
            password: BASE64.encode(password_bytes),
            aci: None,
            device_id: PRIMARY_DEVICE_ID,
            // 14-bit registration id, never zero.
            registration_id: rng.gen_range(1..=0x3FFF),
            identity_key_pair: IdentityKeyPair::generate(),
            profile_key: ProfileKey::generate(),
            pin_master_key: None,
            registration_lock_pin: None,
            registered: false,
            unrestricted_unidentified_access: false,
            discoverable_by_phone_number: true,
            encrypted_device_name: None,
            pre_key_id_offset: rng.gen_range(0..PRE_KEY_MAX_ID),
            next_signed_pre_key_id: rng.gen_range(0..PRE_KEY_MAX_ID),
        };
        debug!("Creating new account file for {}", account.number);
        account.save()?;
        Ok(account)
    }

    pub fn load(file: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let file = file.into();
        let bytes = fs::read(&file)?;
        let stored: StoredAccount = serde_json::from_slice(&bytes)?;

        let aci = stored.aci.as_deref().map(Uuid::parse_str).transpose()?;
        let identity_key_pair = IdentityKeyPair::from_base64(&stored.identity_key_pair)?;
        let profile_key = ProfileKey::from_base64(&stored.profile_key)
            .ok_or_else(|| StorageError::Crypto("invalid profile key in account file".into()))?;
        let pin_master_key = match stored.pin_master_key.as_deref() {
            Some(encoded) => Some(MasterKey::from_base64(encoded).ok_or_else(|| {
                StorageError::Crypto("invalid master key in account file".into())
            })?),
            None => None,
        };

        Ok(Self {
            file,
            number: stored.number,
            password: stored.password,
            aci,
            device_id: stored.device_id,
            registration_id: stored.registration_id,
            identity_key_pair,
            profile_key,
            pin_master_key,
            registration_lock_pin: stored.registration_lock_pin,
            registered: stored.registered,
            unrestricted_unidentified_access: stored.unrestricted_unidentified_access,
            discoverable_by_phone_number: stored.discoverable_by_phone_number,
            encrypted_device_name: stored.encrypted_device_name,
            pre_key_id_offset: stored.pre_key_id_offset,
            next_signed_pre_key_id: stored.next_signed_pre_key_id,
        })
    }

    /// Directory holding this account's store files.
    pub fn data_dir(&self) -> &Path {
        self.file.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn aci(&self) -> Option<Uuid> {
        self.aci
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn identity_key_pair(&self) -> &IdentityKeyPair {
        &self.identity_key_pair
    }

    pub fn profile_key(&self) -> &ProfileKey {
        &self.profile_key
    }

    pub fn pin_master_key(&self) -> Option<&MasterKey> {
        self.pin_master_key.as_ref()
    }

    pub fn registration_lock_pin(&self) -> Option<&str> {
        self.registration_lock_pin.as_deref()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn is_unrestricted_unidentified_access(&self) -> bool {
        self.unrestricted_unidentified_access
    }

    pub fn is_discoverable_by_phone_number(&self) -> bool {
        self.discoverable_by_phone_number
    }

    pub fn encrypted_device_name(&self) -> Option<&str> {
        self.encrypted_device_name.as_deref()
    }

    /// The key proving permission for sealed-sender delivery to this account.
    pub fn self_unidentified_access_key(&self) -> Result<[u8; 16], StorageError> {
        self.profile_key.derive_access_key()
    }

    pub fn set_registered(&mut self, registered: bool) -> Result<(), StorageError> {
        self.registered = registered;
        self.save()
    }

    /// Record the outcome of a successful verification.
    ///
    /// Without a registration lock the previous pin and master key are
    /// cleared; with one, the master key retrieved from the key backup and
    /// the pin that unlocked it are kept.
    pub fn finish_registration(
        &mut self,
        aci: Uuid,
        master_key: Option<MasterKey>,
        pin: Option<String>,
    ) -> Result<(), StorageError> {
        self.aci = Some(aci);
        self.pin_master_key = master_key;
        self.registration_lock_pin = pin;
        self.registered = true;
        self.save()
    }

    pub fn pre_key_id_offset(&self) -> u32 {
        self.pre_key_id_offset
    }

    pub fn next_signed_pre_key_id(&self) -> u32 {
        self.next_signed_pre_key_id
    }

    /// Advance the one-time pre-key id counter after uploading a batch.
    pub fn advance_pre_key_id_offset(&mut self, count: u32) -> Result<(), StorageError> {
        self.pre_key_id_offset = (self.pre_key_id_offset + count) % PRE_KEY_MAX_ID;
        self.save()
    }

    pub fn advance_signed_pre_key_id(&mut self) -> Result<(), StorageError> {
        self.next_signed_pre_key_id = (self.next_signed_pre_key_id + 1) % PRE_KEY_MAX_ID;
        self.save()
    }

    fn save(&self) -> Result<(), StorageError> {
        let stored = StoredAccount {
            number: self.number.clone(),
            password: self.password.clone(),
            aci: self.aci.map(|u| u.to_string()),
            device_id: self.device_id,
            registration_id: self.registration_id,
            identity_key_pair: self.identity_key_pair.to_base64(),
            profile_key: self.profile_key.to_base64(),
            pin_master_key: self.pin_master_key.as_ref().map(MasterKey::to_base64),
            registration_lock_pin: self.registration_lock_pin.clone(),
            registered: self.registered,
            unrestricted_unidentified_access: self.unrestricted_unidentified_access,
            discoverable_by_phone_number: self.discoverable_by_phone_number,
            encrypted_device_name: self.encrypted_device_name.clone(),
            pre_key_id_offset: self.pre_key_id_offset,
            next_signed_pre_key_id: self.next_signed_pre_key_id,
        };

        // Serialize to memory first so an error cannot truncate the file.
        let buffer = serde_json::to_vec(&stored)?;
        fs::write(&self.file, buffer)?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredAccount {
    number: String,
    password: String,
    aci: Option<String>,
    device_id: u32,
    registration_id: u32,
    identity_key_pair: String,
    profile_key: String,
    pin_master_key: Option<String>,
    registration_lock_pin: Option<String>,
    registered: bool,
    unrestricted_unidentified_access: bool,
    discoverable_by_phone_number: bool,
    encrypted_device_name: Option<String>,
    pre_key_id_offset: u32,
    next_signed_pre_key_id: u32,
}

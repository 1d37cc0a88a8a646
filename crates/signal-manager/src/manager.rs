//! Long-lived manager owning a verified account.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use tracing::{debug, instrument};
use x25519_dalek::{PublicKey, StaticSecret};

use signal_service::{
    PreKeyEntity, PreKeyState, ProfileWrite, SignalServiceClient, SignedPreKeyEntity,
};
use signal_storage::account::PRE_KEY_MAX_ID;
use signal_storage::{AccountStorage, SignalAccount};

use crate::config::ServiceEnvironmentConfig;
use crate::error::Error;

/// Number of one-time pre-keys uploaded per refresh.
pub const PRE_KEY_BATCH_SIZE: u32 = 100;

/// Owner of a verified account and its stores.
///
/// Constructed by the registration manager once verification succeeds; the
/// account moves in and never escapes again.
pub struct Manager {
    storage: AccountStorage,
    service: SignalServiceClient,
}

impl Manager {
    pub fn new(account: SignalAccount, config: &ServiceEnvironmentConfig) -> Result<Self, Error> {
        // Authenticate as the ACI once the account has one.
        let username = account
            .aci()
            .map(|aci| aci.to_string())
            .unwrap_or_else(|| account.number().to_string());
        let service = SignalServiceClient::with_credentials(
            &config.service_url,
            &config.user_agent,
            username,
            account.password(),
        )?;
        let storage = AccountStorage::open(account)?;

        Ok(Self { storage, service })
    }

    pub fn account(&self) -> &SignalAccount {
        &self.storage.account
    }

    pub fn storage(&self) -> &AccountStorage {
        &self.storage
    }

    /// Generate and upload a batch of one-time pre-keys and a fresh signed
    /// pre-key.
    #[instrument(skip(self))]
    pub async fn refresh_pre_keys(&mut self) -> Result<(), Error> {
        let identity_key = self.storage.account.identity_key_pair().public_key();

        let mut pre_keys = Vec::with_capacity(PRE_KEY_BATCH_SIZE as usize);
        let offset = self.storage.account.pre_key_id_offset();
        for i in 0..PRE_KEY_BATCH_SIZE {
            let key_id = (offset + i) % PRE_KEY_MAX_ID;
            let (secret, public) = generate_key_pair();
            self.storage
                .protocol
                .store_pre_key(key_id, pre_key_record(&secret, &public));
            pre_keys.push(PreKeyEntity {
                key_id,
                public_key: BASE64.encode(public.as_bytes()),
            });
        }
        self.storage.account.advance_pre_key_id_offset(PRE_KEY_BATCH_SIZE)?;

        let signed_key_id = self.storage.account.next_signed_pre_key_id();
        let (secret, public) = generate_key_pair();
        let signature = self
            .storage
            .account
            .identity_key_pair()
            .sign(public.as_bytes());
        let mut record = pre_key_record(&secret, &public);
        record.extend_from_slice(&signature);
        self.storage
            .protocol
            .store_signed_pre_key(signed_key_id, record);
        self.storage.account.advance_signed_pre_key_id()?;

        let state = PreKeyState {
            identity_key: identity_key.to_base64(),
            pre_keys,
            signed_pre_key: SignedPreKeyEntity {
                key_id: signed_key_id,
                public_key: BASE64.encode(public.as_bytes()),
                signature: BASE64.encode(signature),
            },
        };
        self.service.set_pre_keys(&state).await.into_result()?;
        debug!("Uploaded {} pre-keys", PRE_KEY_BATCH_SIZE);
        Ok(())
    }

    /// Fetch the remote storage manifest.
    #[instrument(skip(self))]
    pub async fn retrieve_remote_storage(&self) -> Result<(), Error> {
        let manifest = self.service.get_storage_manifest().await.into_result()?;
        debug!("Remote storage manifest at version {}", manifest.version);
        Ok(())
    }

    /// Upload the profile, encrypted with the account's profile key. All
    /// fields may be empty; an empty profile still makes the account
    /// addressable in groups.
    #[instrument(skip_all)]
    pub async fn set_profile(
        &self,
        given_name: Option<&str>,
        family_name: Option<&str>,
        about: Option<&str>,
        about_emoji: Option<&str>,
    ) -> Result<(), Error> {
        let name = match (given_name, family_name) {
            (None, None) => String::new(),
            (given, family) => format!("{}\0{}", given.unwrap_or(""), family.unwrap_or("")),
        };
        let profile_key = self.storage.account.profile_key();
        let encrypted_name = profile_key.encrypt(name.as_bytes())?;
        let encrypted_about = match (about, about_emoji) {
            (None, None) => None,
            (about, emoji) => {
                let joined = format!("{}\0{}", about.unwrap_or(""), emoji.unwrap_or(""));
                Some(BASE64.encode(profile_key.encrypt(joined.as_bytes())?))
            }
        };

        let write = ProfileWrite {
            name: BASE64.encode(encrypted_name),
            about: encrypted_about,
            avatar: false,
        };
        self.service.write_profile(&write).await.into_result()?;
        Ok(())
    }
}

fn generate_key_pair() -> (StaticSecret, PublicKey) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let secret = StaticSecret::from(bytes);
    let public = PublicKey::from(&secret);
    (secret, public)
}

/// Record layout: 32 bytes secret, 32 bytes public (plus the signature for
/// signed pre-keys).
fn pre_key_record(secret: &StaticSecret, public: &PublicKey) -> Vec<u8> {
    let mut record = Vec::with_capacity(64);
    record.extend_from_slice(&secret.to_bytes());
    record.extend_from_slice(public.as_bytes());
    record
}

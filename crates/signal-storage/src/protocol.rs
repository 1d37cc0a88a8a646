//! Signal Protocol storage: identity keys, pre-keys, and sessions.
//!
//! Records are opaque serialized state owned by the protocol library. Session
//! and identity entries are keyed by recipient id: names (uuid or E.164) are
//! resolved through the [`RecipientStore`] so that a later merge reroutes all
//! associated state to the surviving recipient.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::error::StorageError;
use crate::keys::{IdentityKey, IdentityKeyPair};
use crate::recipients::{RecipientId, RecipientMergeHandler, RecipientStore};

/// How far an identity key is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    Untrusted,
    TrustedUnverified,
    TrustedVerified,
}

impl TrustLevel {
    pub fn is_trusted(self) -> bool {
        !matches!(self, TrustLevel::Untrusted)
    }

    fn name(self) -> &'static str {
        match self {
            TrustLevel::Untrusted => "UNTRUSTED",
            TrustLevel::TrustedUnverified => "TRUSTED_UNVERIFIED",
            TrustLevel::TrustedVerified => "TRUSTED_VERIFIED",
        }
    }

    fn from_name(name: &str) -> Self {
        match name {
            "TRUSTED_UNVERIFIED" => TrustLevel::TrustedUnverified,
            "TRUSTED_VERIFIED" => TrustLevel::TrustedVerified,
            _ => TrustLevel::Untrusted,
        }
    }
}

/// Stored identity key of a remote party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityInfo {
    pub identity_key: IdentityKey,
    pub trust_level: TrustLevel,
    pub added_timestamp: u64,
}

/// Protocol-level address: a name (uuid or E.164) plus a device id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtocolAddress {
    pub name: String,
    pub device_id: u32,
}

impl ProtocolAddress {
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionEntry {
    record: Vec<u8>,
    /// Cleared by `archive_session`; new outbound traffic must start fresh.
    current: bool,
}

/// Persistent protocol state of the local account.
pub struct ProtocolStore {
    identity_key_pair: IdentityKeyPair,
    registration_id: u32,
    resolver: OnceLock<Weak<RecipientStore>>,
    inner: Mutex<ProtocolInner>,
}

struct ProtocolInner {
    file: PathBuf,
    identities: HashMap<RecipientId, IdentityInfo>,
    pre_keys: HashMap<u32, Vec<u8>>,
    signed_pre_keys: HashMap<u32, Vec<u8>>,
    sessions: HashMap<(RecipientId, u32), SessionEntry>,
}

impl ProtocolStore {
    /// Load the store from `file`. A missing file is an empty store.
    pub fn load(
        file: impl Into<PathBuf>,
        identity_key_pair: IdentityKeyPair,
        registration_id: u32,
    ) -> Result<Self, StorageError> {
        let file = file.into();
        let storage = match fs::read(&file) {
            Ok(bytes) => serde_json::from_slice::<Storage>(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!("Creating new protocol store");
                Storage::default()
            }
            Err(e) => return Err(e.into()),
        };

        let mut identities = HashMap::new();
        for stored in storage.identities {
            // Entries with undecodable keys are dropped.
            if let Some(identity_key) = IdentityKey::from_base64(&stored.identity_key) {
                identities.insert(
                    RecipientId::new(stored.recipient_id),
                    IdentityInfo {
                        identity_key,
                        trust_level: TrustLevel::from_name(&stored.trust_level),
                        added_timestamp: stored.added_timestamp,
                    },
                );
            }
        }

        let decode_records = |records: Vec<StoredKeyRecord>| -> Result<HashMap<u32, Vec<u8>>, StorageError> {
            records
                .into_iter()
                .map(|r| {
                    let record = BASE64
                        .decode(&r.record)
                        .map_err(|e| StorageError::Crypto(format!("invalid key record: {e}")))?;
                    Ok((r.id, record))
                })
                .collect()
        };
        let pre_keys = decode_records(storage.pre_keys)?;
        let signed_pre_keys = decode_records(storage.signed_pre_keys)?;

        let mut sessions = HashMap::new();
        for stored in storage.sessions {
            let record = BASE64
                .decode(&stored.record)
                .map_err(|e| StorageError::Crypto(format!("invalid session record: {e}")))?;
            sessions.insert(
                (RecipientId::new(stored.recipient_id), stored.device_id),
                SessionEntry {
                    record,
                    current: stored.current,
                },
            );
        }

        Ok(Self {
            identity_key_pair,
            registration_id,
            resolver: OnceLock::new(),
            inner: Mutex::new(ProtocolInner {
                file,
                identities,
                pre_keys,
                signed_pre_keys,
                sessions,
            }),
        })
    }

    /// Attach the recipient store used to resolve names. Wired once by the
    /// account storage after both stores exist.
    pub fn set_resolver(&self, resolver: Weak<RecipientStore>) {
        if self.resolver.set(resolver).is_err() {
            debug!("Recipient resolver already attached");
        }
    }

    pub fn identity_key_pair(&self) -> &IdentityKeyPair {
        &self.identity_key_pair
    }

    pub fn local_registration_id(&self) -> u32 {
        self.registration_id
    }

    fn locked(&self) -> MutexGuard<'_, ProtocolInner> {
        self.inner.lock().expect("protocol store lock poisoned")
    }

    fn resolve(&self, name: &str) -> Result<RecipientId, StorageError> {
        let resolver = self
            .resolver
            .get()
            .and_then(Weak::upgrade)
            .ok_or(StorageError::ResolverNotWired)?;
        resolver.resolve_recipient_by_identifier(name)
    }

    /// Store a remote identity key.
    ///
    /// Returns `true` if an existing, different key was overwritten; the
    /// trust level is downgraded to `Untrusted` in that case. Replaying the
    /// identical key returns `false` and changes nothing. A first sighting is
    /// stored as `TrustedUnverified`.
    pub fn save_identity(
        &self,
        name: &str,
        identity_key: IdentityKey,
    ) -> Result<bool, StorageError> {
        let recipient_id = self.resolve(name)?;
        let mut inner = self.locked();
        let now = now_millis();
        let replaced = match inner.identities.entry(recipient_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().identity_key == identity_key {
                    return Ok(false);
                }
                debug!(
                    "Replacing identity key for {}, trust downgraded",
                    recipient_id
                );
                entry.insert(IdentityInfo {
                    identity_key,
                    trust_level: TrustLevel::Untrusted,
                    added_timestamp: now,
                });
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(IdentityInfo {
                    identity_key,
                    trust_level: TrustLevel::TrustedUnverified,
                    added_timestamp: now,
                });
                false
            }
        };
        inner.save();
        Ok(replaced)
    }

    /// Explicitly set the trust level of a stored identity key. A no-op if
    /// the stored key differs from `identity_key`.
    pub fn set_identity_trust_level(
        &self,
        name: &str,
        identity_key: IdentityKey,
        trust_level: TrustLevel,
    ) -> Result<(), StorageError> {
        let recipient_id = self.resolve(name)?;
        let mut inner = self.locked();
        let changed = match inner.identities.get_mut(&recipient_id) {
            Some(info) if info.identity_key == identity_key => {
                info.trust_level = trust_level;
                true
            }
            _ => false,
        };
        if changed {
            inner.save();
        }
        Ok(())
    }

    /// Whether a key may be used for `name`. Unknown identities are trusted
    /// on first use.
    pub fn is_trusted_identity(
        &self,
        name: &str,
        identity_key: IdentityKey,
    ) -> Result<bool, StorageError> {
        let recipient_id = self.resolve(name)?;
        let inner = self.locked();
        Ok(match inner.identities.get(&recipient_id) {
            None => true,
            Some(info) => info.identity_key == identity_key && info.trust_level.is_trusted(),
        })
    }

    pub fn identity(&self, name: &str) -> Result<Option<IdentityInfo>, StorageError> {
        let recipient_id = self.resolve(name)?;
        Ok(self.locked().identities.get(&recipient_id).cloned())
    }

    pub fn identities(&self) -> Vec<(RecipientId, IdentityInfo)> {
        self.locked()
            .identities
            .iter()
            .map(|(id, info)| (*id, info.clone()))
            .collect()
    }

    pub fn store_pre_key(&self, id: u32, record: Vec<u8>) {
        let mut inner = self.locked();
        inner.pre_keys.insert(id, record);
        inner.save();
    }

    pub fn load_pre_key(&self, id: u32) -> Result<Vec<u8>, StorageError> {
        self.locked()
            .pre_keys
            .get(&id)
            .cloned()
            .ok_or(StorageError::InvalidKeyId(id))
    }

    pub fn contains_pre_key(&self, id: u32) -> bool {
        self.locked().pre_keys.contains_key(&id)
    }

    pub fn remove_pre_key(&self, id: u32) {
        let mut inner = self.locked();
        if inner.pre_keys.remove(&id).is_some() {
            inner.save();
        }
    }

    pub fn store_signed_pre_key(&self, id: u32, record: Vec<u8>) {
        let mut inner = self.locked();
        inner.signed_pre_keys.insert(id, record);
        inner.save();
    }

    pub fn load_signed_pre_key(&self, id: u32) -> Result<Vec<u8>, StorageError> {
        self.locked()
            .signed_pre_keys
            .get(&id)
            .cloned()
            .ok_or(StorageError::InvalidKeyId(id))
    }

    pub fn contains_signed_pre_key(&self, id: u32) -> bool {
        self.locked().signed_pre_keys.contains_key(&id)
    }

    pub fn remove_signed_pre_key(&self, id: u32) {
        let mut inner = self.locked();
        if inner.signed_pre_keys.remove(&id).is_some() {
            inner.save();
        }
    }

    pub fn store_session(
        &self,
        address: &ProtocolAddress,
        record: Vec<u8>,
    ) -> Result<(), StorageError> {
        let recipient_id = self.resolve(&address.name)?;
        let mut inner = self.locked();
        inner.sessions.insert(
            (recipient_id, address.device_id),
            SessionEntry {
                record,
                current: true,
            },
        );
        inner.save();
        Ok(())
    }

    pub fn load_session(&self, address: &ProtocolAddress) -> Result<Option<Vec<u8>>, StorageError> {
        let recipient_id = self.resolve(&address.name)?;
        Ok(self
            .locked()
            .sessions
            .get(&(recipient_id, address.device_id))
            .map(|entry| entry.record.clone()))
    }

    /// Whether a current (non-archived) session exists for `address`.
    pub fn contains_session(&self, address: &ProtocolAddress) -> Result<bool, StorageError> {
        let recipient_id = self.resolve(&address.name)?;
        Ok(self
            .locked()
            .sessions
            .get(&(recipient_id, address.device_id))
            .is_some_and(|entry| entry.current))
    }

    pub fn delete_session(&self, address: &ProtocolAddress) -> Result<(), StorageError> {
        let recipient_id = self.resolve(&address.name)?;
        let mut inner = self.locked();
        if inner
            .sessions
            .remove(&(recipient_id, address.device_id))
            .is_some()
        {
            inner.save();
        }
        Ok(())
    }

    pub fn delete_all_sessions(&self, name: &str) -> Result<(), StorageError> {
        let recipient_id = self.resolve(name)?;
        let mut inner = self.locked();
        let before = inner.sessions.len();
        inner.sessions.retain(|(id, _), _| *id != recipient_id);
        if inner.sessions.len() != before {
            inner.save();
        }
        Ok(())
    }

    /// Keep the session record but mark it non-current.
    pub fn archive_session(&self, address: &ProtocolAddress) -> Result<(), StorageError> {
        let recipient_id = self.resolve(&address.name)?;
        let mut inner = self.locked();
        let archived = match inner.sessions.get_mut(&(recipient_id, address.device_id)) {
            Some(entry) if entry.current => {
                entry.current = false;
                true
            }
            _ => false,
        };
        if archived {
            inner.save();
        }
        Ok(())
    }
}

impl RecipientMergeHandler for ProtocolStore {
    /// Re-key sessions and identities from the merged recipient to the
    /// surviving one. The survivor's entries win on conflict.
    fn merge_recipients(&self, recipient_id: RecipientId, to_be_merged: RecipientId) {
        debug!(
            "Moving protocol state from merged recipient {} to {}",
            to_be_merged, recipient_id
        );
        let mut inner = self.locked();

        if let Some(info) = inner.identities.remove(&to_be_merged) {
            inner.identities.entry(recipient_id).or_insert(info);
        }

        let devices: Vec<u32> = inner
            .sessions
            .keys()
            .filter(|(id, _)| *id == to_be_merged)
            .map(|(_, device_id)| *device_id)
            .collect();
        for device_id in devices {
            if let Some(entry) = inner.sessions.remove(&(to_be_merged, device_id)) {
                inner.sessions.entry((recipient_id, device_id)).or_insert(entry);
            }
        }

        inner.save();
    }
}

impl ProtocolInner {
    fn save(&self) {
        let mut identities: Vec<_> = self
            .identities
            .iter()
            .map(|(id, info)| StoredIdentity {
                recipient_id: id.value(),
                identity_key: info.identity_key.to_base64(),
                trust_level: info.trust_level.name().to_string(),
                added_timestamp: info.added_timestamp,
            })
            .collect();
        identities.sort_by_key(|i| i.recipient_id);

        let encode_records = |records: &HashMap<u32, Vec<u8>>| {
            let mut out: Vec<_> = records
                .iter()
                .map(|(id, record)| StoredKeyRecord {
                    id: *id,
                    record: BASE64.encode(record),
                })
                .collect();
            out.sort_by_key(|r| r.id);
            out
        };

        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|((id, device_id), entry)| StoredSession {
                recipient_id: id.value(),
                device_id: *device_id,
                record: BASE64.encode(&entry.record),
                current: entry.current,
            })
            .collect();
        sessions.sort_by_key(|s| (s.recipient_id, s.device_id));

        let storage = Storage {
            identities,
            pre_keys: encode_records(&self.pre_keys),
            signed_pre_keys: encode_records(&self.signed_pre_keys),
            sessions,
        };

        // Serialize to memory first so an error cannot truncate the file.
        let buffer = match serde_json::to_vec(&storage) {
            Ok(buffer) => buffer,
            Err(e) => {
                error!("Error saving protocol store file: {}", e);
                return;
            }
        };
        if let Err(e) = fs::write(&self.file, buffer) {
            error!("Error saving protocol store file: {}", e);
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Storage {
    identities: Vec<StoredIdentity>,
    pre_keys: Vec<StoredKeyRecord>,
    signed_pre_keys: Vec<StoredKeyRecord>,
    sessions: Vec<StoredSession>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    recipient_id: u64,
    identity_key: String,
    trust_level: String,
    added_timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredKeyRecord {
    id: u32,
    record: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    recipient_id: u64,
    device_id: u32,
    record: String,
    current: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipients::{RecipientAddress, RecipientStore};
    use std::sync::Arc;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        _dir: TempDir,
        recipients: Arc<RecipientStore>,
        protocol: Arc<ProtocolStore>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let protocol = Arc::new(
            ProtocolStore::load(
                dir.path().join("protocol.json"),
                IdentityKeyPair::generate(),
                1234,
            )
            .unwrap(),
        );
        let recipients = Arc::new(
            RecipientStore::load(dir.path().join("recipients.json"), protocol.clone()).unwrap(),
        );
        protocol.set_resolver(Arc::downgrade(&recipients));
        Fixture {
            _dir: dir,
            recipients,
            protocol,
        }
    }

    fn identity_key(fill: u8) -> IdentityKey {
        IdentityKey::from_bytes([fill; 32])
    }

    #[test]
    fn first_identity_is_trusted_unverified() {
        let f = fixture();
        let uuid = Uuid::from_u128(1).to_string();

        let replaced = f.protocol.save_identity(&uuid, identity_key(1)).unwrap();
        assert!(!replaced);

        let info = f.protocol.identity(&uuid).unwrap().unwrap();
        assert_eq!(info.trust_level, TrustLevel::TrustedUnverified);
        assert!(f.protocol.is_trusted_identity(&uuid, identity_key(1)).unwrap());
    }

    #[test]
    fn changed_identity_downgrades_trust() {
        let f = fixture();
        let uuid = Uuid::from_u128(1).to_string();

        f.protocol.save_identity(&uuid, identity_key(1)).unwrap();
        f.protocol
            .set_identity_trust_level(&uuid, identity_key(1), TrustLevel::TrustedVerified)
            .unwrap();

        // Identical replay is a no-op.
        assert!(!f.protocol.save_identity(&uuid, identity_key(1)).unwrap());
        assert_eq!(
            f.protocol.identity(&uuid).unwrap().unwrap().trust_level,
            TrustLevel::TrustedVerified
        );

        // A different key replaces the entry and kills the trust.
        assert!(f.protocol.save_identity(&uuid, identity_key(2)).unwrap());
        assert_eq!(f.protocol.identities().len(), 1);
        let info = f.protocol.identity(&uuid).unwrap().unwrap();
        assert_eq!(info.trust_level, TrustLevel::Untrusted);
        assert!(!f.protocol.is_trusted_identity(&uuid, identity_key(2)).unwrap());
        assert!(!f.protocol.is_trusted_identity(&uuid, identity_key(1)).unwrap());

        // Unknown identities are trusted on first use.
        assert!(f
            .protocol
            .is_trusted_identity(&Uuid::from_u128(9).to_string(), identity_key(9))
            .unwrap());
    }

    #[test]
    fn trust_level_can_be_elevated_for_matching_key_only() {
        let f = fixture();
        let uuid = Uuid::from_u128(1).to_string();
        f.protocol.save_identity(&uuid, identity_key(1)).unwrap();

        f.protocol
            .set_identity_trust_level(&uuid, identity_key(2), TrustLevel::TrustedVerified)
            .unwrap();
        assert_eq!(
            f.protocol.identity(&uuid).unwrap().unwrap().trust_level,
            TrustLevel::TrustedUnverified
        );

        f.protocol
            .set_identity_trust_level(&uuid, identity_key(1), TrustLevel::TrustedVerified)
            .unwrap();
        assert_eq!(
            f.protocol.identity(&uuid).unwrap().unwrap().trust_level,
            TrustLevel::TrustedVerified
        );
    }

    #[test]
    fn pre_key_lifecycle() {
        let f = fixture();

        f.protocol.store_pre_key(7, vec![1, 2, 3]);
        assert!(f.protocol.contains_pre_key(7));
        assert_eq!(f.protocol.load_pre_key(7).unwrap(), vec![1, 2, 3]);

        f.protocol.remove_pre_key(7);
        assert!(!f.protocol.contains_pre_key(7));
        assert!(matches!(
            f.protocol.load_pre_key(7),
            Err(StorageError::InvalidKeyId(7))
        ));

        f.protocol.store_signed_pre_key(1, vec![9]);
        assert!(f.protocol.contains_signed_pre_key(1));
        assert_eq!(f.protocol.load_signed_pre_key(1).unwrap(), vec![9]);
        f.protocol.remove_signed_pre_key(1);
        assert!(matches!(
            f.protocol.load_signed_pre_key(1),
            Err(StorageError::InvalidKeyId(1))
        ));
    }

    #[test]
    fn sessions_can_be_archived_and_deleted() {
        let f = fixture();
        let address = ProtocolAddress::new(Uuid::from_u128(1).to_string(), 1);

        f.protocol.store_session(&address, vec![1]).unwrap();
        assert!(f.protocol.contains_session(&address).unwrap());

        f.protocol.archive_session(&address).unwrap();
        assert!(!f.protocol.contains_session(&address).unwrap());
        // The record itself is retained.
        assert_eq!(f.protocol.load_session(&address).unwrap(), Some(vec![1]));

        // Storing again makes it current.
        f.protocol.store_session(&address, vec![2]).unwrap();
        assert!(f.protocol.contains_session(&address).unwrap());

        let second_device = ProtocolAddress::new(Uuid::from_u128(1).to_string(), 2);
        f.protocol.store_session(&second_device, vec![3]).unwrap();
        f.protocol
            .delete_all_sessions(&Uuid::from_u128(1).to_string())
            .unwrap();
        assert_eq!(f.protocol.load_session(&address).unwrap(), None);
        assert_eq!(f.protocol.load_session(&second_device).unwrap(), None);
    }

    #[test]
    fn sessions_follow_a_recipient_merge() {
        let f = fixture();
        let uuid = Uuid::from_u128(1);
        let number = "+14155550101";

        // Separate recipients: one known by uuid, one only by number.
        let by_uuid_id = f
            .recipients
            .resolve_recipient(&RecipientAddress::from_uuid(uuid));
        let by_number = ProtocolAddress::new(number, 1);
        f.protocol.store_session(&by_number, vec![42]).unwrap();
        f.protocol.save_identity(number, identity_key(1)).unwrap();

        // A trusted source links them; the merge sink reroutes the state.
        let merged = f
            .recipients
            .resolve_recipient_trusted(&RecipientAddress::new(
                Some(uuid),
                Some(number.to_string()),
            ));
        assert_eq!(merged, by_uuid_id);

        let by_uuid = ProtocolAddress::new(uuid.to_string(), 1);
        assert_eq!(f.protocol.load_session(&by_uuid).unwrap(), Some(vec![42]));
        assert!(f
            .protocol
            .is_trusted_identity(&uuid.to_string(), identity_key(1))
            .unwrap());
    }

    #[test]
    fn merge_keeps_survivor_entries_on_conflict() {
        let f = fixture();
        let a = f
            .recipients
            .resolve_recipient(&RecipientAddress::from_uuid(Uuid::from_u128(1)));
        let b = f
            .recipients
            .resolve_recipient(&RecipientAddress::from_number("+14155550101"));
        let address_a = ProtocolAddress::new(Uuid::from_u128(1).to_string(), 1);
        let address_b = ProtocolAddress::new("+14155550101", 1);

        f.protocol.store_session(&address_a, vec![1]).unwrap();
        f.protocol.store_session(&address_b, vec![2]).unwrap();

        f.protocol.merge_recipients(a, b);
        assert_eq!(f.protocol.load_session(&address_a).unwrap(), Some(vec![1]));
    }

    #[test]
    fn resolver_must_be_wired() {
        let dir = TempDir::new().unwrap();
        let protocol = ProtocolStore::load(
            dir.path().join("protocol.json"),
            IdentityKeyPair::generate(),
            77,
        )
        .unwrap();

        assert_eq!(protocol.local_registration_id(), 77);
        assert!(matches!(
            protocol.save_identity("+14155550101", identity_key(1)),
            Err(StorageError::ResolverNotWired)
        ));
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("protocol.json");
        let pair = IdentityKeyPair::generate();

        {
            let protocol =
                Arc::new(ProtocolStore::load(&file, pair.clone(), 1234).unwrap());
            let recipients = Arc::new(
                RecipientStore::load(dir.path().join("recipients.json"), protocol.clone())
                    .unwrap(),
            );
            protocol.set_resolver(Arc::downgrade(&recipients));

            protocol.store_pre_key(1, vec![1]);
            protocol.store_signed_pre_key(2, vec![2]);
            let address = ProtocolAddress::new(Uuid::from_u128(1).to_string(), 1);
            protocol.store_session(&address, vec![3]).unwrap();
            protocol.archive_session(&address).unwrap();
            protocol
                .save_identity(&Uuid::from_u128(1).to_string(), identity_key(5))
                .unwrap();
        }

        let protocol = Arc::new(ProtocolStore::load(&file, pair, 1234).unwrap());
        let recipients = Arc::new(
            RecipientStore::load(dir.path().join("recipients.json"), protocol.clone()).unwrap(),
        );
        protocol.set_resolver(Arc::downgrade(&recipients));

        assert_eq!(protocol.load_pre_key(1).unwrap(), vec![1]);
        assert_eq!(protocol.load_signed_pre_key(2).unwrap(), vec![2]);
        let address = ProtocolAddress::new(Uuid::from_u128(1).to_string(), 1);
        assert_eq!(protocol.load_session(&address).unwrap(), Some(vec![3]));
        assert!(!protocol.contains_session(&address).unwrap()); // still archived
        let info = protocol
            .identity(&Uuid::from_u128(1).to_string())
            .unwrap()
            .unwrap();
        assert_eq!(info.identity_key, identity_key(5));
        assert_eq!(info.trust_level, TrustLevel::TrustedUnverified);
    }
}

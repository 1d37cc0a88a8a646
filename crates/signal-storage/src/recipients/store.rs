//! Content-addressable recipient registry with lazy merging.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};
use uuid::Uuid;

use super::{
    Capability, Contact, Profile, Recipient, RecipientAddress, RecipientId,
    RecipientMergeHandler, UnidentifiedAccessMode,
};
use crate::error::StorageError;
use crate::keys::{ProfileKey, ProfileKeyCredential};

/// Registry assigning stable internal ids to recipients.
///
/// Resolution comes in two trust classes: low-trust resolution never links or
/// rewrites existing records, high-trust resolution (server discovery,
/// verification, sync messages) is the only path that may attach a number to
/// a uuid or merge two records.
pub struct RecipientStore {
    merge_handler: Arc<dyn RecipientMergeHandler>,
    inner: Mutex<Inner>,
}

struct Inner {
    file: PathBuf,
    recipients: HashMap<RecipientId, Recipient>,
    /// Tombstones of merged ids, pointing at the surviving id. Kept in memory
    /// only; the chain is acyclic because a merged id is never a merge target.
    merged: HashMap<RecipientId, RecipientId>,
    last_id: u64,
}

impl RecipientStore {
    /// Load the store from `file`. A missing file is an empty store.
    pub fn load(
        file: impl Into<PathBuf>,
        merge_handler: Arc<dyn RecipientMergeHandler>,
    ) -> Result<Self, StorageError> {
        let file = file.into();
        let storage = match fs::read(&file) {
            Ok(bytes) => serde_json::from_slice::<Storage>(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!("Creating new recipient store");
                Storage::default()
            }
            Err(e) => return Err(e.into()),
        };

        let mut recipients = HashMap::with_capacity(storage.recipients.len());
        for stored in storage.recipients {
            let recipient = stored.into_recipient()?;
            recipients.insert(recipient.id, recipient);
        }

        Ok(Self {
            merge_handler,
            inner: Mutex::new(Inner {
                file,
                recipients,
                merged: HashMap::new(),
                last_id: storage.last_id,
            }),
        })
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("recipient store lock poisoned")
    }

    /// Low-trust resolution: add the address if unknown, never link records.
    pub fn resolve_recipient(&self, address: &RecipientAddress) -> RecipientId {
        self.resolve(address, false)
    }

    /// High-trust resolution: a trusted channel asserts that the uuid and
    /// number of `address` belong to the same user.
    pub fn resolve_recipient_trusted(&self, address: &RecipientAddress) -> RecipientId {
        self.resolve(address, true)
    }

    /// Low-trust resolution from a uuid or E.164 identifier string.
    pub fn resolve_recipient_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<RecipientId, StorageError> {
        Ok(self.resolve(&RecipientAddress::from_identifier(identifier)?, false))
    }

    /// Resolve a number, asking `aci_supplier` for the uuid if the number is
    /// not yet linked to one.
    pub fn resolve_recipient_by_number<F>(
        &self,
        number: &str,
        aci_supplier: F,
    ) -> Result<RecipientId, StorageError>
    where
        F: FnOnce() -> Option<Uuid>,
    {
        let by_number = {
            let inner = self.locked();
            inner
                .find_by_number(number)
                .and_then(|id| inner.recipients.get(&id).cloned())
        };
        match by_number {
            Some(recipient) if recipient.address.uuid().is_some() => Ok(recipient.id),
            _ => {
                let aci = aci_supplier()
                    .ok_or_else(|| StorageError::UnregisteredRecipient(number.to_string()))?;
                Ok(self.resolve(
                    &RecipientAddress::new(Some(aci), Some(number.to_string())),
                    false,
                ))
            }
        }
    }

    /// High-trust resolution of a batch of addresses under a single lock
    /// acquisition; merge callbacks fire after the lock is released.
    pub fn resolve_recipients_trusted(&self, addresses: &[RecipientAddress]) -> Vec<RecipientId> {
        let mut to_be_merged = Vec::new();
        let ids = {
            let mut inner = self.locked();
            addresses
                .iter()
                .map(|address| {
                    let (id, merged) = inner.resolve(address, true);
                    if let Some(merged) = merged {
                        to_be_merged.push((id, merged));
                    }
                    id
                })
                .collect()
        };
        for (id, merged) in to_be_merged {
            self.merge_handler.merge_recipients(id, merged);
        }
        ids
    }

    fn resolve(&self, address: &RecipientAddress, high_trust: bool) -> RecipientId {
        let (id, merged) = {
            let mut inner = self.locked();
            inner.resolve(address, high_trust)
        };
        if let Some(merged) = merged {
            self.merge_handler.merge_recipients(id, merged);
        }
        id
    }

    /// Follow the redirection chain of merged ids until a live id is reached.
    pub fn actual_id(&self, id: RecipientId) -> RecipientId {
        self.locked().actual_id(id)
    }

    pub fn get_recipient(&self, id: RecipientId) -> Option<Recipient> {
        let inner = self.locked();
        let id = inner.actual_id(id);
        inner.recipients.get(&id).cloned()
    }

    pub fn recipient_address(&self, id: RecipientId) -> Option<RecipientAddress> {
        self.get_recipient(id).map(|r| r.address)
    }

    pub fn is_empty(&self) -> bool {
        self.locked().recipients.is_empty()
    }

    pub fn contact(&self, id: RecipientId) -> Option<Contact> {
        self.get_recipient(id).and_then(|r| r.contact)
    }

    pub fn store_contact(&self, id: RecipientId, contact: Contact) {
        self.update_recipient(id, |r| r.contact = Some(contact));
    }

    pub fn delete_contact(&self, id: RecipientId) {
        self.update_recipient(id, |r| r.contact = None);
    }

    pub fn contacts(&self) -> Vec<(RecipientId, Contact)> {
        self.locked()
            .recipients
            .iter()
            .filter_map(|(id, r)| r.contact.clone().map(|c| (*id, c)))
            .collect()
    }

    pub fn profile(&self, id: RecipientId) -> Option<Profile> {
        self.get_recipient(id).and_then(|r| r.profile)
    }

    pub fn store_profile(&self, id: RecipientId, profile: Profile) {
        self.update_recipient(id, |r| r.profile = Some(profile));
    }

    pub fn profile_key(&self, id: RecipientId) -> Option<ProfileKey> {
        self.get_recipient(id).and_then(|r| r.profile_key)
    }

    /// Store a recipient's profile key. A changed key invalidates the
    /// previously fetched credential and profile.
    pub fn store_profile_key(&self, id: RecipientId, profile_key: ProfileKey) {
        self.update_recipient(id, |r| {
            if r.profile_key.as_ref() == Some(&profile_key) {
                return;
            }
            r.profile_key = Some(profile_key);
            r.profile_key_credential = None;
            if let Some(profile) = &mut r.profile {
                profile.last_update_timestamp = 0;
            }
        });
    }

    pub fn profile_key_credential(&self, id: RecipientId) -> Option<ProfileKeyCredential> {
        self.get_recipient(id).and_then(|r| r.profile_key_credential)
    }

    pub fn store_profile_key_credential(
        &self,
        id: RecipientId,
        credential: ProfileKeyCredential,
    ) {
        self.update_recipient(id, |r| r.profile_key_credential = Some(credential));
    }

    /// Reset a recipient to its bare uuid address, dropping contact and
    /// profile data.
    pub fn delete_recipient_data(&self, id: RecipientId) {
        self.update_recipient(id, |r| {
            debug!("Deleting recipient data for {}", r.id);
            if let Some(uuid) = r.address.uuid() {
                r.address = RecipientAddress::from_uuid(uuid);
            }
            r.contact = None;
            r.profile_key = None;
            r.profile_key_credential = None;
            r.profile = None;
        });
    }

    fn update_recipient(&self, id: RecipientId, update: impl FnOnce(&mut Recipient)) {
        let mut inner = self.locked();
        let id = inner.actual_id(id);
        if let Some(existing) = inner.recipients.get(&id) {
            let mut updated = existing.clone();
            update(&mut updated);
            inner.store_recipient(id, updated);
        }
    }
}

impl Inner {
    /// Resolve `address` under the lock. Returns the resolved id and, if a
    /// merge happened, the id that was merged away (the caller notifies the
    /// merge handler after releasing the lock).
    fn resolve(
        &mut self,
        address: &RecipientAddress,
        high_trust: bool,
    ) -> (RecipientId, Option<RecipientId>) {
        let by_number = address.number().and_then(|n| self.find_by_number(n));
        let by_uuid = address.uuid().and_then(|u| self.find_by_uuid(u));

        match (by_uuid, by_number) {
            (None, None) => {
                debug!("Got new recipient, both uuid and number are unknown");
                let address =
                    if high_trust || address.uuid().is_none() || address.number().is_none() {
                        address.clone()
                    } else {
                        // Never bind an unverified number to a uuid.
                        RecipientAddress::new(address.uuid(), None)
                    };
                (self.add_new_recipient(address), None)
            }
            (u, n) if !high_trust
                || address.uuid().is_none()
                || address.number().is_none()
                || u == n =>
            {
                let id = u.or(n).expect("at least one recipient matched");
                (id, None)
            }
            (Some(by_uuid), None) => {
                debug!(
                    "Got recipient {} existing with uuid, updating with high trust number",
                    by_uuid
                );
                self.update_recipient_address(by_uuid, address.clone());
                (by_uuid, None)
            }
            (None, Some(by_number)) => {
                if let Some(other_uuid) = self.recipient_uuid(by_number) {
                    debug!(
                        "Got recipient {} existing with number, but different uuid, so stripping its number and adding new recipient",
                        by_number
                    );
                    self.update_recipient_address(
                        by_number,
                        RecipientAddress::from_uuid(other_uuid),
                    );
                    (self.add_new_recipient(address.clone()), None)
                } else {
                    debug!(
                        "Got recipient {} existing with number and no uuid, updating with high trust uuid",
                        by_number
                    );
                    self.update_recipient_address(by_number, address.clone());
                    (by_number, None)
                }
            }
            (Some(by_uuid), Some(by_number)) => {
                if let Some(other_uuid) = self.recipient_uuid(by_number) {
                    debug!(
                        "Got separate recipients for high trust number {} and uuid {}, recipient for number has different uuid, so stripping its number",
                        by_number, by_uuid
                    );
                    self.update_recipient_address(
                        by_number,
                        RecipientAddress::from_uuid(other_uuid),
                    );
                    self.update_recipient_address(by_uuid, address.clone());
                    (by_uuid, None)
                } else {
                    debug!(
                        "Got separate recipients for high trust number {} and uuid {}, need to merge them",
                        by_number, by_uuid
                    );
                    self.update_recipient_address(by_uuid, address.clone());
                    self.merge_recipients(by_uuid, by_number);
                    (by_uuid, Some(by_number))
                }
            }
        }
    }

    fn actual_id(&self, mut id: RecipientId) -> RecipientId {
        let mut hops = 0;
        while let Some(&next) = self.merged.get(&id) {
            hops += 1;
            debug_assert!(hops <= self.merged.len(), "redirection chain must be acyclic");
            debug!(
                "Using {} instead of {}, because recipients have been merged",
                next, id
            );
            id = next;
        }
        id
    }

    fn recipient_uuid(&self, id: RecipientId) -> Option<Uuid> {
        self.recipients.get(&id).and_then(|r| r.address.uuid())
    }

    fn find_by_number(&self, number: &str) -> Option<RecipientId> {
        self.recipients
            .values()
            .find(|r| r.address.number() == Some(number))
            .map(|r| r.id)
    }

    fn find_by_uuid(&self, uuid: Uuid) -> Option<RecipientId> {
        self.recipients
            .values()
            .find(|r| r.address.uuid() == Some(uuid))
            .map(|r| r.id)
    }

    fn add_new_recipient(&mut self, address: RecipientAddress) -> RecipientId {
        self.last_id += 1;
        let id = RecipientId::new(self.last_id);
        debug!("Adding new recipient {} with address {}", id, address);
        self.store_recipient(id, Recipient::new(id, address));
        id
    }

    fn update_recipient_address(&mut self, id: RecipientId, address: RecipientAddress) {
        if let Some(existing) = self.recipients.get(&id) {
            let mut updated = existing.clone();
            updated.address = address;
            self.store_recipient(id, updated);
        }
    }

    fn store_recipient(&mut self, id: RecipientId, recipient: Recipient) {
        if self.recipients.get(&id) != Some(&recipient) {
            self.recipients.insert(id, recipient);
            self.save();
        }
    }

    /// Merge `to_be_merged` into `recipient_id`, keeping the survivor's
    /// fields and falling back to the merged record's where absent.
    fn merge_recipients(&mut self, recipient_id: RecipientId, to_be_merged: RecipientId) {
        let Some(merged_from) = self.recipients.remove(&to_be_merged) else {
            return;
        };
        if let Some(recipient) = self.recipients.get_mut(&recipient_id) {
            if recipient.contact.is_none() {
                recipient.contact = merged_from.contact;
            }
            if recipient.profile_key.is_none() {
                recipient.profile_key = merged_from.profile_key;
            }
            if recipient.profile_key_credential.is_none() {
                recipient.profile_key_credential = merged_from.profile_key_credential;
            }
            if recipient.profile.is_none() {
                recipient.profile = merged_from.profile;
            }
        }
        self.merged.insert(to_be_merged, recipient_id);
        self.save();
    }

    fn save(&self) {
        let mut recipients: Vec<_> = self.recipients.values().map(StoredRecipient::from).collect();
        recipients.sort_by_key(|r| r.id);
        let storage = Storage {
            last_id: self.last_id,
            recipients,
        };

        // Serialize to memory first so an error cannot truncate the file.
        let buffer = match serde_json::to_vec(&storage) {
            Ok(buffer) => buffer,
            Err(e) => {
                error!("Error saving recipient store file: {}", e);
                return;
            }
        };
        if let Err(e) = fs::write(&self.file, buffer) {
            error!("Error saving recipient store file: {}", e);
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Storage {
    last_id: u64,
    recipients: Vec<StoredRecipient>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecipient {
    id: u64,
    number: Option<String>,
    uuid: Option<String>,
    profile_key: Option<String>,
    profile_key_credential: Option<String>,
    contact: Option<StoredContact>,
    profile: Option<StoredProfile>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredContact {
    name: String,
    color: Option<String>,
    message_expiration_time: u32,
    blocked: bool,
    archived: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredProfile {
    last_update_timestamp: u64,
    given_name: Option<String>,
    family_name: Option<String>,
    about: Option<String>,
    about_emoji: Option<String>,
    avatar_url_path: Option<String>,
    unidentified_access_mode: String,
    capabilities: Vec<String>,
}

impl StoredRecipient {
    fn into_recipient(self) -> Result<Recipient, StorageError> {
        let uuid = self.uuid.as_deref().map(Uuid::parse_str).transpose()?;
        let address = RecipientAddress::new(uuid, self.number);

        // Undecodable key material is dropped, not fatal.
        let profile_key = self.profile_key.as_deref().and_then(ProfileKey::from_base64);
        let profile_key_credential = self
            .profile_key_credential
            .as_deref()
            .and_then(ProfileKeyCredential::from_base64);

        let contact = self.contact.map(|c| Contact {
            name: c.name,
            color: c.color,
            message_expiration_time: c.message_expiration_time,
            blocked: c.blocked,
            archived: c.archived,
        });

        let profile = self.profile.map(|p| Profile {
            last_update_timestamp: p.last_update_timestamp,
            given_name: p.given_name,
            family_name: p.family_name,
            about: p.about,
            about_emoji: p.about_emoji,
            avatar_url_path: p.avatar_url_path,
            unidentified_access_mode: UnidentifiedAccessMode::from_name(
                &p.unidentified_access_mode,
            ),
            // Unknown capability names are silently dropped.
            capabilities: p
                .capabilities
                .iter()
                .filter_map(|name| Capability::from_name(name))
                .collect(),
        });

        Ok(Recipient {
            id: RecipientId::new(self.id),
            address,
            contact,
            profile_key,
            profile_key_credential,
            profile,
        })
    }
}

impl From<&Recipient> for StoredRecipient {
    fn from(recipient: &Recipient) -> Self {
        Self {
            id: recipient.id.value(),
            number: recipient.address.number().map(str::to_string),
            uuid: recipient.address.uuid().map(|u| u.to_string()),
            profile_key: recipient.profile_key.as_ref().map(ProfileKey::to_base64),
            profile_key_credential: recipient
                .profile_key_credential
                .as_ref()
                .map(ProfileKeyCredential::to_base64),
            contact: recipient.contact.as_ref().map(|c| StoredContact {
                name: c.name.clone(),
                color: c.color.clone(),
                message_expiration_time: c.message_expiration_time,
                blocked: c.blocked,
                archived: c.archived,
            }),
            profile: recipient.profile.as_ref().map(|p| StoredProfile {
                last_update_timestamp: p.last_update_timestamp,
                given_name: p.given_name.clone(),
                family_name: p.family_name.clone(),
                about: p.about.clone(),
                about_emoji: p.about_emoji.clone(),
                avatar_url_path: p.avatar_url_path.clone(),
                unidentified_access_mode: p.unidentified_access_mode.name().to_string(),
                capabilities: p.capabilities.iter().map(|c| c.name().to_string()).collect(),
            }),
        }
    }
}

//! Recipient registry: stable internal ids for uuid / phone-number identities.

mod address;
mod store;

pub use address::{normalize_number, RecipientAddress};
pub use store::RecipientStore;

use std::collections::BTreeSet;
use std::fmt;

use crate::keys::{ProfileKey, ProfileKeyCredential};

/// Opaque internal id of a recipient.
///
/// Once emitted an id either keeps identifying the same logical recipient, or
/// it has been merged into another id and resolves there via
/// [`RecipientStore::actual_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecipientId(u64);

impl RecipientId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contact book entry for a recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub name: String,
    pub color: Option<String>,
    pub message_expiration_time: u32,
    pub blocked: bool,
    pub archived: bool,
}

/// How a recipient accepts sealed-sender messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnidentifiedAccessMode {
    #[default]
    Unknown,
    Disabled,
    Enabled,
    Unrestricted,
}

impl UnidentifiedAccessMode {
    pub fn name(self) -> &'static str {
        match self {
            UnidentifiedAccessMode::Unknown => "UNKNOWN",
            UnidentifiedAccessMode::Disabled => "DISABLED",
            UnidentifiedAccessMode::Enabled => "ENABLED",
            UnidentifiedAccessMode::Unrestricted => "UNRESTRICTED",
        }
    }

    /// Parse a stored name, falling back to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "DISABLED" => UnidentifiedAccessMode::Disabled,
            "ENABLED" => UnidentifiedAccessMode::Enabled,
            "UNRESTRICTED" => UnidentifiedAccessMode::Unrestricted,
            _ => UnidentifiedAccessMode::Unknown,
        }
    }
}

/// Feature flags advertised in a recipient's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    Gv2,
    Storage,
    Gv1Migration,
    SenderKey,
    AnnouncementGroup,
    ChangeNumber,
}

impl Capability {
    pub fn name(self) -> &'static str {
        match self {
            Capability::Gv2 => "GV2",
            Capability::Storage => "STORAGE",
            Capability::Gv1Migration => "GV1_MIGRATION",
            Capability::SenderKey => "SENDER_KEY",
            Capability::AnnouncementGroup => "ANNOUNCEMENT_GROUP",
            Capability::ChangeNumber => "CHANGE_NUMBER",
        }
    }

    /// Parse a stored name. Unknown names yield `None` and are dropped.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "GV2" => Some(Capability::Gv2),
            "STORAGE" => Some(Capability::Storage),
            "GV1_MIGRATION" => Some(Capability::Gv1Migration),
            "SENDER_KEY" => Some(Capability::SenderKey),
            "ANNOUNCEMENT_GROUP" => Some(Capability::AnnouncementGroup),
            "CHANGE_NUMBER" => Some(Capability::ChangeNumber),
            _ => None,
        }
    }
}

/// Profile data fetched from the service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    pub last_update_timestamp: u64,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub about: Option<String>,
    pub about_emoji: Option<String>,
    pub avatar_url_path: Option<String>,
    pub unidentified_access_mode: UnidentifiedAccessMode,
    pub capabilities: BTreeSet<Capability>,
}

/// Aggregate record for one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub id: RecipientId,
    pub address: RecipientAddress,
    pub contact: Option<Contact>,
    pub profile_key: Option<ProfileKey>,
    pub profile_key_credential: Option<ProfileKeyCredential>,
    pub profile: Option<Profile>,
}

impl Recipient {
    fn new(id: RecipientId, address: RecipientAddress) -> Self {
        Self {
            id,
            address,
            contact: None,
            profile_key: None,
            profile_key_credential: None,
            profile: None,
        }
    }
}

/// Merge sink notified when two recipients are reconciled into one.
///
/// The callback runs after the store's mutex has been released. Implementors
/// must serialize their own writes.
pub trait RecipientMergeHandler: Send + Sync {
    fn merge_recipients(&self, recipient_id: RecipientId, to_be_merged: RecipientId);
}

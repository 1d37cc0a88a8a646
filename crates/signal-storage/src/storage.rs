//! Wiring of the per-account stores.

use std::sync::Arc;

use crate::account::SignalAccount;
use crate::error::StorageError;
use crate::protocol::ProtocolStore;
use crate::recipients::RecipientStore;

/// All stores belonging to one account, wired together: the protocol store is
/// the recipient store's merge sink, the recipient store is the protocol
/// store's name resolver.
pub struct AccountStorage {
    pub account: SignalAccount,
    pub recipients: Arc<RecipientStore>,
    pub protocol: Arc<ProtocolStore>,
}

impl AccountStorage {
    /// Open the sibling store files next to the account file.
    pub fn open(account: SignalAccount) -> Result<Self, StorageError> {
        let dir = account.data_dir();
        let protocol = Arc::new(ProtocolStore::load(
            dir.join("protocol.json"),
            account.identity_key_pair().clone(),
            account.registration_id(),
        )?);
        let recipients = Arc::new(RecipientStore::load(
            dir.join("recipients.json"),
            protocol.clone(),
        )?);
        protocol.set_resolver(Arc::downgrade(&recipients));

        Ok(Self {
            account,
            recipients,
            protocol,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::IdentityKey;
    use crate::protocol::ProtocolAddress;
    use crate::recipients::RecipientAddress;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn open_wires_merge_sink_and_resolver() {
        let dir = TempDir::new().unwrap();
        let account =
            SignalAccount::create(dir.path().join("account.json"), "+14155550101").unwrap();
        let storage = AccountStorage::open(account).unwrap();

        // Resolver is attached: name-based protocol writes work.
        let number_address = ProtocolAddress::new("+14155550199", 1);
        storage
            .protocol
            .store_session(&number_address, vec![7])
            .unwrap();
        storage
            .protocol
            .save_identity("+14155550199", IdentityKey::from_bytes([3; 32]))
            .unwrap();

        // Merge sink is attached: linking reroutes the protocol state.
        let uuid = Uuid::from_u128(42);
        storage
            .recipients
            .resolve_recipient(&RecipientAddress::from_uuid(uuid));
        storage
            .recipients
            .resolve_recipient_trusted(&RecipientAddress::new(
                Some(uuid),
                Some("+14155550199".into()),
            ));

        let uuid_address = ProtocolAddress::new(uuid.to_string(), 1);
        assert_eq!(
            storage.protocol.load_session(&uuid_address).unwrap(),
            Some(vec![7])
        );
    }
}

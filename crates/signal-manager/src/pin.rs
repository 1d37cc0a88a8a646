//! Registration-lock pin handling against the key backup enclave.

use signal_service::{AuthCredentials, KeyBackupClient};
use signal_storage::MasterKey;
use tracing::debug;

use crate::error::Error;

/// Master key recovered from the key backup service for a pin.
pub struct KbsPinData {
    pub master_key: MasterKey,
}

/// Exchanges a user pin for the account's stored master key.
pub struct PinHelper {
    kbs: KeyBackupClient,
}

impl PinHelper {
    pub fn new(kbs: KeyBackupClient) -> Self {
        Self { kbs }
    }

    /// Run the token/restore round-trip with the backup credentials from a
    /// registration-lock response.
    ///
    /// A missing backup surfaces as an I/O-class error, a wrong pin as
    /// [`Error::IncorrectPin`] with the remaining tries.
    pub async fn get_registration_lock_data(
        &self,
        pin: &str,
        credentials: &AuthCredentials,
    ) -> Result<KbsPinData, Error> {
        let token = self.kbs.get_token(credentials).await?;
        debug!("Restoring master key from key backup");
        let master_key = self
            .kbs
            .restore_master_key(pin, &token.token, credentials)
            .await?;
        Ok(KbsPinData {
            master_key: MasterKey::from_bytes(master_key),
        })
    }
}

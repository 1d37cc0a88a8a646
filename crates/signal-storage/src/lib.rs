//! JSON-file storage for a Signal client: the local account, the recipient
//! registry, and Signal Protocol state.
//!
//! All stores persist by serializing to an in-memory buffer first and then
//! writing the buffer to the file in a single pass, so a serialization error
//! can never truncate the previous on-disk state.

pub mod account;
pub mod error;
pub mod keys;
pub mod protocol;
pub mod recipients;
mod storage;

pub use account::SignalAccount;
pub use error::StorageError;
pub use keys::{IdentityKey, IdentityKeyPair, MasterKey, ProfileKey, ProfileKeyCredential};
pub use protocol::{IdentityInfo, ProtocolAddress, ProtocolStore, TrustLevel};
pub use recipients::{
    normalize_number, Recipient, RecipientAddress, RecipientId, RecipientMergeHandler,
    RecipientStore,
};
pub use storage::AccountStorage;

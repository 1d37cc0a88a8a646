//! HTTP clients for the Signal service and the key backup enclave.

pub mod client;
pub mod error;
pub mod kbs;
pub mod response;
pub mod types;

pub use client::SignalServiceClient;
pub use error::ServiceError;
pub use kbs::{KbsError, KeyBackupClient};
pub use response::ServiceResponse;
pub use types::{
    AccountAttributes, AuthCredentials, DeviceCapabilities, PreKeyEntity, PreKeyState,
    ProfileWrite, SignedPreKeyEntity, StorageManifest, VerifyAccountResponse,
};

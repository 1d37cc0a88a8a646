//! Account lifecycle management: registration, verification, and the
//! long-lived manager that owns a verified account.

pub mod config;
pub mod error;
pub mod manager;
pub mod pin;
pub mod registration;

pub use config::{KeyBackupConfig, ServiceEnvironmentConfig};
pub use error::Error;
pub use manager::Manager;
pub use pin::PinHelper;
pub use registration::RegistrationManager;

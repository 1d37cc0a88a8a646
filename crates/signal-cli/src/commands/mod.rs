//! CLI subcommand implementations.

mod register;
mod verify;

pub use register::register;
pub use verify::verify;

use std::path::PathBuf;

use signal_manager::{Manager, RegistrationManager};
use signal_storage::SignalAccount;

use crate::config::Config;

fn account_file(config: &Config, number: &str) -> PathBuf {
    config.data.dir.join(number).join("account.json")
}

fn registration_manager(
    config: &Config,
    account: SignalAccount,
) -> Result<RegistrationManager, signal_manager::Error> {
    let number = account.number().to_string();
    RegistrationManager::new(
        account,
        config.service.clone(),
        Some(Box::new(move |manager: Manager| {
            drop(manager);
            println!("Registration of {number} successful.");
        })),
    )
}

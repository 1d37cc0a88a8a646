//! `verify` subcommand: submit the verification code.

use signal_manager::Error;
use signal_storage::{normalize_number, SignalAccount};

use crate::config::Config;

pub async fn verify(
    config: &Config,
    number: &str,
    code: &str,
    pin: Option<&str>,
) -> Result<(), Error> {
    let number = normalize_number(number)?;
    let file = super::account_file(config, &number);
    if !file.exists() {
        return Err(Error::UserError(format!(
            "No local account data for {number}, run register first"
        )));
    }

    let account = SignalAccount::load(&file)?;
    let mut registration = super::registration_manager(config, account)?;
    registration.verify_account(code, pin).await
}

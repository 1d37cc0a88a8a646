//! `register` subcommand: request a verification code, or silently
//! reactivate a previously registered account.

use std::fs;

use signal_manager::Error;
use signal_storage::{normalize_number, SignalAccount};
use tracing::debug;

use crate::config::Config;

pub async fn register(
    config: &Config,
    number: &str,
    voice: bool,
    captcha: Option<&str>,
) -> Result<(), Error> {
    let number = normalize_number(number)?;
    let dir = config.data.dir.join(&number);
    let file = super::account_file(config, &number);

    let account = if file.exists() {
        debug!("Loading existing account file for {}", number);
        SignalAccount::load(&file)?
    } else {
        fs::create_dir_all(&dir).map_err(|e| Error::Io(e.to_string()))?;
        SignalAccount::create(&file, &number)?
    };

    let mut registration = super::registration_manager(config, account)?;
    registration.register(voice, captcha).await?;

    if !registration.is_registered() {
        println!(
            "Verification code requested. Finish with: signal-cli -a {number} verify <code>"
        );
    }
    Ok(())
}

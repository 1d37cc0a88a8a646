//! Account registration state machine.
//!
//! Drives request-code → verify-code → finish. On success the account moves
//! into a [`Manager`] which is handed to the new-manager callback; the
//! registration manager keeps no reference to either afterwards.

use tracing::{debug, info, warn};
use uuid::Uuid;

use signal_service::{
    AccountAttributes, DeviceCapabilities, KeyBackupClient, ServiceError, SignalServiceClient,
    VerifyAccountResponse,
};
use signal_storage::SignalAccount;

use crate::config::ServiceEnvironmentConfig;
use crate::error::Error;
use crate::manager::Manager;
use crate::pin::PinHelper;

/// Callback receiving the manager once registration completes.
pub type NewManagerListener = Box<dyn FnOnce(Manager) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistrationState {
    Idle,
    CodeRequested,
    Verified,
    Registered,
}

/// Drives the onboarding of one account.
///
/// Dropping the manager abandons the registration; the account file keeps
/// whatever state was last persisted.
pub struct RegistrationManager {
    account: Option<SignalAccount>,
    config: ServiceEnvironmentConfig,
    state: RegistrationState,
    service: SignalServiceClient,
    pin_helper: PinHelper,
    new_manager_listener: Option<NewManagerListener>,
}

impl RegistrationManager {
    pub fn new(
        account: SignalAccount,
        config: ServiceEnvironmentConfig,
        new_manager_listener: Option<NewManagerListener>,
    ) -> Result<Self, Error> {
        // Registration authenticates with the bare number; the account holds
        // no usable ACI session yet.
        let service = SignalServiceClient::with_credentials(
            &config.service_url,
            &config.user_agent,
            account.number(),
            account.password(),
        )?;
        let kbs = KeyBackupClient::new(
            &config.key_backup.url,
            &config.key_backup.enclave_name,
            &config.key_backup.service_id,
            &config.key_backup.mrenclave,
        )
        .map_err(|e| Error::Io(e.to_string()))?;

        Ok(Self {
            account: Some(account),
            config,
            state: RegistrationState::Idle,
            service,
            pin_helper: PinHelper::new(kbs),
            new_manager_listener,
        })
    }

    /// Whether this registration already completed (including reactivation).
    pub fn is_registered(&self) -> bool {
        self.state == RegistrationState::Registered
    }

    /// Request a verification code by SMS or voice call.
    ///
    /// If the account carries an ACI from a prior life, a silent reactivation
    /// is attempted first and skips verification entirely.
    pub async fn register(
        &mut self,
        voice_verification: bool,
        captcha: Option<&str>,
    ) -> Result<(), Error> {
        let captcha = captcha.map(|c| c.replace("signalcaptcha://", ""));

        let has_aci = self.account().map(|a| a.aci().is_some())?;
        if has_aci {
            match self.try_reactivate().await {
                Ok(()) => return Ok(()),
                Err(e) => debug!("Failed to reactivate account: {}", e),
            }
        }

        let response = if voice_verification {
            self.service
                .request_voice_verification_code(&default_locale(), captcha.as_deref())
                .await
        } else {
            self.service
                .request_sms_verification_code(captcha.as_deref())
                .await
        };
        response.into_result()?;

        self.state = RegistrationState::CodeRequested;
        Ok(())
    }

    /// Submit the verification code, retrying through the key backup service
    /// when the account is protected by a registration lock.
    pub async fn verify_account(
        &mut self,
        verification_code: &str,
        pin: Option<&str>,
    ) -> Result<(), Error> {
        if self.state == RegistrationState::Registered {
            return Err(Error::UserError("account is already registered".into()));
        }
        let verification_code = verification_code.replace('-', "");

        let bare_attributes = account_attributes(self.account()?, None)?;
        let (response, master_key, pin) = match self
            .service
            .verify_account(&verification_code, &bare_attributes)
            .await
            .into_result()
        {
            Ok(response) => (response, None, None),
            Err(ServiceError::Locked {
                time_remaining,
                backup_credentials,
            }) => {
                let Some(pin) = pin else {
                    return Err(Error::PinLocked(time_remaining));
                };
                let credentials = backup_credentials.ok_or_else(|| {
                    Error::Unexpected("registration lock without backup credentials".into())
                })?;

                let lock_data = self
                    .pin_helper
                    .get_registration_lock_data(pin, &credentials)
                    .await?;
                let registration_lock = lock_data.master_key.derive_registration_lock();
                let response = match self
                    .service
                    .verify_account_with_registration_lock_pin(
                        &verification_code,
                        &registration_lock,
                        &bare_attributes,
                    )
                    .await
                    .into_result()
                {
                    Ok(response) => response,
                    Err(ServiceError::Locked { .. }) => {
                        return Err(Error::Unexpected(
                            "KBS pin appeared to match but registration lock still failed".into(),
                        ))
                    }
                    Err(e) => return Err(e.into()),
                };
                (response, Some(lock_data.master_key), Some(pin.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        self.finish(response, master_key, pin).await
    }

    async fn finish(
        &mut self,
        response: VerifyAccountResponse,
        master_key: Option<signal_storage::MasterKey>,
        pin: Option<String>,
    ) -> Result<(), Error> {
        let aci = Uuid::parse_str(&response.uuid)
            .map_err(|e| Error::Unexpected(format!("service returned an invalid aci: {e}")))?;
        self.account_mut()?
            .finish_registration(aci, master_key, pin)?;
        self.state = RegistrationState::Verified;

        // Ownership of the account moves into the manager; this manager must
        // not touch it afterwards.
        let account = self.take_account()?;
        let mut manager = Manager::new(account, &self.config)?;

        manager.refresh_pre_keys().await?;
        if response.storage_capable {
            manager.retrieve_remote_storage().await?;
        }
        // An initial empty profile makes the account addressable in groups.
        if let Err(e) = manager.set_profile(None, None, None, None).await {
            warn!("Failed to set default profile: {}", e);
        }

        self.state = RegistrationState::Registered;
        if let Some(listener) = self.new_manager_listener.take() {
            listener(manager);
        }
        Ok(())
    }

    async fn try_reactivate(&mut self) -> Result<(), Error> {
        let (username, attributes) = {
            let account = self.account()?;
            let aci = account
                .aci()
                .ok_or_else(|| Error::Unexpected("reactivation without an aci".into()))?;
            let registration_lock = account
                .pin_master_key()
                .map(|key| key.derive_registration_lock());
            (
                aci.to_string(),
                account_attributes(account, registration_lock)?,
            )
        };

        let service = SignalServiceClient::with_credentials(
            &self.config.service_url,
            &self.config.user_agent,
            username,
            self.account()?.password(),
        )?;
        service
            .set_account_attributes(&attributes)
            .await
            .into_result()?;

        self.account_mut()?.set_registered(true)?;
        info!("Reactivated existing account, verify is not necessary.");
        self.state = RegistrationState::Registered;

        if self.new_manager_listener.is_some() {
            let account = self.take_account()?;
            let manager = Manager::new(account, &self.config)?;
            if let Some(listener) = self.new_manager_listener.take() {
                listener(manager);
            }
        }
        Ok(())
    }

    fn account(&self) -> Result<&SignalAccount, Error> {
        self.account
            .as_ref()
            .ok_or_else(|| Error::Unexpected("account already handed off".into()))
    }

    fn account_mut(&mut self) -> Result<&mut SignalAccount, Error> {
        self.account
            .as_mut()
            .ok_or_else(|| Error::Unexpected("account already handed off".into()))
    }

    fn take_account(&mut self) -> Result<SignalAccount, Error> {
        self.account
            .take()
            .ok_or_else(|| Error::Unexpected("account already handed off".into()))
    }
}

fn account_attributes(
    account: &SignalAccount,
    registration_lock: Option<String>,
) -> Result<AccountAttributes, Error> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    Ok(AccountAttributes {
        name: account.encrypted_device_name().map(str::to_string),
        registration_id: account.registration_id(),
        fetches_messages: true,
        registration_lock,
        unidentified_access_key: Some(BASE64.encode(account.self_unidentified_access_key()?)),
        unrestricted_unidentified_access: account.is_unrestricted_unidentified_access(),
        discoverable_by_phone_number: account.is_discoverable_by_phone_number(),
        capabilities: DeviceCapabilities::default(),
    })
}

/// The caller's locale for voice verification, in BCP 47 form.
fn default_locale() -> String {
    std::env::var("LANG")
        .ok()
        .and_then(|lang| lang.split('.').next().map(str::to_string))
        .filter(|l| !l.is_empty() && l != "C" && l != "POSIX")
        .map(|l| l.replace('_', "-"))
        .unwrap_or_else(|| "en-US".to_string())
}

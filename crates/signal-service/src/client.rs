//! Signal service HTTP client used for registration and account upkeep.

use reqwest::header::ACCEPT_LANGUAGE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use urlencoding::encode;

use crate::error::ServiceError;
use crate::response::ServiceResponse;
use crate::types::{
    AccountAttributes, LockedResponse, PreKeyState, ProfileWrite, StorageManifest,
    VerifyAccountResponse,
};

/// Client for the Signal account endpoints.
///
/// Calls return a [`ServiceResponse`] so that callers can distinguish
/// transport failures from application errors (§`response`).
#[derive(Clone)]
pub struct SignalServiceClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl SignalServiceClient {
    /// Create a client authenticating as `username` (the account's E.164
    /// number while registering, the ACI afterwards).
    pub fn with_credentials(
        base_url: impl Into<String>,
        user_agent: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }

    /// Request a verification code via SMS.
    #[instrument(skip(self, captcha))]
    pub async fn request_sms_verification_code(
        &self,
        captcha: Option<&str>,
    ) -> ServiceResponse<()> {
        let url = format!(
            "{}/v1/accounts/sms/code/{}",
            self.base_url,
            encode(&self.username)
        );
        let mut request = self.authorized(self.client.get(&url));
        if let Some(captcha) = captcha {
            request = request.query(&[("captcha", captcha)]);
        }

        debug!(url = %url, "Requesting SMS verification code");
        self.send_empty(request).await
    }

    /// Request a verification code via voice call, announced in `locale`.
    #[instrument(skip(self, captcha))]
    pub async fn request_voice_verification_code(
        &self,
        locale: &str,
        captcha: Option<&str>,
    ) -> ServiceResponse<()> {
        let url = format!(
            "{}/v1/accounts/voice/code/{}",
            self.base_url,
            encode(&self.username)
        );
        let mut request = self
            .authorized(self.client.get(&url))
            .header(ACCEPT_LANGUAGE, locale);
        if let Some(captcha) = captcha {
            request = request.query(&[("captcha", captcha)]);
        }

        debug!(url = %url, "Requesting voice verification code");
        self.send_empty(request).await
    }

    /// Submit the verification code.
    #[instrument(skip(self, code, attributes))]
    pub async fn verify_account(
        &self,
        code: &str,
        attributes: &AccountAttributes,
    ) -> ServiceResponse<VerifyAccountResponse> {
        self.verify(code, attributes.clone()).await
    }

    /// Submit the verification code together with a registration-lock token.
    #[instrument(skip(self, code, registration_lock, attributes))]
    pub async fn verify_account_with_registration_lock_pin(
        &self,
        code: &str,
        registration_lock: &str,
        attributes: &AccountAttributes,
    ) -> ServiceResponse<VerifyAccountResponse> {
        let mut attributes = attributes.clone();
        attributes.registration_lock = Some(registration_lock.to_string());
        self.verify(code, attributes).await
    }

    async fn verify(
        &self,
        code: &str,
        attributes: AccountAttributes,
    ) -> ServiceResponse<VerifyAccountResponse> {
        let url = format!("{}/v1/accounts/code/{}", self.base_url, encode(code));
        let request = self.authorized(self.client.put(&url)).json(&attributes);

        debug!(url = %url, "Verifying account");
        self.send_json(request).await
    }

    /// Re-submit the account attributes; idempotent reactivation.
    #[instrument(skip(self, attributes))]
    pub async fn set_account_attributes(
        &self,
        attributes: &AccountAttributes,
    ) -> ServiceResponse<()> {
        let url = format!("{}/v1/accounts/attributes/", self.base_url);
        let request = self.authorized(self.client.put(&url)).json(attributes);

        debug!("Setting account attributes");
        self.send_empty(request).await
    }

    /// Upload a batch of one-time pre-keys and a fresh signed pre-key.
    #[instrument(skip(self, state))]
    pub async fn set_pre_keys(&self, state: &PreKeyState) -> ServiceResponse<()> {
        let url = format!("{}/v2/keys", self.base_url);
        let request = self.authorized(self.client.put(&url)).json(state);

        debug!("Uploading {} pre-keys", state.pre_keys.len());
        self.send_empty(request).await
    }

    /// Fetch the remote storage manifest header.
    #[instrument(skip(self))]
    pub async fn get_storage_manifest(&self) -> ServiceResponse<StorageManifest> {
        let url = format!("{}/v1/storage/manifest", self.base_url);
        let request = self.authorized(self.client.get(&url));

        self.send_json(request).await
    }

    /// Upload the (encrypted) profile.
    #[instrument(skip(self, profile))]
    pub async fn write_profile(&self, profile: &ProfileWrite) -> ServiceResponse<()> {
        let url = format!("{}/v1/profile", self.base_url);
        let request = self.authorized(self.client.put(&url)).json(profile);

        self.send_empty(request).await
    }

    async fn send_empty(&self, request: RequestBuilder) -> ServiceResponse<()> {
        match request.send().await {
            Ok(response) => {
                if response.status().is_success() {
                    ServiceResponse::for_result(())
                } else {
                    ServiceResponse::for_application_error(application_error(response).await)
                }
            }
            Err(e) => ServiceResponse::for_execution_error(e.into()),
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ServiceResponse<T> {
        match request.send().await {
            Ok(response) => {
                if response.status().is_success() {
                    match response.json::<T>().await {
                        Ok(result) => ServiceResponse::for_result(result),
                        Err(e) => ServiceResponse::for_execution_error(e.into()),
                    }
                } else {
                    ServiceResponse::for_application_error(application_error(response).await)
                }
            }
            Err(e) => ServiceResponse::for_execution_error(e.into()),
        }
    }
}

/// Map a non-2xx response to the application-error taxonomy.
async fn application_error(response: Response) -> ServiceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    warn!(status = %status, body = %body, "Signal service request failed");

    if status == StatusCode::PAYMENT_REQUIRED {
        ServiceError::CaptchaRequired(body)
    } else if status == StatusCode::LOCKED {
        match serde_json::from_str::<LockedResponse>(&body) {
            Ok(locked) => ServiceError::Locked {
                time_remaining: locked.time_remaining,
                backup_credentials: locked.backup_credentials,
            },
            Err(_) => ServiceError::Locked {
                time_remaining: 0,
                backup_credentials: None,
            },
        }
    } else {
        ServiceError::Api {
            status: status.as_u16(),
            message: body,
        }
    }
}

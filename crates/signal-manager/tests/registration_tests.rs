//! End-to-end registration tests against a mock service.

use std::sync::{Arc, Mutex};

use signal_manager::{Error, KeyBackupConfig, Manager, RegistrationManager, ServiceEnvironmentConfig};
use signal_storage::{MasterKey, SignalAccount};
use tempfile::TempDir;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MRENCLAVE: &str = "a3baab19ef6ce6f34ab9ebb25ba722725ae44a8872dc0ff08ad6d83a9489de87";
const NUMBER: &str = "+14155550101";
const ENCODED_NUMBER: &str = "%2B14155550101";

fn test_config(server: &MockServer) -> ServiceEnvironmentConfig {
    ServiceEnvironmentConfig {
        service_url: server.uri(),
        user_agent: "signal-cli-test".into(),
        key_backup: KeyBackupConfig {
            url: server.uri(),
            enclave_name: "enclave".into(),
            service_id: "service-id".into(),
            mrenclave: MRENCLAVE.into(),
        },
    }
}

struct ManagerSink {
    managers: Arc<Mutex<Vec<Manager>>>,
}

impl ManagerSink {
    fn new() -> (Self, Arc<Mutex<Vec<Manager>>>) {
        let managers = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                managers: managers.clone(),
            },
            managers,
        )
    }

    fn listener(&self) -> Box<dyn FnOnce(Manager) + Send> {
        let managers = self.managers.clone();
        Box::new(move |manager| managers.lock().unwrap().push(manager))
    }
}

async fn mount_post_verification_mocks(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path("/v2/keys"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/profile"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn registration_happy_path() {
    // 1. Mock the service endpoints for the full flow.
    let server = MockServer::start().await;
    let aci = Uuid::from_u128(0x42);

    Mock::given(method("GET"))
        .and(path(format!("/v1/accounts/sms/code/{ENCODED_NUMBER}")))
        .and(query_param("captcha", "abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/accounts/code/123456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "uuid": aci.to_string(),
            "storageCapable": true
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_post_verification_mocks(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/storage/manifest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "version": 3 })))
        .expect(1)
        .mount(&server)
        .await;

    // 2. Fresh account, captcha uri prefix is stripped, dash in the code too.
    let dir = TempDir::new().unwrap();
    let account = SignalAccount::create(dir.path().join("account.json"), NUMBER).unwrap();
    let (sink, managers) = ManagerSink::new();
    let mut registration =
        RegistrationManager::new(account, test_config(&server), Some(sink.listener())).unwrap();

    registration
        .register(false, Some("signalcaptcha://abc"))
        .await
        .unwrap();
    registration.verify_account("123-456", None).await.unwrap();

    // 3. The callback fired exactly once with the finished account.
    let managers = managers.lock().unwrap();
    assert_eq!(managers.len(), 1);
    let account = managers[0].account();
    assert_eq!(account.aci(), Some(aci));
    assert!(account.is_registered());
    assert_eq!(account.pin_master_key(), None);
    assert_eq!(account.registration_lock_pin(), None);

    // 4. The generated pre-keys landed in the protocol store.
    let protocol = &managers[0].storage().protocol;
    let offset_before = account.pre_key_id_offset();
    let first_id = (offset_before + signal_storage::account::PRE_KEY_MAX_ID
        - signal_manager::manager::PRE_KEY_BATCH_SIZE)
        % signal_storage::account::PRE_KEY_MAX_ID;
    assert!(protocol.contains_pre_key(first_id));
}

#[tokio::test]
async fn verify_after_success_is_a_user_error() {
    let server = MockServer::start().await;
    let aci = Uuid::from_u128(0x42);

    Mock::given(method("PUT"))
        .and(path("/v1/accounts/code/123456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "uuid": aci.to_string(),
            "storageCapable": false
        })))
        .mount(&server)
        .await;
    mount_post_verification_mocks(&server).await;

    let dir = TempDir::new().unwrap();
    let account = SignalAccount::create(dir.path().join("account.json"), NUMBER).unwrap();
    let mut registration =
        RegistrationManager::new(account, test_config(&server), None).unwrap();

    registration.verify_account("123456", None).await.unwrap();
    assert!(registration.is_registered());

    let error = registration.verify_account("123456", None).await.unwrap_err();
    assert!(matches!(error, Error::UserError(_)));
}

#[tokio::test]
async fn pin_locked_without_pin_surfaces_time_remaining() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/accounts/code/654321"))
        .respond_with(ResponseTemplate::new(423).set_body_json(serde_json::json!({
            "timeRemaining": 3_600_000u64,
            "backupCredentials": { "username": "backup-user", "password": "backup-pass" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("account.json");
    let account = SignalAccount::create(&file, NUMBER).unwrap();
    let mut registration =
        RegistrationManager::new(account, test_config(&server), None).unwrap();

    let error = registration.verify_account("654321", None).await.unwrap_err();
    assert!(matches!(error, Error::PinLocked(3_600_000)));

    // The on-disk account is untouched.
    let account = SignalAccount::load(&file).unwrap();
    assert!(!account.is_registered());
    assert_eq!(account.aci(), None);
}

#[tokio::test]
async fn pin_locked_verification_retries_through_kbs() {
    // 1. Bare verify is rejected with a registration lock...
    let server = MockServer::start().await;
    let aci = Uuid::from_u128(0x42);
    let master_key = [7u8; 32];

    // The lock-bearing retry is mounted first so it matches first.
    Mock::given(method("PUT"))
        .and(path("/v1/accounts/code/654321"))
        .and(body_string_contains("registrationLock"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "uuid": aci.to_string(),
            "storageCapable": false
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/accounts/code/654321"))
        .respond_with(ResponseTemplate::new(423).set_body_json(serde_json::json!({
            "timeRemaining": 3_600_000u64,
            "backupCredentials": { "username": "backup-user", "password": "backup-pass" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    // 2. ...the pin unlocks the master key at the enclave...
    Mock::given(method("GET"))
        .and(path("/v1/token/enclave"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "backup-token",
            "tries": 10,
            "mrenclave": MRENCLAVE
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/backup/enclave"))
        .and(body_string_contains("backup-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "masterKey": base64_of(master_key)
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_post_verification_mocks(&server).await;

    // 3. ...and the retry persists the pin and master key on the account.
    let dir = TempDir::new().unwrap();
    let account = SignalAccount::create(dir.path().join("account.json"), NUMBER).unwrap();
    let (sink, managers) = ManagerSink::new();
    let mut registration =
        RegistrationManager::new(account, test_config(&server), Some(sink.listener())).unwrap();

    registration
        .verify_account("654-321", Some("1234"))
        .await
        .unwrap();

    let managers = managers.lock().unwrap();
    assert_eq!(managers.len(), 1);
    let account = managers[0].account();
    assert_eq!(account.aci(), Some(aci));
    assert_eq!(
        account.pin_master_key(),
        Some(&MasterKey::from_bytes(master_key))
    );
    assert_eq!(account.registration_lock_pin(), Some("1234"));
}

#[tokio::test]
async fn wrong_pin_leaves_the_account_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/accounts/code/654321"))
        .respond_with(ResponseTemplate::new(423).set_body_json(serde_json::json!({
            "timeRemaining": 3_600_000u64,
            "backupCredentials": { "username": "backup-user", "password": "backup-pass" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/token/enclave"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "backup-token",
            "tries": 5,
            "mrenclave": MRENCLAVE
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/backup/enclave"))
        .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({ "tries": 4 })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("account.json");
    let account = SignalAccount::create(&file, NUMBER).unwrap();
    let mut registration =
        RegistrationManager::new(account, test_config(&server), None).unwrap();

    let error = registration
        .verify_account("654321", Some("0000"))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::IncorrectPin(4)));

    let account = SignalAccount::load(&file).unwrap();
    assert!(!account.is_registered());
    assert_eq!(account.aci(), None);
    assert_eq!(account.pin_master_key(), None);
}

#[tokio::test]
async fn reactivation_skips_verification() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/accounts/attributes/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("account.json");
    let aci = Uuid::from_u128(0x42);
    let mut account = SignalAccount::create(&file, NUMBER).unwrap();
    account.finish_registration(aci, None, None).unwrap();
    // Simulate a prior life that lost its session.
    account.set_registered(false).unwrap();

    let (sink, managers) = ManagerSink::new();
    let mut registration =
        RegistrationManager::new(account, test_config(&server), Some(sink.listener())).unwrap();

    registration.register(false, None).await.unwrap();

    assert!(registration.is_registered());
    let managers = managers.lock().unwrap();
    assert_eq!(managers.len(), 1);
    assert!(managers[0].account().is_registered());
    // No verification-code request was made: the only mock is the
    // attributes endpoint and its expectation is satisfied.
}

#[tokio::test]
async fn failed_reactivation_falls_back_to_code_request() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/accounts/attributes/"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/accounts/sms/code/{ENCODED_NUMBER}")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut account =
        SignalAccount::create(dir.path().join("account.json"), NUMBER).unwrap();
    account
        .finish_registration(Uuid::from_u128(0x42), None, None)
        .unwrap();

    let mut registration =
        RegistrationManager::new(account, test_config(&server), None).unwrap();
    registration.register(false, None).await.unwrap();

    assert!(!registration.is_registered());
}

fn base64_of(bytes: [u8; 32]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD.encode(bytes)
}

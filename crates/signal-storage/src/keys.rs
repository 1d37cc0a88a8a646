//! Key material value types shared by the stores.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::StorageError;

type HmacSha256 = Hmac<Sha256>;

/// Nonce size for AES-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// A remote party's long-term identity public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentityKey([u8; 32]);

impl IdentityKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Option<Self> {
        BASE64.decode(encoded).ok().as_deref().and_then(Self::from_slice)
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKey({})", self.to_base64())
    }
}

/// The local device's long-term Ed25519 identity key pair.
///
/// Only the 32-byte seed is persisted; the public half is derived.
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn public_key(&self) -> IdentityKey {
        IdentityKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.signing_key.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, StorageError> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| StorageError::Crypto(format!("invalid identity key pair: {e}")))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| StorageError::Crypto("identity key pair must be 32 bytes".into()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKeyPair([REDACTED])")
    }
}

/// 32-byte symmetric key protecting a user's profile metadata.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ProfileKey([u8; 32]);

impl ProfileKey {
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Option<Self> {
        BASE64.decode(encoded).ok().as_deref().and_then(Self::from_slice)
    }

    /// Derive the unidentified-access key for this profile key.
    ///
    /// The access key is the first 16 bytes of AES-256-GCM over a zero block
    /// with a zero nonce.
    pub fn derive_access_key(&self) -> Result<[u8; 16], StorageError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        let nonce = Nonce::from_slice(&[0u8; NONCE_SIZE]);
        let ciphertext = cipher.encrypt(nonce, [0u8; 16].as_ref())?;
        let mut access_key = [0u8; 16];
        access_key.copy_from_slice(&ciphertext[..16]);
        Ok(access_key)
    }

    /// Encrypt profile content with this key.
    ///
    /// Output format: [12 bytes nonce][ciphertext with auth tag].
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher.encrypt(nonce, plaintext)?;

        let mut data = nonce_bytes.to_vec();
        data.extend(ciphertext);
        Ok(data)
    }
}

impl fmt::Debug for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProfileKey([REDACTED])")
    }
}

/// Opaque zero-knowledge credential binding a profile key to an ACI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileKeyCredential(Vec<u8>);

impl ProfileKeyCredential {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    pub fn from_base64(encoded: &str) -> Option<Self> {
        BASE64.decode(encoded).ok().map(Self)
    }
}

/// The account master key held by the key backup service.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Option<Self> {
        let bytes = BASE64.decode(encoded).ok()?;
        <[u8; 32]>::try_from(bytes.as_slice()).ok().map(Self)
    }

    /// Derive the registration-lock token proving possession of the master key.
    pub fn derive_registration_lock(&self) -> String {
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(&self.0).expect("HMAC can take key of any size");
        mac.update(b"Registration Lock");
        hex::encode(mac.finalize().into_bytes())
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_lock_is_stable_per_key() {
        let key = MasterKey::from_bytes([0x42u8; 32]);
        let lock = key.derive_registration_lock();

        assert_eq!(lock.len(), 64); // HMAC-SHA256 produces 32 bytes = 64 hex chars
        assert_eq!(lock, key.derive_registration_lock());

        let other = MasterKey::from_bytes([0x43u8; 32]);
        assert_ne!(lock, other.derive_registration_lock());
    }

    #[test]
    fn access_key_is_deterministic() {
        let key = ProfileKey::from_slice(&[7u8; 32]).unwrap();
        assert_eq!(key.derive_access_key().unwrap(), key.derive_access_key().unwrap());

        let other = ProfileKey::from_slice(&[8u8; 32]).unwrap();
        assert_ne!(
            key.derive_access_key().unwrap(),
            other.derive_access_key().unwrap()
        );
    }

    #[test]
    fn profile_encryption_is_randomized() {
        let key = ProfileKey::generate();
        let a = key.encrypt(b"name").unwrap();
        let b = key.encrypt(b"name").unwrap();

        assert_ne!(a, b); // Fresh nonce per encryption
        assert!(a.len() > NONCE_SIZE + 4);
    }

    #[test]
    fn identity_key_pair_round_trips_through_base64() {
        let pair = IdentityKeyPair::generate();
        let restored = IdentityKeyPair::from_base64(&pair.to_base64()).unwrap();

        assert_eq!(pair.public_key(), restored.public_key());
        assert_eq!(pair.sign(b"hello"), restored.sign(b"hello"));
    }

    #[test]
    fn master_key_base64_round_trip() {
        let key = MasterKey::from_bytes([9u8; 32]);
        assert_eq!(MasterKey::from_base64(&key.to_base64()), Some(key.clone()));
        assert_eq!(MasterKey::from_base64("not base64"), None);
        assert_eq!(MasterKey::from_base64(&BASE64.encode([1u8; 16])), None);
    }
}

//! Credential encryption using AES-256-GCM with PBKDF2 key derivation.
//!
//! Ciphertext format: base64(salt || nonce || ciphertext+tag). The ciphertext
//! is opaque to every other module; plaintext only exists between a store
//! write and the consumer that needs the credential.

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac_array;
use sha2::Sha256;
use thiserror::Error;

/// Salt prefix length in the encoded payload
const SALT_SIZE: usize = 16;
/// AES-GCM nonce length
const NONCE_SIZE: usize = 12;
/// PBKDF2 iteration count
const PBKDF2_ITERATIONS: u32 = 100_000;
/// AES-256 key length
const KEY_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed")]
    Decrypt,

    #[error("Malformed ciphertext: {0}")]
    Malformed(String),
}

/// Stateless encryption primitive bound to the process encryption key.
#[derive(Clone)]
pub struct Crypto {
    passphrase: String,
}

impl Crypto {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }

    /// Encrypt plaintext, returning a base64 string safe to store as text.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = derive_key(&self.passphrase, &salt);

        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::Encrypt)?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut payload = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&salt);
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(payload))
    }

    /// Decrypt a payload produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, CryptoError> {
        let payload = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;

        if payload.len() < SALT_SIZE + NONCE_SIZE {
            return Err(CryptoError::Malformed("payload too short".into()));
        }

        let (salt, rest) = payload.split_at(SALT_SIZE);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

        let key = derive_key(&self.passphrase, salt);

        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::Decrypt)?;
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }

    /// Decrypt into a UTF-8 string (credential payloads are text).
    pub fn decrypt_string(&self, encoded: &str) -> Result<String, CryptoError> {
        let bytes = self.decrypt(encoded)?;
        String::from_utf8(bytes).map_err(|e| CryptoError::Malformed(e.to_string()))
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; KEY_SIZE] {
    pbkdf2_hmac_array::<Sha256, KEY_SIZE>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let crypto = Crypto::new("test-passphrase");
        let encrypted = crypto.encrypt(b"ghp_secrettoken123").unwrap();
        assert_ne!(encrypted.as_bytes(), b"ghp_secrettoken123".as_slice());

        let decrypted = crypto.decrypt_string(&encrypted).unwrap();
        assert_eq!(decrypted, "ghp_secrettoken123");
    }

    #[test]
    fn test_unique_ciphertexts() {
        let crypto = Crypto::new("test-passphrase");
        let a = crypto.encrypt(b"same input").unwrap();
        let b = crypto.encrypt(b"same input").unwrap();
        // Random salt and nonce per call
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let encrypted = Crypto::new("right").encrypt(b"data").unwrap();
        assert!(Crypto::new("wrong").decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_tampered_payload_fails() {
        let crypto = Crypto::new("pass");
        let encrypted = crypto.encrypt(b"data").unwrap();
        let mut raw = BASE64.decode(&encrypted).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = BASE64.encode(raw);
        assert!(crypto.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_malformed_input() {
        let crypto = Crypto::new("pass");
        assert!(matches!(
            crypto.decrypt("not-base64!!!"),
            Err(CryptoError::Malformed(_))
        ));
        assert!(matches!(
            crypto.decrypt(&BASE64.encode([0u8; 4])),
            Err(CryptoError::Malformed(_))
        ));
    }
}

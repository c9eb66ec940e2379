//! Authenticated encryption of relay payloads.
//!
//! Blobs are `base64(nonce || ciphertext || tag)` with a fresh 12-byte nonce
//! per message and AES-256-GCM under the session's [`SharedKey`]. Plaintext is
//! the JSON encoding of the payload.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::{RngCore, rngs::OsRng};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::SharedKey;

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Cipher error.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Payload too short ({0} bytes)")]
    TooShort(usize),
    #[error("Encryption failed")]
    Encrypt,
    #[error("Decryption failed (wrong key or tampered payload)")]
    Decrypt,
}

/// Encrypts and decrypts payloads under one session key.
#[derive(Clone)]
pub struct SessionCipher {
    cipher: Aes256Gcm,
}

impl SessionCipher {
    /// Create a cipher for the given key.
    #[must_use]
    pub fn new(key: &SharedKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
        }
    }

    /// Serialize `data` and seal it under a fresh nonce.
    ///
    /// # Errors
    /// Returns error if `data` cannot be serialized.
    pub fn encrypt<T: Serialize + ?Sized>(&self, data: &T) -> Result<String, CipherError> {
        let plaintext = serde_json::to_vec(data)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| CipherError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Open a blob produced by [`Self::encrypt`] and parse its plaintext.
    ///
    /// Callers on the message path treat every error as "drop and continue".
    ///
    /// # Errors
    /// Returns error on bad base64, authentication failure or malformed JSON.
    pub fn decrypt<T: DeserializeOwned>(&self, blob: &str) -> Result<T, CipherError> {
        let raw = BASE64.decode(blob.trim())?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::TooShort(raw.len()));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionCipher(..)")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = SessionCipher::new(&SharedKey::generate());
        let values = [
            json!({"type": "debug_step"}),
            json!({"type": "log", "message": "Hello World! 🚀"}),
            json!([1, 2.5, null, true, {"nested": ["a", "b"]}]),
            json!("plain string"),
        ];

        for value in values {
            let blob = cipher.encrypt(&value).unwrap();
            let opened: Value = cipher.decrypt(&blob).unwrap();
            assert_eq!(opened, value);
        }
    }

    #[test]
    fn test_nonce_freshness() {
        let cipher = SessionCipher::new(&SharedKey::generate());
        let value = json!({"type": "debug_resume"});

        let first = cipher.encrypt(&value).unwrap();
        let second = cipher.encrypt(&value).unwrap();
        assert_ne!(first, second);

        let first_raw = BASE64.decode(&first).unwrap();
        let second_raw = BASE64.decode(&second).unwrap();
        assert_ne!(first_raw[..NONCE_LEN], second_raw[..NONCE_LEN]);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sender = SessionCipher::new(&SharedKey::generate());
        let receiver = SessionCipher::new(&SharedKey::generate());

        let blob = sender.encrypt(&json!({"type": "job_finished"})).unwrap();
        let result: Result<Value, _> = receiver.decrypt(&blob);
        assert!(matches!(result, Err(CipherError::Decrypt)));
    }

    #[test]
    fn test_tampered_and_garbage_payloads_fail() {
        let cipher = SessionCipher::new(&SharedKey::generate());
        let blob = cipher.encrypt(&json!({"type": "job_finished"})).unwrap();

        let mut raw = BASE64.decode(&blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered: Result<Value, _> = cipher.decrypt(&BASE64.encode(&raw));
        assert!(matches!(tampered, Err(CipherError::Decrypt)));

        let short: Result<Value, _> = cipher.decrypt(&BASE64.encode([0u8; 8]));
        assert!(matches!(short, Err(CipherError::TooShort(8))));

        let garbage: Result<Value, _> = cipher.decrypt("%%%");
        assert!(matches!(garbage, Err(CipherError::Base64(_))));
    }

    #[test]
    fn test_non_json_plaintext_fails() {
        let key = SharedKey::from_bytes([1u8; 32]);
        let cipher = SessionCipher::new(&key);

        let nonce = [0u8; NONCE_LEN];
        let sealed = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
            .encrypt(Nonce::from_slice(&nonce), b"not json".as_slice())
            .unwrap();
        let blob = BASE64.encode([nonce.as_slice(), sealed.as_slice()].concat());

        let result: Result<Value, _> = cipher.decrypt(&blob);
        assert!(matches!(result, Err(CipherError::Json(_))));
    }
}

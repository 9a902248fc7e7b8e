// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Password-field encryption.
//!
//! Connection passwords are stored encrypted in the connection list
//! document as `ENC:<base64>` where the payload is a 12-byte nonce
//! followed by the AES-256-GCM ciphertext (authentication tag included).
//!
//! The master key is a base64-encoded 32-byte value taken from the
//! [`KEY_ENV_VAR`] environment variable; it never appears in any
//! configuration document.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Constants
// =============================================================================

/// The prefix marking an encrypted value.
pub const ENCRYPTED_PREFIX: &str = "ENC:";

/// Environment variable holding the base64-encoded master key.
pub const KEY_ENV_VAR: &str = "OPCUA_PW_ENCRYPTION_KEY";

/// Key length in bytes (256 bits).
pub const KEY_LENGTH: usize = 32;

/// Nonce length in bytes (96 bits).
pub const NONCE_LENGTH: usize = 12;

/// Authentication tag length in bytes (128 bits).
pub const TAG_LENGTH: usize = 16;

// =============================================================================
// Encryptor
// =============================================================================

/// AES-256-GCM encryptor for the password field.
#[derive(Clone)]
pub struct Encryptor {
    cipher: Aes256Gcm,
}

impl Encryptor {
    /// Creates an encryptor with the given raw key.
    pub fn new(key: [u8; KEY_LENGTH]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(&key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Creates an encryptor from a base64-encoded key.
    pub fn from_base64(key_base64: &str) -> ConfigResult<Self> {
        let key_bytes = BASE64
            .decode(key_base64.trim())
            .map_err(|e| ConfigError::invalid_encryption_key(format!("invalid base64: {e}")))?;

        if key_bytes.len() != KEY_LENGTH {
            return Err(ConfigError::invalid_encryption_key(format!(
                "expected {} bytes, got {}",
                KEY_LENGTH,
                key_bytes.len()
            )));
        }

        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&key_bytes);
        Ok(Self::new(key))
    }

    /// Creates an encryptor from the [`KEY_ENV_VAR`] environment variable.
    pub fn from_env() -> ConfigResult<Self> {
        let key_base64 = std::env::var(KEY_ENV_VAR)
            .map_err(|_| ConfigError::env_var_not_found(KEY_ENV_VAR))?;
        Self::from_base64(&key_base64)
    }

    /// Encrypts a plaintext and returns the `ENC:` prefixed value.
    pub fn encrypt(&self, plaintext: &str) -> ConfigResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| ConfigError::encryption_failed(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{ENCRYPTED_PREFIX}{}", BASE64.encode(combined)))
    }

    /// Decrypts an `ENC:` prefixed value.
    pub fn decrypt(&self, value: &str) -> ConfigResult<String> {
        let payload = value
            .strip_prefix(ENCRYPTED_PREFIX)
            .ok_or_else(|| ConfigError::decryption_failed("missing ENC: prefix"))?;

        let combined = BASE64
            .decode(payload)
            .map_err(|e| ConfigError::decryption_failed(format!("invalid base64: {e}")))?;

        if combined.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(ConfigError::decryption_failed("ciphertext too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LENGTH);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| ConfigError::decryption_failed("authentication failed"))?;

        String::from_utf8(plaintext)
            .map_err(|e| ConfigError::decryption_failed(format!("invalid UTF-8: {e}")))
    }
}

/// Whether a stored value is encrypted.
#[inline]
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

/// Generates a fresh random key, base64-encoded for the environment.
pub fn generate_key_base64() -> String {
    let key = Aes256Gcm::generate_key(&mut OsRng);
    BASE64.encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_encryptor() -> Encryptor {
        Encryptor::new([7u8; KEY_LENGTH])
    }

    #[test]
    fn encrypt_then_decrypt() {
        let enc = test_encryptor();
        let stored = enc.encrypt("s3cret-password").unwrap();
        assert!(is_encrypted(&stored));
        assert_eq!(enc.decrypt(&stored).unwrap(), "s3cret-password");
    }

    #[test]
    fn nonce_makes_ciphertexts_differ() {
        let enc = test_encryptor();
        let a = enc.encrypt("same").unwrap();
        let b = enc.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(enc.decrypt(&a).unwrap(), enc.decrypt(&b).unwrap());
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let stored = test_encryptor().encrypt("secret").unwrap();
        let other = Encryptor::new([8u8; KEY_LENGTH]);
        assert!(matches!(
            other.decrypt(&stored),
            Err(ConfigError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn rejects_unprefixed_and_short_values() {
        let enc = test_encryptor();
        assert!(enc.decrypt("bm90LXByZWZpeGVk").is_err());
        assert!(enc.decrypt("ENC:AAAA").is_err());
    }

    #[test]
    fn generated_key_is_usable() {
        let key = generate_key_base64();
        let enc = Encryptor::from_base64(&key).unwrap();
        let stored = enc.encrypt("x").unwrap();
        assert_eq!(enc.decrypt(&stored).unwrap(), "x");
    }

    #[test]
    fn short_key_rejected() {
        assert!(matches!(
            Encryptor::from_base64(&BASE64.encode([1u8; 16])),
            Err(ConfigError::InvalidEncryptionKey { .. })
        ));
    }
}

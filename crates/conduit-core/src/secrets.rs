//! At-rest encryption for tenant secrets.
//!
//! Access tokens and webhook secrets are stored as base64 of
//! `nonce || ciphertext` under AES-256-GCM with a random 96-bit nonce per
//! value. The key is supplied as base64 of 32 bytes.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;

use crate::error::{CoreError, Result};

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Symmetric cipher for credential fields.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretCipher(<redacted>)")
    }
}

impl SecretCipher {
    /// Creates a cipher from a base64-encoded 32 byte key.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Crypto` if the key is not valid base64 or has the
    /// wrong length.
    pub fn from_base64_key(key: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(key.trim())
            .map_err(|e| CoreError::Crypto(format!("encryption key is not base64: {e}")))?;

        if key_bytes.len() != KEY_SIZE {
            return Err(CoreError::Crypto(format!(
                "encryption key must be {KEY_SIZE} bytes, got {}",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| CoreError::Crypto(format!("failed to create cipher: {e}")))?;

        Ok(Self { cipher })
    }

    /// Generates a random key, base64-encoded.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_SIZE];
        rand::rng().fill(&mut key);
        BASE64.encode(key)
    }

    /// Encrypts a secret for storage.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Crypto` if encryption fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| CoreError::Crypto(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(sealed))
    }

    /// Decrypts a stored secret.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Crypto` if the value is malformed, was sealed under
    /// another key, or was tampered with.
    pub fn decrypt(&self, sealed: &str) -> Result<String> {
        let bytes = BASE64
            .decode(sealed)
            .map_err(|e| CoreError::Crypto(format!("sealed secret is not base64: {e}")))?;

        if bytes.len() <= NONCE_SIZE {
            return Err(CoreError::Crypto("sealed secret is truncated".to_string()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::Crypto("secret failed authentication".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CoreError::Crypto("decrypted secret is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::from_base64_key(&SecretCipher::generate_key()).unwrap()
    }

    #[test]
    fn sealed_secret_opens_with_same_key() {
        let cipher = cipher();
        let sealed = cipher.encrypt("EAAB1234567890abcdef").unwrap();

        assert_ne!(sealed, "EAAB1234567890abcdef");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "EAAB1234567890abcdef");
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let cipher = cipher();
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn other_key_cannot_open_secret() {
        let sealed = cipher().encrypt("token").unwrap();
        assert!(matches!(cipher().decrypt(&sealed), Err(CoreError::Crypto(_))));
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(SecretCipher::from_base64_key("not base64!!").is_err());
        assert!(SecretCipher::from_base64_key(&BASE64.encode([0u8; 16])).is_err());
    }

    #[test]
    fn rejects_truncated_input() {
        let cipher = cipher();
        assert!(cipher.decrypt(&BASE64.encode([0u8; 8])).is_err());
    }
}

//! Payload secret box.
//!
//! AES-256-GCM with a key derived from a passphrase and a random nonce
//! prepended to each ciphertext. Used for encrypting payloads at rest or
//! in transit to collaborating services; decryption fails on any key
//! mismatch or ciphertext tampering.

#![allow(dead_code)]

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::{GatewayError, GatewayResult};

/// GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Authenticated symmetric encryptor.
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    /// Derive the key as SHA-256 of the passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt a payload. Output layout: `nonce || ciphertext+tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> GatewayResult<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| GatewayError::Internal("Encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a payload produced by [`SecretBox::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> GatewayResult<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(GatewayError::BadRequest(
                "Ciphertext too short".to_string(),
            ));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| GatewayError::BadRequest("Decryption failed: authentication error".to_string()))
    }
}

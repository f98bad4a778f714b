//! XSalsa20-Poly1305 Encryption/Decryption.
//!
//! The NaCl secretbox construction: authenticated encryption with a
//! 192-bit nonce, which is large enough that a fresh random nonce per
//! message never realistically repeats.
//!
//! Blob format: nonce (24 bytes) || tag (16 bytes) || ciphertext

use super::key_derivation::KEY_LEN;
use crate::error::VaultError;
use crypto_secretbox::{
    aead::{Aead, KeyInit},
    Key, Nonce, XSalsa20Poly1305,
};
use rand::{rngs::OsRng, RngCore};

/// Nonce length (bytes) - 192 bits
pub const NONCE_LEN: usize = 24;

/// Authentication tag length (bytes) - 128 bits
pub const TAG_LEN: usize = 16;

/// Encrypts and decrypts with an already derived key
pub struct Encryptor {
    cipher: XSalsa20Poly1305,
}

impl Encryptor {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
        Self { cipher }
    }

    /// Encrypt with a fresh random nonce.
    /// Returns: nonce (24 bytes) || sealed box
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| VaultError::Encryption)?;

        let mut result = Vec::with_capacity(NONCE_LEN + sealed.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&sealed);

        Ok(result)
    }

    /// Decrypt a blob produced by [`Encryptor::encrypt`].
    pub fn decrypt(&self, encrypted: &[u8]) -> Result<Vec<u8>, VaultError> {
        if encrypted.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::Corrupt(format!(
                "blob is {} bytes, need at least {}",
                encrypted.len(),
                NONCE_LEN + TAG_LEN
            )));
        }

        let nonce = Nonce::from_slice(&encrypted[..NONCE_LEN]);
        let sealed = &encrypted[NONCE_LEN..];

        self.cipher
            .decrypt(nonce, sealed)
            .map_err(|_| VaultError::Decryption)
    }
}

//! Crypto module - Encrypts and decrypts the token store.
//!
//! - XSalsa20-Poly1305 authenticated encryption (NaCl secretbox)
//! - Passphrase + pad key derivation
//! - Random 24-byte nonce per encryption

pub mod encryption;
pub mod key_derivation;

pub use encryption::{Encryptor, NONCE_LEN, TAG_LEN};
pub use key_derivation::{derive_key, KEY_LEN};

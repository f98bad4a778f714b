//! Key derivation for the token store.
//!
//! The key is the passphrase bytes followed by a fixed application pad,
//! cut to [`KEY_LEN`]. This matches token stores written by earlier
//! redcapfs releases, so existing stores keep opening.

/// Key length (bytes) - 256 bits
pub const KEY_LEN: usize = 32;

/// Appended to the passphrase before truncation. Longer than `KEY_LEN`,
/// so every key slot is always filled.
const PAD: &[u8] = b" super jumpy something jumps all over ";

/// Derive the store key from a passphrase.
pub fn derive_key(passphrase: &str) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    let material = passphrase.as_bytes().iter().chain(PAD.iter());
    for (slot, byte) in key.iter_mut().zip(material) {
        *slot = *byte;
    }
    key
}

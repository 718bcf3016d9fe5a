//! Key material: the pre-shared secret, per-session keys and randomness

use std::fmt;

use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::KEY_SIZE;

/// Fill a fixed-size array from the OS CSPRNG
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Static secret shared by the client and the device
///
/// Derived once from the operator passphrase and never transmitted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; KEY_SIZE]);

impl SharedSecret {
    /// SHA-256 of the passphrase bytes
    pub fn from_passphrase(passphrase: &str) -> Self {
        let mut digest = Sha256::digest(passphrase.as_bytes());
        let mut secret = [0u8; KEY_SIZE];
        secret.copy_from_slice(digest.as_slice());
        digest.as_mut_slice().zeroize();
        Self(secret)
    }

    /// Wrap an already-derived secret
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// Ephemeral key minted by the client for one session
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    pub fn generate() -> Self {
        Self(random_bytes())
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passphrase_derivation_is_sha256() {
        // FIPS 180-2 test vector for "abc"
        let secret = SharedSecret::from_passphrase("abc");
        assert_eq!(
            secret.as_bytes(),
            &[
                0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d,
                0xae, 0x22, 0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10,
                0xff, 0x61, 0xf2, 0x00, 0x15, 0xad,
            ]
        );
    }

    #[test]
    fn test_session_keys_are_fresh() {
        let a = SessionKey::generate();
        let b = SessionKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let secret = SharedSecret::from_bytes([0x41; KEY_SIZE]);
        let key = SessionKey::from_bytes([0x41; KEY_SIZE]);
        assert_eq!(format!("{:?}", secret), "SharedSecret(<redacted>)");
        assert_eq!(format!("{:?}", key), "SessionKey(<redacted>)");
    }
}

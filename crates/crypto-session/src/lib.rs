//! Crypto Session - authenticated encryption for devlink
//!
//! AES-256-GCM sealing with caller-supplied associated data, SHA-256
//! passphrase derivation, and OS randomness for keys, nonces and challenges.

mod aead;
mod error;
mod keys;

pub use aead::*;
pub use error::*;
pub use keys::*;

pub use shared_protocol::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

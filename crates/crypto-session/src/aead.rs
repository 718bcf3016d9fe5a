//! AES-256-GCM sealing into wire frames

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use shared_protocol::SealedFrame;
use tracing::trace;
use zeroize::Zeroizing;

use crate::{CryptoError, CryptoResult, KEY_SIZE, NONCE_SIZE, TAG_SIZE, random_bytes};

fn cipher(key: &[u8; KEY_SIZE]) -> CryptoResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_SIZE,
        actual: key.len(),
    })
}

/// Seal `plaintext` under `key` with a fresh random nonce
///
/// Returns the frame `nonce ‖ ciphertext ‖ tag`, authenticated over `aad`.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> CryptoResult<SealedFrame> {
    seal_with_nonce(key, random_bytes::<NONCE_SIZE>(), plaintext, aad)
}

/// Seal with an explicit nonce
///
/// The nonce must never repeat under the same key.
pub fn seal_with_nonce(
    key: &[u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> CryptoResult<SealedFrame> {
    let ciphertext = cipher(key)?
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    trace!(len = ciphertext.len(), "sealed frame");

    Ok(SealedFrame { nonce, ciphertext })
}

/// Verify and decrypt a frame
///
/// Tag verification happens before any plaintext is released; on failure
/// nothing is returned.
pub fn open(
    key: &[u8; KEY_SIZE],
    frame: &SealedFrame,
    aad: &[u8],
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    if frame.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::TruncatedCiphertext {
            actual: frame.ciphertext.len(),
        });
    }

    let plaintext = cipher(key)?
        .decrypt(
            Nonce::from_slice(&frame.nonce),
            Payload {
                msg: &frame.ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;

    Ok(Zeroizing::new(plaintext))
}

//! Shared Protocol Definitions for devlink
//!
//! Fixed-layout wire frames, opcodes, status codes and session identifiers
//! shared by the client channel and the device responder.

mod error;
mod packets;
mod session;

pub use error::*;
pub use packets::*;
pub use session::*;

/// AES-GCM nonce size (96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size (128 bits)
pub const TAG_SIZE: usize = 16;

/// Symmetric key size for both the shared secret and session keys (256 bits)
pub const KEY_SIZE: usize = 32;

/// Session identifier size
pub const SESSION_ID_SIZE: usize = 8;

/// Handshake challenge size
pub const CHALLENGE_SIZE: usize = 8;

/// Microsecond timestamp size
pub const TIMESTAMP_SIZE: usize = 8;

pub const OPCODE_SIZE: usize = 1;
pub const STATUS_SIZE: usize = 1;
pub const LED_STATE_SIZE: usize = 1;
pub const TEMPERATURE_SIZE: usize = 4;

/// Bytes every sealed frame adds around its ciphertext
pub const FRAME_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Handshake message 1: key offer sealed under the shared secret
pub const KEY_OFFER_PLAINTEXT_LEN: usize = KEY_SIZE + CHALLENGE_SIZE;
pub const KEY_OFFER_FRAME_LEN: usize = FRAME_OVERHEAD + KEY_OFFER_PLAINTEXT_LEN;

/// Handshake message 2: session id sealed under the offered key
pub const SESSION_GRANT_FRAME_LEN: usize = FRAME_OVERHEAD + SESSION_ID_SIZE;

/// Handshake messages 3 and 4: clock sync and its echo
pub const CLOCK_SYNC_FRAME_LEN: usize = FRAME_OVERHEAD + TIMESTAMP_SIZE;

/// Steady-state request frame
pub const REQUEST_PLAINTEXT_LEN: usize = OPCODE_SIZE + TIMESTAMP_SIZE;
pub const REQUEST_FRAME_LEN: usize = FRAME_OVERHEAD + REQUEST_PLAINTEXT_LEN;

/// Steady-state response frame without payload
pub const RESPONSE_HEADER_LEN: usize = STATUS_SIZE + TIMESTAMP_SIZE;
pub const RESPONSE_BASE_FRAME_LEN: usize = FRAME_OVERHEAD + RESPONSE_HEADER_LEN;

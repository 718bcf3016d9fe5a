//! Secure Channel - the devlink session protocol
//!
//! A two-round-trip handshake turns the pre-shared secret into a
//! client-minted session key and a device-issued session id. Every later
//! request and response is sealed under that key with the session id as
//! associated data.
//!
//! The [`device`] module holds the device half of the protocol, and
//! [`loopback`] joins the two halves in-process.

mod channel;
pub mod device;
mod error;
mod handshake;
pub mod loopback;

pub use channel::*;
pub use error::*;
pub use handshake::ActiveSession;

pub use crypto_session::SharedSecret;
pub use shared_protocol::{ResponseStatus, SessionId, SessionState, Timestamp};

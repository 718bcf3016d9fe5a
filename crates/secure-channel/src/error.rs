//! Channel error types

use crypto_session::CryptoError;
use net_transport::TransportError;
use shared_protocol::ProtocolError;
use thiserror::Error;

/// Why a channel operation failed
///
/// An `EXPIRED` reply is not an error; it arrives as a normal status.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("No active session")]
    NotEstablished,

    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

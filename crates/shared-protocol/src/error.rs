//! Error types for the protocol

use thiserror::Error;

use crate::{RequestOpcode, ResponseStatus, Timestamp};

/// Protocol error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Frame length mismatch: expected {expected} bytes, got {actual}")]
    FrameLength { expected: usize, actual: usize },

    #[error("Unknown request opcode: {0}")]
    UnknownOpcode(u8),

    #[error("Opcode {0:?} is local-only and never goes on the wire")]
    LocalOpcode(RequestOpcode),

    #[error("Unknown response status: {0}")]
    UnknownStatus(i8),

    #[error("Response status {status} arrived without the {opcode:?} payload")]
    MissingPayload {
        opcode: RequestOpcode,
        status: ResponseStatus,
    },

    #[error("Response echoed timestamp {actual:?}, request carried {expected:?}")]
    TimestampMismatch {
        expected: Timestamp,
        actual: Timestamp,
    },
}

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

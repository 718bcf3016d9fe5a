//! Session identifiers, timestamps and session state

use std::fmt;

use chrono::{DateTime, Local, Utc};

use crate::{ProtocolError, ProtocolResult, SESSION_ID_SIZE, TIMESTAMP_SIZE};

/// Human-readable server time format
pub const SERVER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Device-issued session identifier
///
/// Used as additional authenticated data for every post-handshake frame, so
/// a ciphertext only opens under the session it was sealed for.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub [u8; SESSION_ID_SIZE]);

impl SessionId {
    /// "No session" sentinel, also the AAD of the first handshake message
    pub const NONE: SessionId = SessionId([0u8; SESSION_ID_SIZE]);

    pub fn from_slice(data: &[u8]) -> ProtocolResult<Self> {
        let bytes: [u8; SESSION_ID_SIZE] = data.try_into().map_err(|_| ProtocolError::FrameLength {
            expected: SESSION_ID_SIZE,
            actual: data.len(),
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<u64> for SessionId {
    fn from(value: u64) -> Self {
        Self(value.to_be_bytes())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self)
    }
}

/// Microseconds since the Unix epoch, big-endian on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Current wall-clock time
    pub fn now() -> Self {
        Self(u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0))
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn to_be_bytes(&self) -> [u8; TIMESTAMP_SIZE] {
        self.0.to_be_bytes()
    }

    pub fn from_be_slice(data: &[u8]) -> ProtocolResult<Self> {
        let bytes: [u8; TIMESTAMP_SIZE] = data.try_into().map_err(|_| ProtocolError::FrameLength {
            expected: TIMESTAMP_SIZE,
            actual: data.len(),
        })?;
        Ok(Self(u64::from_be_bytes(bytes)))
    }

    /// Microseconds elapsed from `earlier` to `self`, zero if `earlier` is later
    pub fn micros_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Render in local calendar time
    pub fn to_local_string(&self) -> String {
        i64::try_from(self.0)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_micros)
            .map(|utc| {
                utc.with_timezone(&Local)
                    .format(SERVER_TIME_FORMAT)
                    .to_string()
            })
            .unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_local_string())
    }
}

/// Client-side session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session key; only the handshake may run. Closed and expired
    /// sessions return here.
    #[default]
    Uninitialized,
    /// Handshake completed; requests are sealed under the session key
    Active,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => f.write_str("uninitialized"),
            SessionState::Active => f.write_str("active"),
        }
    }
}

//! Client side of the session handshake
//!
//! ```text
//! client                                          device
//!   | seal_secret(key ‖ challenge, aad = id)   68B  |
//!   |------------------------------------------------>|
//!   |            seal_key(session_id, aad = challenge) 36B
//!   |<------------------------------------------------|
//!   | seal_key(now_us, aad = session_id)       36B    |
//!   |------------------------------------------------>|
//!   |            seal_key(now_us, aad = session_id) 36B
//!   |<------------------------------------------------|
//! ```
//!
//! Only a device holding the shared secret can learn the session key, so a
//! grant that opens under that key authenticates the device. The clock echo
//! confirms both sides hold the same key and session id before the client
//! commits to them.

use std::fmt;

use crypto_session::{SessionKey, SharedSecret, open, random_bytes, seal};
use net_transport::{Transport, TransportError};
use shared_protocol::{
    CHALLENGE_SIZE, Challenge, KeyOffer, SESSION_ID_SIZE, SealedFrame, SessionId,
    TIMESTAMP_SIZE, Timestamp,
};
use tracing::debug;
use zeroize::Zeroizing;

use crate::{ChannelError, ChannelResult};

/// Key material of an established session
///
/// The key and id only ever exist together; dropping the session zeroizes
/// the key.
pub struct ActiveSession {
    key: SessionKey,
    id: SessionId,
    established_at: Timestamp,
}

impl ActiveSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Device-echoed clock from the handshake
    pub fn established_at(&self) -> Timestamp {
        self.established_at
    }

    pub(crate) fn key(&self) -> &SessionKey {
        &self.key
    }
}

impl fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSession")
            .field("id", &self.id)
            .field("established_at", &self.established_at)
            .finish_non_exhaustive()
    }
}

/// Run the four-message exchange
///
/// `aad` authenticates the key offer; it is the sentinel unless a session is
/// being replaced. Nothing is returned unless every step verifies.
pub(crate) fn perform<T: Transport + ?Sized>(
    transport: &mut T,
    secret: &SharedSecret,
    aad: SessionId,
) -> ChannelResult<ActiveSession> {
    let key = SessionKey::generate();
    let challenge: Challenge = random_bytes::<CHALLENGE_SIZE>();

    let offer = KeyOffer {
        key: Zeroizing::new(*key.as_bytes()),
        challenge,
    };
    let frame = seal(secret.as_bytes(), &offer.encode(), aad.as_bytes())?;
    transport.send(&frame.to_bytes())?;
    debug!("handshake 1/4: key offer sent");

    let grant = receive_frame(transport, SESSION_ID_SIZE)?;
    let id = SessionId::from_slice(&open(key.as_bytes(), &grant, &challenge)?)?;
    if id.is_none() {
        return Err(ChannelError::HandshakeRejected(
            "device granted the reserved sentinel session id".to_string(),
        ));
    }
    debug!(session_id = %id, "handshake 2/4: session granted");

    let sent = Timestamp::now();
    let frame = seal(key.as_bytes(), &sent.to_be_bytes(), id.as_bytes())?;
    transport.send(&frame.to_bytes())?;
    debug!("handshake 3/4: clock sync sent");

    let echo = receive_frame(transport, TIMESTAMP_SIZE)?;
    let echoed = Timestamp::from_be_slice(&open(key.as_bytes(), &echo, id.as_bytes())?)?;
    if echoed != sent {
        return Err(ChannelError::HandshakeRejected(format!(
            "clock echo mismatch: sent {}us, device returned {}us",
            sent.as_micros(),
            echoed.as_micros()
        )));
    }
    debug!("handshake 4/4: clock echo verified");

    Ok(ActiveSession {
        key,
        id,
        established_at: echoed,
    })
}

fn receive_frame<T: Transport + ?Sized>(
    transport: &mut T,
    plaintext_len: usize,
) -> ChannelResult<SealedFrame> {
    let expected = SealedFrame::wire_len(plaintext_len);
    let data = transport.receive(expected)?;
    if data.is_empty() {
        return Err(TransportError::Timeout { expected }.into());
    }
    Ok(SealedFrame::from_bytes(&data, plaintext_len)?)
}

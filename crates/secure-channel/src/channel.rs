//! Steady-state request/response channel and session state machine
//!
//! ```text
//! Uninitialized --establish ok--> Active --close / EXPIRED--> Uninitialized
//!                                 Active --ERROR--> Active
//! ```

use crypto_session::{SharedSecret, open, seal};
use net_transport::{Transport, TransportError};
use shared_protocol::{
    FRAME_OVERHEAD, ProtocolError, RESPONSE_BASE_FRAME_LEN, RESPONSE_HEADER_LEN, Request,
    RequestOpcode, Response, ResponsePayload, ResponseStatus, SealedFrame, SessionId,
    SessionState, Timestamp,
};
use tracing::{debug, info, warn};

use crate::handshake::{self, ActiveSession};
use crate::{ChannelError, ChannelResult};

/// An authenticated device reply
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<P> {
    pub status: ResponseStatus,
    /// Request timestamp as echoed by the device
    pub server_time: Timestamp,
    /// Present only when `status` is `Ok`
    pub payload: Option<P>,
}

/// A reply collapsed for presentation
///
/// Transport, crypto and protocol failures all read as `Error` with no
/// server time.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<P> {
    pub status: ResponseStatus,
    pub server_time: Option<Timestamp>,
    pub payload: P,
}

impl<P: Default> Outcome<P> {
    pub fn failed() -> Self {
        Self {
            status: ResponseStatus::Error,
            server_time: None,
            payload: P::default(),
        }
    }

    fn collapse(operation: &str, result: ChannelResult<Reply<P>>) -> Self {
        match result {
            Ok(reply) => Self {
                status: reply.status,
                server_time: Some(reply.server_time),
                payload: reply.payload.unwrap_or_default(),
            },
            Err(e) => {
                warn!("{} failed: {}", operation, e);
                Self::failed()
            }
        }
    }
}

impl<P> Outcome<P> {
    /// Local-time rendering of the server time, empty when there is none
    pub fn server_time_string(&self) -> String {
        self.server_time
            .map(|t| t.to_local_string())
            .unwrap_or_default()
    }
}

/// Collapsed handshake result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Established {
    pub success: bool,
    pub server_time: Option<Timestamp>,
}

impl Established {
    pub fn server_time_string(&self) -> String {
        self.server_time
            .map(|t| t.to_local_string())
            .unwrap_or_default()
    }
}

/// Client end of the device session protocol
///
/// Single-flight: every operation takes `&mut self` and completes one full
/// round trip before returning.
pub struct SecureChannel<T> {
    transport: T,
    secret: SharedSecret,
    session: Option<ActiveSession>,
}

impl<T: Transport> SecureChannel<T> {
    pub fn new(transport: T, secret: SharedSecret) -> Self {
        Self {
            transport,
            secret,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.session.is_some() {
            SessionState::Active
        } else {
            SessionState::Uninitialized
        }
    }

    /// Current session id, or the sentinel
    pub fn session_id(&self) -> SessionId {
        self.session
            .as_ref()
            .map(ActiveSession::id)
            .unwrap_or(SessionId::NONE)
    }

    pub fn session(&self) -> Option<&ActiveSession> {
        self.session.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Run the handshake and commit the new session on success
    ///
    /// Any existing session is discarded first, so a failed handshake
    /// always leaves the channel uninitialized.
    pub fn try_establish(&mut self) -> ChannelResult<Timestamp> {
        let aad = self.session_id();
        if let Some(previous) = self.session.take() {
            info!(session_id = %previous.id(), "Discarding session for a new handshake");
        }

        let session = handshake::perform(&mut self.transport, &self.secret, aad)?;
        let server_time = session.established_at();
        info!(session_id = %session.id(), "Session established");

        self.session = Some(session);
        Ok(server_time)
    }

    pub fn establish(&mut self) -> Established {
        match self.try_establish() {
            Ok(server_time) => Established {
                success: true,
                server_time: Some(server_time),
            },
            Err(e) => {
                warn!("Handshake failed: {}", e);
                Established {
                    success: false,
                    server_time: None,
                }
            }
        }
    }

    pub fn try_get_temperature(&mut self) -> ChannelResult<Reply<f32>> {
        let response = self.exchange(RequestOpcode::GetTemperature)?;
        let payload = match response.payload {
            ResponsePayload::Temperature(celsius) if response.status == ResponseStatus::Ok => {
                Some(celsius)
            }
            _ => None,
        };

        Ok(Reply {
            status: response.status,
            server_time: response.timestamp,
            payload,
        })
    }

    pub fn get_temperature(&mut self) -> Outcome<f32> {
        Outcome::collapse("get_temperature", self.try_get_temperature())
    }

    pub fn try_toggle_led(&mut self) -> ChannelResult<Reply<bool>> {
        let response = self.exchange(RequestOpcode::ToggleLed)?;
        let payload = match response.payload {
            ResponsePayload::LedState(on) if response.status == ResponseStatus::Ok => Some(on),
            _ => None,
        };

        Ok(Reply {
            status: response.status,
            server_time: response.timestamp,
            payload,
        })
    }

    pub fn toggle_led(&mut self) -> Outcome<bool> {
        Outcome::collapse("toggle_led", self.try_toggle_led())
    }

    /// Close the session
    ///
    /// Local key material is dropped once the exchange finishes, whatever
    /// the device answered.
    pub fn try_close(&mut self) -> ChannelResult<Reply<()>> {
        let result = self.exchange(RequestOpcode::Close);
        if let Some(session) = self.session.take() {
            info!(session_id = %session.id(), "Session closed");
        }

        let response = result?;
        Ok(Reply {
            status: response.status,
            server_time: response.timestamp,
            payload: (response.status == ResponseStatus::Ok).then_some(()),
        })
    }

    pub fn close(&mut self) -> Outcome<()> {
        Outcome::collapse("close", self.try_close())
    }

    /// One sealed request and its sealed response
    fn exchange(&mut self, opcode: RequestOpcode) -> ChannelResult<Response> {
        let session = self.session.as_ref().ok_or(ChannelError::NotEstablished)?;
        let key = session.key().as_bytes();
        let id = session.id();

        let request = Request::new(opcode);
        let frame = seal(key, &request.encode()?, id.as_bytes())?;
        self.transport.send(&frame.to_bytes())?;
        debug!(?opcode, "request sent");

        let full_len = opcode.response_frame_len();
        let data = self.transport.receive(full_len)?;
        let plaintext_len = match data.len() {
            0 => return Err(TransportError::Timeout { expected: full_len }.into()),
            n if n == full_len => full_len - FRAME_OVERHEAD,
            RESPONSE_BASE_FRAME_LEN => RESPONSE_HEADER_LEN,
            n => {
                return Err(ProtocolError::FrameLength {
                    expected: full_len,
                    actual: n,
                }
                .into());
            }
        };

        let frame = SealedFrame::from_bytes(&data, plaintext_len)?;
        let response = Response::decode(&open(key, &frame, id.as_bytes())?, opcode)?;
        if response.timestamp != request.timestamp {
            return Err(ProtocolError::TimestampMismatch {
                expected: request.timestamp,
                actual: response.timestamp,
            }
            .into());
        }
        debug!(?opcode, status = %response.status, "response verified");

        if response.status == ResponseStatus::Expired {
            self.session = None;
            info!(session_id = %id, "Device reported the session expired");
        }

        Ok(response)
    }
}

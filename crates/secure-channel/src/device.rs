//! Device half of the session protocol
//!
//! [`Device`] consumes whole frames and produces the sealed reply, if any.
//! It keeps the firmware's rules:
//! - a key offer always authenticates under the sentinel session id
//! - requests older than the last accepted one get no reply
//! - a gap above the session timeout is answered with `EXPIRED` and ends the
//!   session
//! - `CLOSE` is answered with `OK` and ends the session
//! - replies echo the request timestamp

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use crypto_session::{SessionKey, SharedSecret, open, random_bytes, seal};
use rand::Rng;
use serde::{Deserialize, Serialize};
use shared_protocol::{
    CLOCK_SYNC_FRAME_LEN, KEY_OFFER_FRAME_LEN, KEY_OFFER_PLAINTEXT_LEN, KeyOffer,
    REQUEST_FRAME_LEN, REQUEST_PLAINTEXT_LEN, Request, RequestOpcode, Response, ResponsePayload,
    ResponseStatus, SESSION_ID_SIZE, SealedFrame, SessionId, TIMESTAMP_SIZE, Timestamp,
};
use tracing::{debug, info, warn};

use crate::ChannelResult;

/// Device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Largest accepted gap between consecutive requests
    pub session_timeout_secs: u64,
    /// How long the device waits for the clock sync after granting a session
    pub handshake_timeout_ms: u64,
    /// LED level at power-on
    pub initial_led: bool,
}

impl DeviceConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 60,
            handshake_timeout_ms: 2000,
            initial_led: false,
        }
    }
}

/// Hardware the device answers for
pub trait Peripherals {
    /// Celsius, or `None` when the sensor read fails
    fn read_temperature(&mut self) -> Option<f32>;

    /// Flip the LED and return the new level, or `None` when the driver fails
    fn toggle_led(&mut self) -> Option<bool>;

    /// Current LED level
    fn led(&self) -> bool;
}

/// Software peripherals: a noisy thermometer and a flag for the LED
#[derive(Debug, Clone)]
pub struct SimulatedPeripherals {
    led: bool,
    base_celsius: f32,
    jitter: f32,
    sensor_fault: bool,
}

impl SimulatedPeripherals {
    pub fn new(initial_led: bool) -> Self {
        Self {
            led: initial_led,
            base_celsius: 23.5,
            jitter: 0.5,
            sensor_fault: false,
        }
    }

    /// Fixed reading with no noise
    pub fn with_temperature(mut self, celsius: f32) -> Self {
        self.base_celsius = celsius;
        self.jitter = 0.0;
        self
    }

    pub fn set_sensor_fault(&mut self, fault: bool) {
        self.sensor_fault = fault;
    }
}

impl Default for SimulatedPeripherals {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Peripherals for SimulatedPeripherals {
    fn read_temperature(&mut self) -> Option<f32> {
        if self.sensor_fault {
            return None;
        }
        if self.jitter == 0.0 {
            return Some(self.base_celsius);
        }
        let offset = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Some(self.base_celsius + offset)
    }

    fn toggle_led(&mut self) -> Option<bool> {
        self.led = !self.led;
        Some(self.led)
    }

    fn led(&self) -> bool {
        self.led
    }
}

struct DeviceSession {
    key: SessionKey,
    id: SessionId,
    latest: Timestamp,
}

enum Phase {
    AwaitingOffer,
    AwaitingClockSync { key: SessionKey, id: SessionId },
    Active(DeviceSession),
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::AwaitingOffer => f.write_str("AwaitingOffer"),
            Phase::AwaitingClockSync { id, .. } => write!(f, "AwaitingClockSync({})", id),
            Phase::Active(session) => write!(f, "Active({})", session.id),
        }
    }
}

/// Frame-level device state machine
pub struct Device<P> {
    secret: SharedSecret,
    config: DeviceConfig,
    peripherals: P,
    phase: Phase,
}

impl<P: Peripherals> Device<P> {
    pub fn new(secret: SharedSecret, config: DeviceConfig, peripherals: P) -> Self {
        Self {
            secret,
            config,
            peripherals,
            phase: Phase::AwaitingOffer,
        }
    }

    /// Size of the next frame the device will accept
    pub fn expected_frame_len(&self) -> usize {
        match self.phase {
            Phase::AwaitingOffer => KEY_OFFER_FRAME_LEN,
            Phase::AwaitingClockSync { .. } => CLOCK_SYNC_FRAME_LEN,
            Phase::Active(_) => REQUEST_FRAME_LEN,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Active(_))
    }

    pub fn is_handshaking(&self) -> bool {
        matches!(self.phase, Phase::AwaitingClockSync { .. })
    }

    /// Id of the active session, or the sentinel
    pub fn session_id(&self) -> SessionId {
        match &self.phase {
            Phase::Active(session) => session.id,
            _ => SessionId::NONE,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn peripherals(&self) -> &P {
        &self.peripherals
    }

    pub fn peripherals_mut(&mut self) -> &mut P {
        &mut self.peripherals
    }

    /// Give up on a granted session whose clock sync never arrived
    pub fn abort_handshake(&mut self) {
        if let Phase::AwaitingClockSync { id, .. } = &self.phase {
            warn!(session_id = %id, "Clock sync not received, handshake aborted");
            self.phase = Phase::AwaitingOffer;
        }
    }

    /// Drop any session or half-finished handshake
    pub fn reset(&mut self) {
        if !matches!(self.phase, Phase::AwaitingOffer) {
            info!(phase = ?self.phase, "Device reset");
        }
        self.phase = Phase::AwaitingOffer;
    }

    /// Process one inbound frame and return the reply to send, if any
    pub fn handle_frame(&mut self, frame: &[u8]) -> Option<Bytes> {
        match std::mem::replace(&mut self.phase, Phase::AwaitingOffer) {
            Phase::AwaitingOffer => match self.accept_offer(frame) {
                Ok((reply, key, id)) => {
                    debug!(session_id = %id, "session granted, awaiting clock sync");
                    self.phase = Phase::AwaitingClockSync { key, id };
                    Some(reply)
                }
                Err(e) => {
                    debug!("Key offer rejected: {}", e);
                    None
                }
            },
            Phase::AwaitingClockSync { key, id } => match Self::sync_clock(&key, id, frame) {
                Ok((reply, latest)) => {
                    info!(session_id = %id, "Session established");
                    self.phase = Phase::Active(DeviceSession { key, id, latest });
                    Some(reply)
                }
                Err(e) => {
                    warn!(session_id = %id, "Clock sync rejected: {}", e);
                    None
                }
            },
            Phase::Active(session) => self.serve(session, frame),
        }
    }

    fn accept_offer(&self, frame: &[u8]) -> ChannelResult<(Bytes, SessionKey, SessionId)> {
        let frame = SealedFrame::from_bytes(frame, KEY_OFFER_PLAINTEXT_LEN)?;
        let plaintext = open(self.secret.as_bytes(), &frame, SessionId::NONE.as_bytes())?;
        let offer = KeyOffer::decode(&plaintext)?;
        let key = SessionKey::from_bytes(*offer.key);

        let id = loop {
            let id = SessionId(random_bytes::<SESSION_ID_SIZE>());
            if !id.is_none() {
                break id;
            }
        };

        let reply = seal(key.as_bytes(), id.as_bytes(), &offer.challenge)?;
        Ok((reply.to_bytes(), key, id))
    }

    fn sync_clock(
        key: &SessionKey,
        id: SessionId,
        frame: &[u8],
    ) -> ChannelResult<(Bytes, Timestamp)> {
        let frame = SealedFrame::from_bytes(frame, TIMESTAMP_SIZE)?;
        let clock = Timestamp::from_be_slice(&open(key.as_bytes(), &frame, id.as_bytes())?)?;
        let reply = seal(key.as_bytes(), &clock.to_be_bytes(), id.as_bytes())?;
        Ok((reply.to_bytes(), clock))
    }

    fn serve(&mut self, mut session: DeviceSession, frame: &[u8]) -> Option<Bytes> {
        let request = match Self::open_request(&session, frame) {
            Ok(request) => request,
            Err(e) => {
                debug!(session_id = %session.id, "Request dropped: {}", e);
                self.phase = Phase::Active(session);
                return None;
            }
        };

        if request.timestamp < session.latest {
            debug!(session_id = %session.id, "Stale request ignored");
            self.phase = Phase::Active(session);
            return None;
        }

        let gap = request.timestamp.micros_since(session.latest);
        session.latest = request.timestamp;
        let timeout = self.config.session_timeout().as_micros();

        let (status, payload, keep) = if u128::from(gap) > timeout {
            info!(session_id = %session.id, gap_us = gap, "Session expired");
            (ResponseStatus::Expired, ResponsePayload::None, false)
        } else {
            match request.opcode {
                RequestOpcode::Close => {
                    info!(session_id = %session.id, "Session closed by client");
                    (ResponseStatus::Ok, ResponsePayload::None, false)
                }
                RequestOpcode::GetTemperature => match self.peripherals.read_temperature() {
                    Some(celsius) => {
                        (ResponseStatus::Ok, ResponsePayload::Temperature(celsius), true)
                    }
                    None => {
                        warn!("Temperature sensor read failed");
                        (ResponseStatus::Error, ResponsePayload::Temperature(0.0), true)
                    }
                },
                RequestOpcode::ToggleLed => match self.peripherals.toggle_led() {
                    Some(on) => (ResponseStatus::Ok, ResponsePayload::LedState(on), true),
                    None => {
                        warn!("LED toggle failed");
                        let on = self.peripherals.led();
                        (ResponseStatus::Error, ResponsePayload::LedState(on), true)
                    }
                },
                RequestOpcode::Timeout => {
                    self.phase = Phase::Active(session);
                    return None;
                }
            }
        };

        let response = Response {
            status,
            timestamp: request.timestamp,
            payload,
        };
        let reply = seal(session.key.as_bytes(), &response.encode(), session.id.as_bytes());

        if keep {
            self.phase = Phase::Active(session);
        }

        match reply {
            Ok(frame) => Some(frame.to_bytes()),
            Err(e) => {
                warn!("Failed to seal response: {}", e);
                None
            }
        }
    }

    fn open_request(session: &DeviceSession, frame: &[u8]) -> ChannelResult<Request> {
        let frame = SealedFrame::from_bytes(frame, REQUEST_PLAINTEXT_LEN)?;
        let plaintext = open(session.key.as_bytes(), &frame, session.id.as_bytes())?;
        Ok(Request::decode(&plaintext)?)
    }
}

impl<P> fmt::Debug for Device<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("phase", &self.phase)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

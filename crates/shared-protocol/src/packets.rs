//! Wire frames for the handshake and steady-state exchanges
//!
//! Every frame on the wire is `nonce(12) ‖ ciphertext ‖ tag(16)`. The
//! plaintexts carried inside are fixed-width: integers are big-endian, the
//! temperature payload is a little-endian IEEE-754 `f32`.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use zeroize::Zeroizing;

use crate::{
    CHALLENGE_SIZE, FRAME_OVERHEAD, KEY_OFFER_PLAINTEXT_LEN, KEY_SIZE, LED_STATE_SIZE, NONCE_SIZE,
    ProtocolError, ProtocolResult, REQUEST_PLAINTEXT_LEN, RESPONSE_HEADER_LEN, TAG_SIZE,
    TEMPERATURE_SIZE, Timestamp,
};

/// Handshake challenge, the AAD of the device's session grant
pub type Challenge = [u8; CHALLENGE_SIZE];

/// Request opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestOpcode {
    /// End the session
    Close = 0x00,
    /// Read the device temperature sensor
    GetTemperature = 0x01,
    /// Flip the device LED
    ToggleLed = 0x02,
    /// Reserved for local bookkeeping, never encoded
    Timeout = 0x03,
}

impl RequestOpcode {
    /// Payload width the device appends to an `Ok` response
    pub fn payload_len(self) -> usize {
        match self {
            RequestOpcode::GetTemperature => TEMPERATURE_SIZE,
            RequestOpcode::ToggleLed => LED_STATE_SIZE,
            RequestOpcode::Close | RequestOpcode::Timeout => 0,
        }
    }

    /// Full response frame length when the payload is present
    pub fn response_frame_len(self) -> usize {
        SealedFrame::wire_len(RESPONSE_HEADER_LEN + self.payload_len())
    }

    pub fn is_wire(self) -> bool {
        !matches!(self, RequestOpcode::Timeout)
    }
}

impl TryFrom<u8> for RequestOpcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> ProtocolResult<Self> {
        match value {
            0x00 => Ok(RequestOpcode::Close),
            0x01 => Ok(RequestOpcode::GetTemperature),
            0x02 => Ok(RequestOpcode::ToggleLed),
            0x03 => Err(ProtocolError::LocalOpcode(RequestOpcode::Timeout)),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

/// Response status, a signed byte on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum ResponseStatus {
    /// The device dropped the session; the client must handshake again
    Expired = -1,
    /// The request failed; the session stays usable
    Error = 0,
    Ok = 1,
}

impl TryFrom<i8> for ResponseStatus {
    type Error = ProtocolError;

    fn try_from(value: i8) -> ProtocolResult<Self> {
        match value {
            -1 => Ok(ResponseStatus::Expired),
            0 => Ok(ResponseStatus::Error),
            1 => Ok(ResponseStatus::Ok),
            other => Err(ProtocolError::UnknownStatus(other)),
        }
    }
}

impl From<ResponseStatus> for i8 {
    fn from(status: ResponseStatus) -> Self {
        status as i8
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseStatus::Expired => f.write_str("EXPIRED"),
            ResponseStatus::Error => f.write_str("ERROR"),
            ResponseStatus::Ok => f.write_str("OK"),
        }
    }
}

/// An AEAD-sealed frame as it travels on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedFrame {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the 16-byte tag appended
    pub ciphertext: Vec<u8>,
}

impl SealedFrame {
    /// Wire length of a frame carrying `plaintext_len` bytes
    pub const fn wire_len(plaintext_len: usize) -> usize {
        FRAME_OVERHEAD + plaintext_len
    }

    pub fn len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Length of the plaintext sealed inside
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }

    /// Serialize for transmission
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        buf.put_slice(&self.nonce);
        buf.put_slice(&self.ciphertext);
        buf.freeze()
    }

    /// Split a received buffer, which must hold exactly `plaintext_len`
    /// bytes of sealed payload
    pub fn from_bytes(data: &[u8], plaintext_len: usize) -> ProtocolResult<Self> {
        let expected = Self::wire_len(plaintext_len);
        if data.len() != expected {
            return Err(ProtocolError::FrameLength {
                expected,
                actual: data.len(),
            });
        }

        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce);

        Ok(Self {
            nonce: nonce_bytes,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Handshake message 1 plaintext: the client-minted session key and challenge
pub struct KeyOffer {
    pub key: Zeroizing<[u8; KEY_SIZE]>,
    pub challenge: Challenge,
}

impl KeyOffer {
    pub fn encode(&self) -> Zeroizing<Vec<u8>> {
        let mut plaintext = Zeroizing::new(Vec::with_capacity(KEY_OFFER_PLAINTEXT_LEN));
        plaintext.extend_from_slice(&*self.key);
        plaintext.extend_from_slice(&self.challenge);
        plaintext
    }

    pub fn decode(data: &[u8]) -> ProtocolResult<Self> {
        if data.len() != KEY_OFFER_PLAINTEXT_LEN {
            return Err(ProtocolError::FrameLength {
                expected: KEY_OFFER_PLAINTEXT_LEN,
                actual: data.len(),
            });
        }

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&data[..KEY_SIZE]);
        let mut challenge = [0u8; CHALLENGE_SIZE];
        challenge.copy_from_slice(&data[KEY_SIZE..]);

        Ok(Self { key, challenge })
    }
}

impl fmt::Debug for KeyOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyOffer")
            .field("key", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Steady-state request plaintext
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub opcode: RequestOpcode,
    pub timestamp: Timestamp,
}

impl Request {
    pub fn new(opcode: RequestOpcode) -> Self {
        Self {
            opcode,
            timestamp: Timestamp::now(),
        }
    }

    pub fn encode(&self) -> ProtocolResult<Bytes> {
        if !self.opcode.is_wire() {
            return Err(ProtocolError::LocalOpcode(self.opcode));
        }

        let mut buf = BytesMut::with_capacity(REQUEST_PLAINTEXT_LEN);
        buf.put_u8(self.opcode as u8);
        buf.put_u64(self.timestamp.as_micros());
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> ProtocolResult<Self> {
        if data.len() != REQUEST_PLAINTEXT_LEN {
            return Err(ProtocolError::FrameLength {
                expected: REQUEST_PLAINTEXT_LEN,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let opcode = RequestOpcode::try_from(buf.get_u8())?;
        let timestamp = Timestamp(buf.get_u64());
        Ok(Self { opcode, timestamp })
    }
}

/// Payload appended to a full-length response
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponsePayload {
    None,
    Temperature(f32),
    LedState(bool),
}

impl ResponsePayload {
    pub fn len(&self) -> usize {
        match self {
            ResponsePayload::None => 0,
            ResponsePayload::Temperature(_) => TEMPERATURE_SIZE,
            ResponsePayload::LedState(_) => LED_STATE_SIZE,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ResponsePayload::None)
    }
}

/// Steady-state response plaintext
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Response {
    pub status: ResponseStatus,
    /// Echo of the request timestamp
    pub timestamp: Timestamp,
    pub payload: ResponsePayload,
}

impl Response {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_LEN + self.payload.len());
        buf.put_i8(self.status.into());
        buf.put_u64(self.timestamp.as_micros());
        match self.payload {
            ResponsePayload::None => {}
            ResponsePayload::Temperature(celsius) => buf.put_f32_le(celsius),
            ResponsePayload::LedState(on) => buf.put_u8(on as u8),
        }
        buf.freeze()
    }

    /// Decode the plaintext of a response to `opcode`
    ///
    /// Two shapes are legal: header only, or header plus the opcode's
    /// payload. A header-only `Ok` is rejected when the opcode carries a
    /// payload.
    pub fn decode(data: &[u8], opcode: RequestOpcode) -> ProtocolResult<Self> {
        let payload_len = opcode.payload_len();
        let with_payload = data.len() == RESPONSE_HEADER_LEN + payload_len;
        if data.len() != RESPONSE_HEADER_LEN && !with_payload {
            return Err(ProtocolError::FrameLength {
                expected: RESPONSE_HEADER_LEN + payload_len,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let status = ResponseStatus::try_from(buf.get_i8())?;
        let timestamp = Timestamp(buf.get_u64());

        let payload = match opcode {
            _ if payload_len == 0 || !with_payload => ResponsePayload::None,
            RequestOpcode::GetTemperature => ResponsePayload::Temperature(buf.get_f32_le()),
            RequestOpcode::ToggleLed => ResponsePayload::LedState(buf.get_u8() != 0),
            RequestOpcode::Close | RequestOpcode::Timeout => ResponsePayload::None,
        };

        if payload_len > 0 && payload.is_empty() && status == ResponseStatus::Ok {
            return Err(ProtocolError::MissingPayload { opcode, status });
        }

        Ok(Self {
            status,
            timestamp,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CLOCK_SYNC_FRAME_LEN, KEY_OFFER_FRAME_LEN, REQUEST_FRAME_LEN, RESPONSE_BASE_FRAME_LEN,
        SESSION_GRANT_FRAME_LEN,
    };

    #[test]
    fn test_wire_sizes() {
        assert_eq!(KEY_OFFER_FRAME_LEN, 68);
        assert_eq!(SESSION_GRANT_FRAME_LEN, 36);
        assert_eq!(CLOCK_SYNC_FRAME_LEN, 36);
        assert_eq!(REQUEST_FRAME_LEN, 37);
        assert_eq!(RESPONSE_BASE_FRAME_LEN, 37);
        assert_eq!(RequestOpcode::Close.response_frame_len(), 37);
        assert_eq!(RequestOpcode::ToggleLed.response_frame_len(), 38);
        assert_eq!(RequestOpcode::GetTemperature.response_frame_len(), 41);
    }

    #[test]
    fn test_opcode_wire_values() {
        assert_eq!(RequestOpcode::try_from(0), Ok(RequestOpcode::Close));
        assert_eq!(RequestOpcode::try_from(1), Ok(RequestOpcode::GetTemperature));
        assert_eq!(RequestOpcode::try_from(2), Ok(RequestOpcode::ToggleLed));
        assert_eq!(
            RequestOpcode::try_from(3),
            Err(ProtocolError::LocalOpcode(RequestOpcode::Timeout))
        );
        assert_eq!(
            RequestOpcode::try_from(0x7f),
            Err(ProtocolError::UnknownOpcode(0x7f))
        );
    }

    #[test]
    fn test_status_is_signed_byte() {
        assert_eq!(i8::from(ResponseStatus::Expired), -1);
        assert_eq!(ResponseStatus::try_from(-1), Ok(ResponseStatus::Expired));
        assert_eq!(ResponseStatus::try_from(0), Ok(ResponseStatus::Error));
        assert_eq!(ResponseStatus::try_from(1), Ok(ResponseStatus::Ok));
        assert_eq!(
            ResponseStatus::try_from(2),
            Err(ProtocolError::UnknownStatus(2))
        );
    }

    #[test]
    fn test_request_layout() {
        let request = Request {
            opcode: RequestOpcode::ToggleLed,
            timestamp: Timestamp(0x0102_0304_0506_0708),
        };
        let encoded = request.encode().unwrap();
        assert_eq!(&encoded[..], &[0x02, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(Request::decode(&encoded), Ok(request));
    }

    #[test]
    fn test_timeout_opcode_never_encodes() {
        let request = Request::new(RequestOpcode::Timeout);
        assert_eq!(
            request.encode(),
            Err(ProtocolError::LocalOpcode(RequestOpcode::Timeout))
        );
    }

    #[test]
    fn test_temperature_response_layout() {
        let response = Response {
            status: ResponseStatus::Ok,
            timestamp: Timestamp(42),
            payload: ResponsePayload::Temperature(23.5),
        };
        let encoded = response.encode();

        assert_eq!(encoded.len(), 13);
        assert_eq!(encoded[0], 0x01);
        assert_eq!(&encoded[1..9], &42u64.to_be_bytes());
        assert_eq!(&encoded[9..], &23.5f32.to_le_bytes());

        let decoded = Response::decode(&encoded, RequestOpcode::GetTemperature).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_short_response_carries_no_payload() {
        let expired = Response {
            status: ResponseStatus::Expired,
            timestamp: Timestamp(7),
            payload: ResponsePayload::None,
        };
        let encoded = expired.encode();
        assert_eq!(encoded[0], 0xff);

        let decoded = Response::decode(&encoded, RequestOpcode::ToggleLed).unwrap();
        assert_eq!(decoded.status, ResponseStatus::Expired);
        assert_eq!(decoded.payload, ResponsePayload::None);
    }

    #[test]
    fn test_short_ok_response_is_rejected_when_payload_expected() {
        let encoded = Response {
            status: ResponseStatus::Ok,
            timestamp: Timestamp(7),
            payload: ResponsePayload::None,
        }
        .encode();

        assert_eq!(
            Response::decode(&encoded, RequestOpcode::GetTemperature),
            Err(ProtocolError::MissingPayload {
                opcode: RequestOpcode::GetTemperature,
                status: ResponseStatus::Ok,
            })
        );
        // Close never carries a payload, so the short form is its Ok shape
        assert!(Response::decode(&encoded, RequestOpcode::Close).is_ok());
    }

    #[test]
    fn test_response_rejects_unexpected_length() {
        assert_eq!(
            Response::decode(&[1, 0, 0], RequestOpcode::ToggleLed),
            Err(ProtocolError::FrameLength {
                expected: 10,
                actual: 3
            })
        );
    }

    #[test]
    fn test_sealed_frame_split() {
        let mut wire = vec![0xAA; NONCE_SIZE];
        wire.extend_from_slice(&[0x55; 8 + TAG_SIZE]);

        let frame = SealedFrame::from_bytes(&wire, 8).unwrap();
        assert_eq!(frame.nonce, [0xAA; NONCE_SIZE]);
        assert_eq!(frame.plaintext_len(), 8);
        assert_eq!(&frame.to_bytes()[..], &wire[..]);

        assert_eq!(
            SealedFrame::from_bytes(&wire[..30], 8),
            Err(ProtocolError::FrameLength {
                expected: 36,
                actual: 30
            })
        );
    }

    #[test]
    fn test_key_offer_layout() {
        let offer = KeyOffer {
            key: Zeroizing::new([0x11; KEY_SIZE]),
            challenge: [0x22; CHALLENGE_SIZE],
        };
        let encoded = offer.encode();
        assert_eq!(encoded.len(), KEY_OFFER_PLAINTEXT_LEN);
        assert_eq!(&encoded[..KEY_SIZE], &[0x11; KEY_SIZE]);

        let decoded = KeyOffer::decode(&encoded).unwrap();
        assert_eq!(*decoded.key, [0x11; KEY_SIZE]);
        assert_eq!(decoded.challenge, [0x22; CHALLENGE_SIZE]);
        assert!(!format!("{:?}", decoded).contains("17"));
    }
}

//! CBOR-encoded protocol messages.
//!
//! Frame headers are raw binary, payloads are CBOR. The `Payload` enum covers
//! the whole signaling vocabulary: session management (hello, ping),
//! matchmaking (find, matched, queue status), negotiation (offer, answer,
//! candidate) and chat.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness). Encoding then decoding with the same opcode yields an
//! equal value.

pub mod chat;
pub mod matchmaking;
pub mod negotiation;
pub mod session;

use bytes::BufMut;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads
///
/// The payload type is determined by the `Opcode` in the frame header, so
/// only the inner struct is serialized (no variant tag in CBOR). Unit
/// variants have zero-byte payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Session
    /// Identity announcement
    Hello(session::Hello),
    /// First connection accepted
    Welcome,
    /// Known identity restored
    Reconnected,
    /// Keepalive request
    Ping,
    /// Keepalive response
    Pong,
    /// Informational server error
    Error(ErrorPayload),

    // Matchmaking
    /// Enter the queue
    Find,
    /// Leave the current match
    Next,
    /// Leave queue and match
    Stop,
    /// Queue entered, no partner yet
    Waiting,
    /// Queue position update
    QueueStatus(matchmaking::QueueStatus),
    /// Pairing formed
    Matched(matchmaking::Matched),
    /// Partner gone
    PartnerLeft,
    /// Server-forced reset
    Reset,

    // Negotiation
    /// Caller's offer
    Offer(negotiation::SessionDescription),
    /// Callee's answer
    Answer(negotiation::SessionDescription),
    /// Network candidate
    Candidate(negotiation::IceCandidate),

    // Chat
    /// Outbound chat message
    ChatSend(chat::ChatPayload),
    /// Inbound chat message
    ChatReceive(chat::ChatPayload),
}

/// Error payload for error frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorPayload {
    /// Frame was rejected by the service.
    pub const FRAME_REJECTED: u16 = 0x0001;
    /// Operation not valid in the client's current queue/match state.
    pub const INVALID_STATE: u16 = 0x0002;
    /// Relay target is gone.
    pub const NO_PARTNER: u16 = 0x0003;
    /// Hello was missing or malformed.
    pub const HANDSHAKE_REQUIRED: u16 = 0x0004;

    /// Create a frame rejection error.
    pub fn frame_rejected(reason: impl Into<String>) -> Self {
        Self { code: Self::FRAME_REJECTED, message: reason.into() }
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self { code: Self::INVALID_STATE, message: msg.into() }
    }

    /// Create a missing partner error.
    pub fn no_partner() -> Self {
        Self { code: Self::NO_PARTNER, message: "no partner to relay to".to_string() }
    }

    /// Create a handshake-required error.
    pub fn handshake_required() -> Self {
        Self { code: Self::HANDSHAKE_REQUIRED, message: "hello required".to_string() }
    }
}

fn cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Hello(_) => Opcode::Hello,
            Self::Welcome => Opcode::Welcome,
            Self::Reconnected => Opcode::Reconnected,
            Self::Ping => Opcode::Ping,
            Self::Pong => Opcode::Pong,
            Self::Error(_) => Opcode::Error,
            Self::Find => Opcode::Find,
            Self::Next => Opcode::Next,
            Self::Stop => Opcode::Stop,
            Self::Waiting => Opcode::Waiting,
            Self::QueueStatus(_) => Opcode::QueueStatus,
            Self::Matched(_) => Opcode::Matched,
            Self::PartnerLeft => Opcode::PartnerLeft,
            Self::Reset => Opcode::Reset,
            Self::Offer(_) => Opcode::Offer,
            Self::Answer(_) => Opcode::Answer,
            Self::Candidate(_) => Opcode::Candidate,
            Self::ChatSend(_) => Opcode::ChatSend,
            Self::ChatReceive(_) => Opcode::ChatReceive,
        }
    }

    /// Encode payload to buffer
    ///
    /// Serializes only the inner struct, NOT the variant tag.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::Hello(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Error(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::QueueStatus(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Matched(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Offer(inner) | Self::Answer(inner) => {
                ciborium::ser::into_writer(inner, &mut writer)
            },
            Self::Candidate(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::ChatSend(inner) | Self::ChatReceive(inner) => {
                ciborium::ser::into_writer(inner, &mut writer)
            },
            // Zero-byte payloads
            Self::Welcome
            | Self::Reconnected
            | Self::Ping
            | Self::Pong
            | Self::Find
            | Self::Next
            | Self::Stop
            | Self::Waiting
            | Self::PartnerLeft
            | Self::Reset => Ok(()),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode payload from bytes based on opcode
    ///
    /// Bytes following a zero-byte payload opcode are ignored.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed `MAX_PAYLOAD_SIZE`
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::Hello => Self::Hello(cbor(bytes)?),
            Opcode::Welcome => Self::Welcome,
            Opcode::Reconnected => Self::Reconnected,
            Opcode::Ping => Self::Ping,
            Opcode::Pong => Self::Pong,
            Opcode::Error => Self::Error(cbor(bytes)?),
            Opcode::Find => Self::Find,
            Opcode::Next => Self::Next,
            Opcode::Stop => Self::Stop,
            Opcode::Waiting => Self::Waiting,
            Opcode::QueueStatus => Self::QueueStatus(cbor(bytes)?),
            Opcode::Matched => Self::Matched(cbor(bytes)?),
            Opcode::PartnerLeft => Self::PartnerLeft,
            Opcode::Reset => Self::Reset,
            Opcode::Offer => Self::Offer(cbor(bytes)?),
            Opcode::Answer => Self::Answer(cbor(bytes)?),
            Opcode::Candidate => Self::Candidate(cbor(bytes)?),
            Opcode::ChatSend => Self::ChatSend(cbor(bytes)?),
            Opcode::ChatReceive => Self::ChatReceive(cbor(bytes)?),
        };

        Ok(payload)
    }

    /// Convert payload into a transport frame
    ///
    /// Encodes to CBOR, sets the opcode and creates a frame with the
    /// matching payload size.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(Frame::new(FrameHeader::new(self.opcode()), buf))
    }

    /// Parse payload from a raw transport frame
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the header opcode is unrecognized
    /// - `ProtocolError::CborDecode` if the payload does not match the opcode
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}

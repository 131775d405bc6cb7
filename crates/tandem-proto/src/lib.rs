//! Wire format for the Tandem signaling protocol.
//!
//! Every message between a client and the matchmaking service is a
//! [`Frame`]: a fixed 12-byte binary [`FrameHeader`] followed by a
//! CBOR-encoded payload. The header carries the [`Opcode`] so a receiver
//! knows which [`Payload`] variant to decode without a variant tag.
//!
//! # Layers
//!
//! - [`header`]: zero-copy header parsing and validation
//! - [`frame`]: header + raw payload bytes, encode/decode
//! - [`payloads`]: typed CBOR payloads and the [`Payload`] enum
//! - [`opcode`]: opcode registry

pub mod errors;
pub mod frame;
pub mod header;
pub mod opcode;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
pub use payloads::{
    ErrorPayload, Payload,
    chat::ChatPayload,
    matchmaking::{Matched, QueueStatus, Role},
    negotiation::{IceCandidate, SdpKind, SessionDescription},
    session::Hello,
};

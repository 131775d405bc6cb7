//! One peer-to-peer media transport per match.
//!
//! - [`transport`]: the seam to a concrete peer connection implementation
//!   plus the callback events it produces
//! - [`session`]: offer/answer/candidate negotiation for one match

pub mod session;
pub mod transport;

pub use session::{CandidateOutcome, NegotiationState, PeerSession};
pub use transport::{
    PeerConnectionState, PeerConnector, PeerEvent, PeerEventKind, PeerObserver, PeerTransport,
    RemoteTrack, SessionId,
};

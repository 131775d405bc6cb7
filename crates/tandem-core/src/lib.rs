//! Sans-IO building blocks for the Tandem client.
//!
//! Everything here is driven by an owner that supplies time and executes
//! I/O: the orchestrator in `tandem-client` in production, the simulation
//! harness in tests.
//!
//! # Components
//!
//! - [`identity`]: persisted anonymous client identifier
//! - [`media`]: local stream acquisition and mute control
//! - [`signaling`]: signaling link handshake, heartbeat and reconnect policy
//! - [`peer`]: per-match peer transport negotiation
//! - [`chat`]: text side-channel scoped to one match
//! - [`env`]: time and randomness abstraction

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod chat;
pub mod env;
pub mod error;
pub mod identity;
pub mod media;
pub mod peer;
pub mod signaling;

pub use chat::{ChatMessage, ChatRelay, Origin};
pub use env::Environment;
pub use error::{
    ChatError, IdentityError, MediaError, NegotiationError, SignalingError, TransportError,
};
pub use identity::{ClientIdentity, FileIdentityStore, IdentityStore, MemoryIdentityStore};
pub use media::{
    LocalMediaState, LocalStream, LocalTrack, MediaGateway, MediaSource, SyntheticMediaSource,
    TrackKind,
};
pub use peer::{
    CandidateOutcome, NegotiationState, PeerConnectionState, PeerConnector, PeerEvent,
    PeerEventKind, PeerObserver, PeerSession, PeerTransport, RemoteTrack, SessionId,
};
pub use signaling::{
    InboundEvent, LinkStatus, OutboundEvent, ReconnectBackoff, SignalingAction, SignalingConfig,
    SignalingConnection, SignalingState,
};

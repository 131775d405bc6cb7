//! Peer transport seam.
//!
//! A [`PeerTransport`] wraps one peer connection. Its callbacks (remote
//! media, local candidates, connectivity) are not closures into the
//! orchestrator: the transport pushes [`PeerEvent`]s tagged with the owning
//! [`SessionId`] into a channel. Clearing the observer detaches the
//! transport, and any event from a superseded session is dropped by id.

use std::fmt;

use async_trait::async_trait;
use tandem_proto::{IceCandidate, SessionDescription};
use tokio::sync::mpsc;

use crate::{
    error::TransportError,
    media::{LocalStream, TrackKind},
};

/// Identity of one match. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The id after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Coarse transport connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerConnectionState {
    /// Created, nothing negotiated
    #[default]
    New,
    /// Checking candidate pairs
    Connecting,
    /// Media can flow
    Connected,
    /// Temporarily lost connectivity, may recover
    Disconnected,
    /// Gave up
    Failed,
    /// Closed locally
    Closed,
}

/// Inbound media track exposed for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// Remote stream the track belongs to
    pub stream_id: String,
    /// Track identifier
    pub track_id: String,
    /// Audio or video
    pub kind: TrackKind,
}

/// What the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEventKind {
    /// Inbound media became available
    RemoteTrack(RemoteTrack),
    /// A local candidate was gathered (forward it immediately)
    LocalCandidate(IceCandidate),
    /// Connectivity changed
    ConnectionState(PeerConnectionState),
}

/// Transport callback tagged with its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    /// Session whose transport produced the event
    pub session: SessionId,
    /// What happened
    pub kind: PeerEventKind,
}

/// Sink a transport reports into.
#[derive(Debug, Clone)]
pub struct PeerObserver {
    session: SessionId,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerObserver {
    /// Observer tagging events with `session`.
    #[must_use]
    pub fn new(session: SessionId, events: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self { session, events }
    }

    /// Session this observer reports for.
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Report an event. Returns false once the receiver is gone.
    pub fn notify(&self, kind: PeerEventKind) -> bool {
        self.events.send(PeerEvent { session: self.session, kind }).is_ok()
    }
}

/// One peer connection.
///
/// Methods take `&self` because callbacks run concurrently with the owner.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// Send the stream's tracks to the peer.
    async fn attach_local_stream(&self, stream: &LocalStream) -> Result<(), TransportError>;

    /// Produce an offer (not yet committed).
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Produce an answer to the committed remote offer (not yet committed).
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    /// Commit the local description.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    /// Commit the remote description.
    async fn set_remote_description(&self, desc: SessionDescription)
    -> Result<(), TransportError>;

    /// Apply a remote candidate.
    ///
    /// Fails with [`TransportError::NoRemoteDescription`] if no remote
    /// description is committed yet.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Install or clear the event sink. After `None`, no further events may
    /// be reported.
    fn set_observer(&self, observer: Option<PeerObserver>);

    /// Release the connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Factory producing a fresh transport for each match.
#[async_trait]
pub trait PeerConnector: Send + Sync + 'static {
    /// Transport type produced.
    type Transport: PeerTransport;

    /// Create a new, unconnected transport.
    async fn connect(&self) -> Result<Self::Transport, TransportError>;
}

//! Negotiation for one match.
//!
//! # State Machine
//!
//! ```text
//!            create_offer      accept_answer
//!  ┌─────┐ ───────────────> ┌────────────────┐ ──────────────┐
//!  │ New │   (caller)       │ LocalOfferSent │               │
//!  └─────┘                  └────────────────┘               ↓
//!     │                                              ┌─────────────┐ connected ┌───────────┐
//!     │ open (callee)                                │ Negotiating │──────────>│ Connected │
//!     ↓                     accept_offer             └─────────────┘           └───────────┘
//!  ┌─────────────────────┐ ──────────────────────────────────↑
//!  │ AwaitingRemoteOffer │
//!  └─────────────────────┘        close() from any state ──> Closed
//! ```
//!
//! Remote candidates that arrive before the remote description is committed
//! are buffered in arrival order and flushed right after the commit. Close
//! drops the buffer.

use std::collections::VecDeque;

use tandem_proto::{IceCandidate, Role, SdpKind, SessionDescription};
use tokio::sync::mpsc;

use super::transport::{
    PeerConnectionState, PeerConnector, PeerEvent, PeerObserver, PeerTransport, RemoteTrack,
    SessionId,
};
use crate::{
    error::{NegotiationError, TransportError},
    media::LocalStream,
};

/// Negotiation progress of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Opened as caller, offer not yet created
    New,
    /// Caller committed and sent its offer
    LocalOfferSent,
    /// Callee waiting for the caller's offer
    AwaitingRemoteOffer,
    /// Both descriptions committed, waiting for connectivity
    Negotiating,
    /// Transport reported connected
    Connected,
    /// Closed, transport released
    Closed,
}

/// What happened to a remote candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Handed to the transport
    Applied,
    /// Held until the remote description is committed
    Buffered,
    /// Dropped (session closed, or the transport refused it)
    Discarded,
}

/// One peer transport bound to one match.
///
/// Never reused: a new match gets a new `PeerSession`.
pub struct PeerSession<T> {
    id: SessionId,
    role: Role,
    state: NegotiationState,
    transport: T,
    remote_committed: bool,
    pending_candidates: VecDeque<IceCandidate>,
    remote_tracks: Vec<RemoteTrack>,
    connection: PeerConnectionState,
}

impl<T: PeerTransport> PeerSession<T> {
    /// Create a transport, register the observer and attach local media.
    ///
    /// The observer is installed before the tracks are attached so no
    /// callback is missed.
    ///
    /// # Errors
    ///
    /// - `NegotiationError::Transport` if the transport cannot be created
    /// - `NegotiationError::MediaRejected` if it refuses the local stream.
    ///   The transport is closed before returning.
    pub async fn open<C>(
        connector: &C,
        id: SessionId,
        role: Role,
        stream: &LocalStream,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self, NegotiationError>
    where
        C: PeerConnector<Transport = T> + ?Sized,
    {
        let transport = connector.connect().await?;
        transport.set_observer(Some(PeerObserver::new(id, events)));

        if let Err(e) = transport.attach_local_stream(stream).await {
            transport.set_observer(None);
            if let Err(close_err) = transport.close().await {
                tracing::debug!(session = %id, error = %close_err, "close after failed attach");
            }
            return Err(NegotiationError::MediaRejected(e));
        }

        let state = match role {
            Role::Caller => NegotiationState::New,
            Role::Callee => NegotiationState::AwaitingRemoteOffer,
        };

        tracing::debug!(session = %id, %role, "peer session opened");

        Ok(Self {
            id,
            role,
            state,
            transport,
            remote_committed: false,
            pending_candidates: VecDeque::new(),
            remote_tracks: Vec::new(),
            connection: PeerConnectionState::New,
        })
    }

    /// Session identity.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Role this session was opened with.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Negotiation progress.
    #[must_use]
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Last connectivity reported by the transport.
    #[must_use]
    pub fn connection_state(&self) -> PeerConnectionState {
        self.connection
    }

    /// Inbound tracks available for presentation.
    #[must_use]
    pub fn remote_tracks(&self) -> &[RemoteTrack] {
        &self.remote_tracks
    }

    /// Candidates waiting for the remote description.
    #[must_use]
    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Create and commit the offer (caller only, once).
    ///
    /// # Errors
    ///
    /// - `NegotiationError::RoleViolation` for a callee
    /// - `NegotiationError::InvalidState` if an offer was already created
    /// - `NegotiationError::Transport` if the transport fails
    pub async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        self.require_role(Role::Caller, "create_offer")?;
        self.require_state(NegotiationState::New, "create_offer")?;

        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(offer.clone()).await?;
        self.state = NegotiationState::LocalOfferSent;

        tracing::debug!(session = %self.id, "local offer committed");
        Ok(offer)
    }

    /// Commit the caller's offer and produce the answer (callee only).
    ///
    /// # Errors
    ///
    /// - `NegotiationError::RoleViolation` for a caller (ignore it)
    /// - `NegotiationError::InvalidState` if an offer was already accepted
    /// - `NegotiationError::Transport` for a malformed description
    pub async fn accept_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.require_role(Role::Callee, "accept_offer")?;
        self.require_state(NegotiationState::AwaitingRemoteOffer, "accept_offer")?;
        require_kind(&offer, SdpKind::Offer)?;

        self.commit_remote(offer).await?;

        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;
        self.state = NegotiationState::Negotiating;

        tracing::debug!(session = %self.id, "answer committed");
        Ok(answer)
    }

    /// Commit the callee's answer (caller only).
    ///
    /// # Errors
    ///
    /// - `NegotiationError::RoleViolation` for a callee
    /// - `NegotiationError::InvalidState` without a prior offer
    /// - `NegotiationError::Transport` for a malformed description
    pub async fn accept_answer(&mut self, answer: SessionDescription) -> Result<(), NegotiationError> {
        self.require_role(Role::Caller, "accept_answer")?;
        self.require_state(NegotiationState::LocalOfferSent, "accept_answer")?;
        require_kind(&answer, SdpKind::Answer)?;

        self.commit_remote(answer).await?;
        self.state = NegotiationState::Negotiating;

        tracing::debug!(session = %self.id, "remote answer committed");
        Ok(())
    }

    /// Apply or buffer a remote candidate. Never fails.
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> CandidateOutcome {
        if self.state == NegotiationState::Closed {
            return CandidateOutcome::Discarded;
        }

        if !self.remote_committed {
            self.pending_candidates.push_back(candidate);
            return CandidateOutcome::Buffered;
        }

        self.apply_candidate(candidate).await
    }

    /// Record a connectivity change from the transport.
    pub fn on_connection_state(&mut self, state: PeerConnectionState) {
        if self.state == NegotiationState::Closed {
            return;
        }

        self.connection = state;
        if state == PeerConnectionState::Connected && self.state == NegotiationState::Negotiating {
            self.state = NegotiationState::Connected;
            tracing::debug!(session = %self.id, "peer connected");
        }
    }

    /// Record an inbound track.
    pub fn on_remote_track(&mut self, track: RemoteTrack) {
        if self.state != NegotiationState::Closed {
            self.remote_tracks.push(track);
        }
    }

    /// Detach the observer, then release the transport and remote media.
    ///
    /// Idempotent. The local stream is left alone.
    pub async fn close(&mut self) {
        if self.state == NegotiationState::Closed {
            return;
        }

        self.transport.set_observer(None);
        if let Err(e) = self.transport.close().await {
            tracing::debug!(session = %self.id, error = %e, "transport close failed");
        }

        self.remote_tracks.clear();
        self.pending_candidates.clear();
        self.state = NegotiationState::Closed;
        self.connection = PeerConnectionState::Closed;

        tracing::debug!(session = %self.id, "peer session closed");
    }

    async fn commit_remote(&mut self, desc: SessionDescription) -> Result<(), NegotiationError> {
        self.transport.set_remote_description(desc).await?;
        self.remote_committed = true;

        while let Some(candidate) = self.pending_candidates.pop_front() {
            self.apply_candidate(candidate).await;
        }
        Ok(())
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) -> CandidateOutcome {
        match self.transport.add_ice_candidate(candidate).await {
            Ok(()) => CandidateOutcome::Applied,
            Err(e) => {
                // Tolerated: a bad or late candidate is not evidence either way.
                tracing::debug!(
                    session = %self.id,
                    error = %e,
                    out_of_order = e.is_out_of_order(),
                    "remote candidate discarded"
                );
                CandidateOutcome::Discarded
            },
        }
    }

    fn require_role(&self, role: Role, operation: &'static str) -> Result<(), NegotiationError> {
        if self.role == role {
            Ok(())
        } else {
            Err(NegotiationError::RoleViolation { role: self.role, operation })
        }
    }

    fn require_state(
        &self,
        state: NegotiationState,
        operation: &'static str,
    ) -> Result<(), NegotiationError> {
        if self.state == state {
            Ok(())
        } else {
            Err(NegotiationError::InvalidState { state: self.state, operation })
        }
    }
}

fn require_kind(desc: &SessionDescription, kind: SdpKind) -> Result<(), NegotiationError> {
    if desc.kind == kind {
        Ok(())
    } else {
        Err(TransportError::InvalidDescription(format!("expected {kind:?}, got {:?}", desc.kind))
            .into())
    }
}

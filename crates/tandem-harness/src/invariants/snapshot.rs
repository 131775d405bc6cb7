//! Observable state snapshots for invariant checking.
//!
//! Snapshots copy what the matchmaker exposes at one instant, so a check
//! never races a later step.

use tandem_client::{MatchState, Matchmaker};
use tandem_core::{Environment, MediaSource, NegotiationState, PeerConnectionState};
use tandem_proto::{QueueStatus, Role};

use crate::mock_peer::MockConnector;

/// Snapshot of every simulated client.
#[derive(Debug, Clone, Default)]
pub struct MatchSnapshot {
    /// Per-client state snapshots.
    pub clients: Vec<ClientSnapshot>,
}

impl MatchSnapshot {
    /// Create an empty snapshot (no clients).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot with a single client.
    pub fn single(client: ClientSnapshot) -> Self {
        Self { clients: vec![client] }
    }

    /// Create a snapshot from multiple clients.
    pub fn from_clients(clients: Vec<ClientSnapshot>) -> Self {
        Self { clients }
    }
}

/// Snapshot of one matchmaker and its transports.
#[derive(Debug, Clone, Default)]
pub struct ClientSnapshot {
    /// Index of the client in its simulation.
    pub id: usize,
    /// Matchmaking state.
    pub state: MatchState,
    /// Whether a session exists, opened or still opening.
    pub has_session: bool,
    /// Role in the session.
    pub role: Option<Role>,
    /// Last queue status kept.
    pub queue: Option<QueueStatus>,
    /// Chat messages in the log.
    pub chat_len: usize,
    /// Transport connectivity last reported for the session.
    pub connection: Option<PeerConnectionState>,
    /// Negotiation progress of the installed peer session.
    pub negotiation: Option<NegotiationState>,
    /// Transports created by the connector and not yet closed.
    pub live_transports: usize,
    /// Most transports ever alive at once.
    pub peak_transports: usize,
}

impl ClientSnapshot {
    /// Idle client with nothing in flight.
    pub fn new(id: usize) -> Self {
        Self { id, ..Default::default() }
    }

    /// Capture a matchmaker driven by a [`MockConnector`].
    pub fn capture<S, E>(
        id: usize,
        matchmaker: &Matchmaker<MockConnector, S, E>,
        connector: &MockConnector,
    ) -> Self
    where
        S: MediaSource,
        E: Environment,
    {
        Self {
            id,
            state: matchmaker.state(),
            has_session: matchmaker.has_session(),
            role: matchmaker.role(),
            queue: matchmaker.queue_status(),
            chat_len: matchmaker.chat().len(),
            connection: matchmaker.connection_state(),
            negotiation: matchmaker.negotiation_state(),
            live_transports: connector.stats().live(),
            peak_transports: connector.stats().max_live(),
        }
    }
}

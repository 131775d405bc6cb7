//! Observable matchmaking state.

use std::fmt;

use tandem_core::{
    ChatMessage, LinkStatus, LocalMediaState, NegotiationState, PeerConnectionState, SessionId,
};
use tandem_proto::{QueueStatus, Role};

/// Where the client is in the matchmaking flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchState {
    /// Not queued, no session
    #[default]
    Idle,
    /// In the queue, no session
    Searching,
    /// Paired, session negotiating
    Matched,
    /// Transport reported connected
    InCall,
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Matched => "matched",
            Self::InCall => "in-call",
        };
        f.write_str(name)
    }
}

/// Snapshot published to observers after every step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchView {
    /// Matchmaking state
    pub state: MatchState,
    /// Queue position, only while searching
    pub queue: Option<QueueStatus>,
    /// Role in the current session
    pub role: Option<Role>,
    /// Current session id
    pub session: Option<SessionId>,
    /// Transport connectivity of the current session
    pub connection: Option<PeerConnectionState>,
    /// Negotiation progress of the current session
    pub negotiation: Option<NegotiationState>,
    /// Signaling link
    pub link: LinkStatus,
    /// Mute preference
    pub media: LocalMediaState,
    /// Chat log of the current match
    pub chat: Vec<ChatMessage>,
    /// Inbound tracks available for presentation
    pub remote_tracks: usize,
    /// Last user-visible status message
    pub status: Option<String>,
}

impl MatchView {
    /// Whether a session (shell or negotiated) exists.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }
}

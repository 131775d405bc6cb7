//! Standard invariant checks.
//!
//! Each one is a property of a single client that no sequence of intents,
//! service events or transport callbacks may break.

use tandem_client::MatchState;
use tandem_core::NegotiationState;

use super::{ClientSnapshot, Invariant, InvariantResult, MatchSnapshot, Violation};

/// Run `holds` for every client, reporting the first that fails.
fn each_client(
    name: &'static str,
    state: &MatchSnapshot,
    holds: impl Fn(&ClientSnapshot) -> Option<String>,
) -> InvariantResult {
    for client in &state.clients {
        if let Some(message) = holds(client) {
            return Err(Violation { invariant: name, message: format!("client {}: {message}", client.id) });
        }
    }
    Ok(())
}

/// At most one peer transport is alive per client, now or at any earlier
/// point.
///
/// Every path out of a match closes its transport, or joins and closes an
/// open still in flight, before the next one is created.
pub struct SingleLiveTransport;

impl Invariant for SingleLiveTransport {
    fn name(&self) -> &'static str {
        "single_live_transport"
    }

    fn check(&self, state: &MatchSnapshot) -> InvariantResult {
        each_client(self.name(), state, |c| {
            if c.live_transports > 1 {
                Some(format!("{} live transports", c.live_transports))
            } else {
                (c.peak_transports > 1)
                    .then(|| format!("{} transports were alive at once", c.peak_transports))
            }
        })
    }
}

/// A session exists exactly while Matched or InCall.
pub struct SessionMatchesState;

impl Invariant for SessionMatchesState {
    fn name(&self) -> &'static str {
        "session_matches_state"
    }

    fn check(&self, state: &MatchSnapshot) -> InvariantResult {
        each_client(self.name(), state, |c| {
            let expects = matches!(c.state, MatchState::Matched | MatchState::InCall);
            (expects != c.has_session)
                .then(|| format!("state {} with has_session={}", c.state, c.has_session))
        })
    }
}

/// Queue status is only kept while Searching.
pub struct QueueOnlyWhileSearching;

impl Invariant for QueueOnlyWhileSearching {
    fn name(&self) -> &'static str {
        "queue_only_while_searching"
    }

    fn check(&self, state: &MatchSnapshot) -> InvariantResult {
        each_client(self.name(), state, |c| match c.queue {
            Some(queue) if c.state != MatchState::Searching => {
                Some(format!("queue position {} in state {}", queue.position, c.state))
            },
            _ => None,
        })
    }
}

/// The chat log is empty without a session.
pub struct ChatScopedToSession;

impl Invariant for ChatScopedToSession {
    fn name(&self) -> &'static str {
        "chat_scoped_to_session"
    }

    fn check(&self, state: &MatchSnapshot) -> InvariantResult {
        each_client(self.name(), state, |c| {
            (c.chat_len > 0 && !c.has_session)
                .then(|| format!("{} chat messages without a session", c.chat_len))
        })
    }
}

/// A role is known iff a session exists.
pub struct RoleIffSession;

impl Invariant for RoleIffSession {
    fn name(&self) -> &'static str {
        "role_iff_session"
    }

    fn check(&self, state: &MatchSnapshot) -> InvariantResult {
        each_client(self.name(), state, |c| {
            (c.role.is_some() != c.has_session)
                .then(|| format!("role {:?} with has_session={}", c.role, c.has_session))
        })
    }
}

/// InCall is only entered once the transport reported connected.
pub struct InCallImpliesConnected;

impl Invariant for InCallImpliesConnected {
    fn name(&self) -> &'static str {
        "in_call_implies_connected"
    }

    fn check(&self, state: &MatchSnapshot) -> InvariantResult {
        each_client(self.name(), state, |c| {
            (c.state == MatchState::InCall && c.negotiation != Some(NegotiationState::Connected))
                .then(|| format!("in call with negotiation {:?}", c.negotiation))
        })
    }
}

//! Invariant checking for simulated matchmaking runs.
//!
//! Invariants are properties that must hold after every step, whatever
//! sequence of intents and service events led there. Scenario tests pin a
//! few sequences; the property tests throw random ones at the matchmaker
//! and check the registry after each.
//!
//! # Architecture
//!
//! Observable state is pulled out of each [`tandem_client::Matchmaker`]
//! and its [`crate::MockConnector`] into a [`MatchSnapshot`], then every
//! registered [`Invariant`] runs against it.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = MatchSnapshot::single(ClientSnapshot::capture(0, &matchmaker, &connector));
//! registry.check_all(&snapshot)?;
//! ```

mod checks;
mod snapshot;

pub use checks::{
    ChatScopedToSession, InCallImpliesConnected, QueueOnlyWhileSearching, RoleIffSession,
    SessionMatchesState, SingleLiveTransport,
};
pub use snapshot::{ClientSnapshot, MatchSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against a [`MatchSnapshot`].
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the current state.
    fn check(&self, state: &MatchSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
///
/// Use [`InvariantRegistry::standard()`] for the matchmaking invariants.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Create a registry with the matchmaking invariants.
    ///
    /// Includes:
    /// - [`SingleLiveTransport`]: at most one peer transport alive
    /// - [`SessionMatchesState`]: a session exists iff Matched or InCall
    /// - [`QueueOnlyWhileSearching`]: queue status only while Searching
    /// - [`ChatScopedToSession`]: no chat log without a session
    /// - [`RoleIffSession`]: role present iff a session exists
    /// - [`InCallImpliesConnected`]: InCall only after the transport connected
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(SingleLiveTransport);
        registry.add(SessionMatchesState);
        registry.add(QueueOnlyWhileSearching);
        registry.add(ChatScopedToSession);
        registry.add(RoleIffSession);
        registry.add(InCallImpliesConnected);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &MatchSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &MatchSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tandem_client::MatchState;

    use super::*;

    #[test]
    fn standard_registry_has_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(!registry.is_empty());
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn empty_snapshot_passes_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(registry.check_all(&MatchSnapshot::empty()).is_ok());
    }

    #[test]
    fn idle_client_passes_invariants() {
        let registry = InvariantRegistry::standard();
        let snapshot = MatchSnapshot::single(ClientSnapshot::new(0));
        assert!(registry.check_all(&snapshot).is_ok());
    }

    #[test]
    fn all_violations_reported() {
        let registry = InvariantRegistry::standard();
        let mut client = ClientSnapshot::new(0);
        client.state = MatchState::InCall;
        client.live_transports = 2;

        let violations = registry.check_all(&MatchSnapshot::single(client)).unwrap_err();
        let names: Vec<_> = violations.iter().map(|v| v.invariant).collect();
        assert!(names.contains(&"single_live_transport"));
        assert!(names.contains(&"session_matches_state"));
        assert!(names.contains(&"in_call_implies_connected"));
    }
}

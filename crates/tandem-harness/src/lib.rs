//! Deterministic simulation harness for Tandem.
//!
//! In-memory implementations of the environment, peer transport, media
//! source and matchmaking service, so whole matchmaking flows run in a test
//! without network, devices or wall-clock waits.
//!
//! # Layers
//!
//! - [`SimDriver`]: several matchmakers wired to a [`MatchServer`] with no
//!   channels at all, pumped until quiet
//! - [`SimNetwork`]: the same server behind in-memory framed links, for
//!   full [`tandem_client::Runtime`]s with reconnects
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties that must hold after every
//! step. Use [`InvariantRegistry::standard()`] for the matchmaking
//! invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod match_server;
pub mod media;
pub mod mock_peer;
pub mod sim_driver;
pub mod sim_env;
pub mod sim_network;

pub use invariants::{
    ChatScopedToSession, ClientSnapshot, InCallImpliesConnected, Invariant, InvariantRegistry,
    InvariantResult, MatchSnapshot, QueueOnlyWhileSearching, RoleIffSession, SessionMatchesState,
    SingleLiveTransport, Violation,
};
pub use match_server::{ConnId, MatchServer, ServerAction, sent_opcodes};
pub use media::ScriptedMediaSource;
pub use mock_peer::{MockConnector, MockStats, MockTransport};
pub use sim_driver::{SimClient, SimDriver, SimMatchmaker, settle};
pub use sim_env::{SimEnv, SimInstant};
pub use sim_network::{NetStats, SimDialer, SimNetError, SimNetwork};

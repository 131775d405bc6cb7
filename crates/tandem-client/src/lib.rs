//! Tandem client: matchmaking orchestration over a signaling channel.
//!
//! [`Matchmaker`] is the single owner of "where am I in the flow". It
//! consumes inbound signaling events, transport callbacks and user intents,
//! and queues outbound signaling events. [`SignalingChannel`] keeps one
//! framed link to the matchmaking service alive across drops, and
//! [`Runtime`] wires both together in a `tokio::select!` loop.
//!
//! # Features
//!
//! - `transport`: QUIC dialer ([`transport::QuicDialer`])
//! - `webrtc`: peer transport on the `webrtc` crate

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod channel;
pub mod config;
pub mod error;
pub mod matchmaker;
pub mod runtime;
pub mod state;
pub mod system_env;

#[cfg(feature = "transport")]
pub mod transport;

#[cfg(feature = "webrtc")]
pub mod webrtc;

pub use channel::{ChannelEvent, Dialer, FrameLink, SignalingChannel, SignalingHandle};
pub use config::ClientConfig;
pub use error::{ChannelError, RuntimeError};
pub use matchmaker::{Matchmaker, MatchmakerInputs, OpenedSession};
pub use runtime::{Intent, Runtime, RuntimeHandle};
pub use state::{MatchState, MatchView};
pub use system_env::SystemEnv;

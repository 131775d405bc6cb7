//! Signaling link to the matchmaking service.
//!
//! - [`connection`]: sans-IO handshake/heartbeat state machine for one link
//! - [`event`]: typed inbound/outbound vocabulary and link status
//! - [`backoff`]: reconnect delay policy
//!
//! The async task that dials, replays identity and reconnects lives in the
//! client crate and drives these pieces.

pub mod backoff;
pub mod connection;
pub mod event;

pub use backoff::ReconnectBackoff;
pub use connection::{SignalingAction, SignalingConfig, SignalingConnection, SignalingState};
pub use event::{InboundEvent, LinkStatus, OutboundEvent};

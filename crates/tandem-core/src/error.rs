//! Error types for the Tandem client core.
//!
//! One enum per layer. Each component turns its own failures into a status
//! update and a defined state transition. Only [`MediaError`] is meant for
//! the user to act on.

use std::{io, time::Duration};

use tandem_proto::Role;
use thiserror::Error;

use crate::{peer::NegotiationState, signaling::SignalingState};

/// Errors from the signaling connection state machine.
///
/// All of these are absorbed by the signaling channel (log, reconnect) and
/// never abort an in-progress match.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// Invalid state transition attempted
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: SignalingState,
        /// Operation that was attempted
        operation: String,
    },

    /// Received unexpected frame for current state
    #[error("unexpected frame: received opcode {opcode:#06x} in state {state:?}")]
    UnexpectedFrame {
        /// Current state when frame was received
        state: SignalingState,
        /// Opcode of the unexpected frame
        opcode: u16,
    },

    /// Handshake did not complete within timeout
    #[error("handshake timeout after {elapsed:?}")]
    HandshakeTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Link idle timeout exceeded
    #[error("idle timeout after {elapsed:?}")]
    IdleTimeout {
        /// How long the link was idle
        elapsed: Duration,
    },

    /// Protocol error from frame parsing/validation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying transport error
    #[error("transport error: {0}")]
    Transport(String),
}

impl SignalingError {
    /// Returns true if this error is transient and a reconnect may fix it.
    ///
    /// Protocol violations are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. } | Self::IdleTimeout { .. } | Self::Transport(_)
        )
    }
}

impl From<tandem_proto::ProtocolError> for SignalingError {
    fn from(err: tandem_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<io::Error> for SignalingError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Local media could not be acquired.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The user or platform refused camera/microphone access
    #[error("media permission denied")]
    PermissionDenied,

    /// No usable capture device
    #[error("media device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Any other source failure
    #[error("media source failed: {0}")]
    Source(String),
}

/// Failures reported by a peer transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Candidate applied before any remote description was committed
    #[error("remote description not set")]
    NoRemoteDescription,

    /// Session description could not be parsed or applied
    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    /// Operation not valid for the transport's signaling state
    #[error("invalid transport state: {0}")]
    InvalidState(String),

    /// Transport already closed
    #[error("transport closed")]
    Closed,

    /// Backend-specific failure
    #[error("transport backend error: {0}")]
    Backend(String),
}

impl TransportError {
    /// Whether this is the expected "candidate arrived too early" race.
    pub fn is_out_of_order(&self) -> bool {
        matches!(self, Self::NoRemoteDescription)
    }
}

/// Errors from offer/answer negotiation on a peer session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// Operation reserved for the other role
    #[error("{operation} not permitted for {role}")]
    RoleViolation {
        /// Role of the session
        role: Role,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Operation not valid in the session's negotiation state
    #[error("cannot {operation} in state {state:?}")]
    InvalidState {
        /// Current negotiation state
        state: NegotiationState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Local media was not available to attach
    #[error(transparent)]
    Media(#[from] MediaError),

    /// The transport refused the local stream
    #[error("local media rejected: {0}")]
    MediaRejected(TransportError),

    /// The transport rejected the operation
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl NegotiationError {
    /// A role violation is ignored rather than tearing the session down.
    pub fn is_role_violation(&self) -> bool {
        matches!(self, Self::RoleViolation { .. })
    }

    /// The local stream itself was refused and should be reacquired.
    pub fn is_media_rejected(&self) -> bool {
        matches!(self, Self::MediaRejected(_))
    }
}

/// Chat message rejected before sending.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Text was empty or whitespace only
    #[error("message is empty")]
    Empty,

    /// Text exceeds the length limit
    #[error("message too long: {len} characters (max {max})")]
    TooLong {
        /// Characters in the trimmed text
        len: usize,
        /// Maximum allowed characters
        max: usize,
    },

    /// No partner to send to
    #[error("no active match")]
    NoActiveMatch,
}

/// Identity could not be loaded or persisted.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Backing storage failed
    #[error("identity storage error: {0}")]
    Io(#[from] io::Error),

    /// Stored token is not a valid identifier
    #[error("stored identity is corrupt: {0}")]
    Corrupt(String),
}

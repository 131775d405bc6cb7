//! Client error types.

use thiserror::Error;

/// Errors from the signaling channel handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel task has stopped.
    #[error("signaling channel closed")]
    Closed,
}

/// Errors from the runtime and its handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The signaling channel went away.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The runtime loop has exited.
    #[error("runtime stopped")]
    Stopped,
}

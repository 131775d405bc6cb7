//! Console error types.

use tandem_client::RuntimeError;
use thiserror::Error;

/// A line the console could not turn into an intent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Slash command nobody knows
    #[error("unknown command /{0}, try /help")]
    Unknown(String),

    /// `/mute` or `/unmute` without a usable device
    #[error("expected `audio` or `video`, got {0:?}")]
    Device(String),
}

/// Errors that end the console.
#[derive(Debug, Error)]
pub enum CliError {
    /// The runtime stopped with an error
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Reading stdin failed
    #[error("reading input: {0}")]
    Input(#[from] std::io::Error),
}

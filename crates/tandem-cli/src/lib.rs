//! Tandem console client.
//!
//! Reads commands from stdin, drives a [`tandem_client::Runtime`] and logs
//! every visible change through `tracing`.
//!
//! ```text
//!  stdin ──parse──> Intent ──> Runtime ──> MatchView ──summarize──> log
//! ```
//!
//! Without a server address the client talks to an in-process service
//! with one echoing partner, see [`demo`].

pub mod command;
pub mod console;
pub mod demo;
pub mod error;

pub use command::parse;
pub use error::CliError;

//! Chat relay payloads.

use serde::{Deserialize, Serialize};

/// A chat message on the wire, identical in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Sender-assigned unique id
    pub id: String,
    /// Message text
    pub text: String,
    /// Sender wall clock, epoch milliseconds
    pub timestamp: u64,
}

//! Matchmaking queue payloads.

use serde::{Deserialize, Serialize};

/// Which side of a pairing initiates the session-description offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Creates and sends the offer
    Caller,
    /// Waits for the offer and answers it
    Callee,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Caller => f.write_str("caller"),
            Self::Callee => f.write_str("callee"),
        }
    }
}

/// Periodic queue update while searching.
///
/// Replaced wholesale on every update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    /// 1-based position in the queue
    pub position: u32,
    /// Estimated seconds until a match
    pub eta_seconds: u32,
    /// Seconds already spent waiting
    pub waited_seconds: u32,
}

/// Pairing formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matched {
    /// Role assigned to the receiving client
    pub role: Role,
}

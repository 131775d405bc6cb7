//! Session management payloads.

use serde::{Deserialize, Serialize};

/// Client handshake, sent first on every (re)connect.
///
/// The service uses `client_id` to restore queue or match context after a
/// transient disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version the client speaks
    pub version: u8,
    /// Persisted anonymous client identifier
    pub client_id: String,
}

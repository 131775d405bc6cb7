//! Text side-channel scoped to the current match.
//!
//! The relay only validates, stamps and records messages. Forwarding over
//! signaling and clearing on match boundaries are the orchestrator's job.

use tandem_proto::ChatPayload;

use crate::{env::Environment, error::ChatError};

/// Maximum characters in one outgoing message.
pub const MAX_CHAT_LEN: usize = 1000;

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// This client
    Local,
    /// The matched partner
    Remote,
}

/// One recorded chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Sender-assigned unique id
    pub id: String,
    /// Trimmed, non-empty text
    pub text: String,
    /// Sender wall clock, epoch milliseconds
    pub timestamp: u64,
    /// Local or remote
    pub origin: Origin,
}

/// Append-only message log for one match.
#[derive(Debug, Default)]
pub struct ChatRelay {
    messages: Vec<ChatMessage>,
    sent: u64,
}

impl ChatRelay {
    /// Empty relay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and record an outgoing message.
    ///
    /// Returns the payload to forward over signaling.
    ///
    /// # Errors
    ///
    /// - `ChatError::Empty` for empty or whitespace-only text
    /// - `ChatError::TooLong` past [`MAX_CHAT_LEN`] characters
    pub fn send<E: Environment>(&mut self, text: &str, env: &E) -> Result<ChatPayload, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::Empty);
        }

        let len = text.chars().count();
        if len > MAX_CHAT_LEN {
            return Err(ChatError::TooLong { len, max: MAX_CHAT_LEN });
        }

        // Counter keeps ids unique even if the RNG repeats.
        self.sent += 1;
        let id = format!("{:016x}-{}", env.random_u64(), self.sent);
        let timestamp = env.wall_clock_ms();

        self.messages.push(ChatMessage {
            id: id.clone(),
            text: text.to_string(),
            timestamp,
            origin: Origin::Local,
        });

        Ok(ChatPayload { id, text: text.to_string(), timestamp })
    }

    /// Record an incoming message in arrival order.
    ///
    /// Returns false (and records nothing) for blank text.
    pub fn on_receive(&mut self, payload: ChatPayload) -> bool {
        let text = payload.text.trim();
        if text.is_empty() {
            tracing::debug!(id = %payload.id, "dropping blank remote chat message");
            return false;
        }

        self.messages.push(ChatMessage {
            id: payload.id,
            text: text.to_string(),
            timestamp: payload.timestamp,
            origin: Origin::Remote,
        });
        true
    }

    /// Forget every message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Messages in order.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Whether no message is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

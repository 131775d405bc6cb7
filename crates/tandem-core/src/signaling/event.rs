//! Typed signaling vocabulary.
//!
//! Session-level frames (hello, welcome, ping) are consumed by the
//! connection state machine. Everything else crosses to the orchestrator as
//! an [`InboundEvent`] or leaves it as an [`OutboundEvent`].

use tandem_proto::{
    ChatPayload, ErrorPayload, Frame, IceCandidate, Matched, Payload, ProtocolError, QueueStatus,
    Role, SessionDescription,
};

/// Event delivered from the service, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Queue entered, no partner yet
    Waiting,
    /// Queue position update
    QueueStatus(QueueStatus),
    /// Pairing formed with the given role
    Matched(Role),
    /// Partner's offer
    Offer(SessionDescription),
    /// Partner's answer
    Answer(SessionDescription),
    /// Partner's network candidate
    Candidate(IceCandidate),
    /// Partner disconnected or left
    PartnerLeft,
    /// Server-forced full reset
    Reset,
    /// Partner's chat message
    ChatReceive(ChatPayload),
    /// Informational error from the service
    ServerError(ErrorPayload),
}

impl InboundEvent {
    /// Map a decoded payload to an inbound event.
    ///
    /// `None` for session-level payloads and for opcodes only a client sends.
    #[must_use]
    pub fn from_payload(payload: Payload) -> Option<Self> {
        let event = match payload {
            Payload::Waiting => Self::Waiting,
            Payload::QueueStatus(status) => Self::QueueStatus(status),
            Payload::Matched(Matched { role }) => Self::Matched(role),
            Payload::Offer(desc) => Self::Offer(desc),
            Payload::Answer(desc) => Self::Answer(desc),
            Payload::Candidate(candidate) => Self::Candidate(candidate),
            Payload::PartnerLeft => Self::PartnerLeft,
            Payload::Reset => Self::Reset,
            Payload::ChatReceive(chat) => Self::ChatReceive(chat),
            Payload::Error(err) => Self::ServerError(err),
            Payload::Hello(_)
            | Payload::Welcome
            | Payload::Reconnected
            | Payload::Ping
            | Payload::Pong
            | Payload::Find
            | Payload::Next
            | Payload::Stop
            | Payload::ChatSend(_) => return None,
        };
        Some(event)
    }
}

/// Event emitted toward the service. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Enter or re-enter the queue
    Find,
    /// Leave the current match
    Next,
    /// Leave queue and match entirely
    Stop,
    /// Caller's offer
    Offer(SessionDescription),
    /// Callee's answer
    Answer(SessionDescription),
    /// One local network candidate
    Candidate(IceCandidate),
    /// Chat message for the partner
    ChatSend(ChatPayload),
}

impl OutboundEvent {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Find => "find",
            Self::Next => "next",
            Self::Stop => "stop",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
            Self::ChatSend(_) => "chat-send",
        }
    }

    /// Wire payload for this event.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        match self {
            Self::Find => Payload::Find,
            Self::Next => Payload::Next,
            Self::Stop => Payload::Stop,
            Self::Offer(desc) => Payload::Offer(desc),
            Self::Answer(desc) => Payload::Answer(desc),
            Self::Candidate(candidate) => Payload::Candidate(candidate),
            Self::ChatSend(chat) => Payload::ChatSend(chat),
        }
    }

    /// Encode as a frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self) -> Result<Frame, ProtocolError> {
        self.into_payload().into_frame()
    }
}

/// Client-visible state of the signaling link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStatus {
    /// First connection attempt in progress
    #[default]
    Connecting,
    /// Service accepted a new identity
    Connected,
    /// Link lost, redialing
    Reconnecting {
        /// 1-based redial attempt
        attempt: u32,
    },
    /// Service restored context for a known identity
    Reconnected,
    /// Channel shut down
    Closed,
}

impl LinkStatus {
    /// Whether the link is currently usable.
    #[must_use]
    pub const fn is_up(self) -> bool {
        matches!(self, Self::Connected | Self::Reconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_frames_are_not_events() {
        assert_eq!(InboundEvent::from_payload(Payload::Ping), None);
        assert_eq!(InboundEvent::from_payload(Payload::Welcome), None);
        assert_eq!(InboundEvent::from_payload(Payload::Find), None);
    }

    #[test]
    fn matched_carries_role() {
        let event = InboundEvent::from_payload(Payload::Matched(Matched { role: Role::Caller }));
        assert_eq!(event, Some(InboundEvent::Matched(Role::Caller)));
    }

    #[test]
    fn only_established_links_are_up() {
        assert!(LinkStatus::Connected.is_up());
        assert!(LinkStatus::Reconnected.is_up());
        assert!(!LinkStatus::Reconnecting { attempt: 1 }.is_up());
        assert!(!LinkStatus::Closed.is_up());
    }

    #[test]
    fn outbound_maps_to_opcode() {
        let frame = OutboundEvent::Find.into_frame().unwrap();
        assert_eq!(frame.header.opcode_enum(), Some(tandem_proto::Opcode::Find));
        assert!(frame.payload.is_empty());
    }
}

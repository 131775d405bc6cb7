//! Operation codes.
//!
//! The opcode space is split into families by the high byte:
//!
//! | Range    | Family      |
//! |----------|-------------|
//! | `0x00xx` | session     |
//! | `0x01xx` | matchmaking |
//! | `0x02xx` | negotiation |
//! | `0x03xx` | chat        |

/// Frame operation code (u16 on the wire, big endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    // Session
    /// Client announces its identity
    Hello = 0x0001,
    /// First connection accepted
    Welcome = 0x0002,
    /// Connection restored for a known identity
    Reconnected = 0x0003,
    /// Keepalive request
    Ping = 0x0004,
    /// Keepalive response
    Pong = 0x0005,
    /// Informational server error
    Error = 0x00FF,

    // Matchmaking
    /// Enter (or re-enter) the queue
    Find = 0x0101,
    /// Leave the current match voluntarily
    Next = 0x0102,
    /// Leave the queue and any match
    Stop = 0x0103,
    /// Queue entered, no partner yet
    Waiting = 0x0110,
    /// Periodic queue position update
    QueueStatus = 0x0111,
    /// Pairing formed
    Matched = 0x0112,
    /// Partner disconnected or left
    PartnerLeft = 0x0113,
    /// Server-forced full reset
    Reset = 0x0114,

    // Negotiation
    /// Caller's session description
    Offer = 0x0201,
    /// Callee's session description
    Answer = 0x0202,
    /// One network candidate
    Candidate = 0x0203,

    // Chat
    /// Client relays a chat message to its partner
    ChatSend = 0x0301,
    /// Chat message relayed from the partner
    ChatReceive = 0x0302,
}

impl Opcode {
    /// Raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a wire value. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        let op = match value {
            0x0001 => Self::Hello,
            0x0002 => Self::Welcome,
            0x0003 => Self::Reconnected,
            0x0004 => Self::Ping,
            0x0005 => Self::Pong,
            0x00FF => Self::Error,
            0x0101 => Self::Find,
            0x0102 => Self::Next,
            0x0103 => Self::Stop,
            0x0110 => Self::Waiting,
            0x0111 => Self::QueueStatus,
            0x0112 => Self::Matched,
            0x0113 => Self::PartnerLeft,
            0x0114 => Self::Reset,
            0x0201 => Self::Offer,
            0x0202 => Self::Answer,
            0x0203 => Self::Candidate,
            0x0301 => Self::ChatSend,
            0x0302 => Self::ChatReceive,
            _ => return None,
        };
        Some(op)
    }

    /// Whether a client sends this opcode (as opposed to receiving it).
    ///
    /// Offer, answer and candidate travel in both directions.
    #[must_use]
    pub const fn is_client_originated(self) -> bool {
        matches!(
            self,
            Self::Hello
                | Self::Ping
                | Self::Pong
                | Self::Find
                | Self::Next
                | Self::Stop
                | Self::Offer
                | Self::Answer
                | Self::Candidate
                | Self::ChatSend
        )
    }

    /// Whether a client may receive this opcode from the service.
    #[must_use]
    pub const fn is_server_originated(self) -> bool {
        matches!(
            self,
            Self::Welcome
                | Self::Reconnected
                | Self::Ping
                | Self::Pong
                | Self::Error
                | Self::Waiting
                | Self::QueueStatus
                | Self::Matched
                | Self::PartnerLeft
                | Self::Reset
                | Self::Offer
                | Self::Answer
                | Self::Candidate
                | Self::ChatReceive
        )
    }
}

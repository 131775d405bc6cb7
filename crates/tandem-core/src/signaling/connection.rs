//! Signaling link state machine.
//!
//! Manages one link's handshake, heartbeats and timeouts. Uses the action
//! pattern: methods take time as input and return actions for the channel
//! task to execute. No I/O happens here.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  Hello   ┌──────────┐ Welcome/Reconnected ┌───────┐
//! │ Init │─────────>│ Pending  │────────────────────>│ Ready │
//! └──────┘          └──────────┘                     └───────┘
//!                        │                               │
//!                        │ Handshake timeout             │ Idle timeout
//!                        ↓                               ↓
//!                   ┌────────┐                      ┌────────┐
//!                   │ Closed │<─────────────────────│ Closed │
//!                   └────────┘                      └────────┘
//! ```
//!
//! A closed connection is discarded. The channel builds a fresh one for the
//! next dial and sends hello again, which is how identity replay works.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use tandem_proto::{Frame, FrameHeader, Hello, Opcode, Payload};

use super::{
    backoff::{DEFAULT_RECONNECT_BASE, DEFAULT_RECONNECT_MAX},
    event::{InboundEvent, LinkStatus},
};
use crate::{error::SignalingError, identity::ClientIdentity};

/// Protocol version announced in hello.
pub const PROTOCOL_VERSION: u8 = 1;

/// Time allowed to complete the hello handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum time allowed without any inbound activity before the link is
/// considered dead.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval at which pings are sent while ready.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Actions returned by the signaling state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingAction {
    /// Send this frame to the service
    SendFrame(Frame),

    /// Hand this event to the orchestrator
    Deliver(InboundEvent),

    /// Link status changed
    Status(LinkStatus),

    /// Drop the link with this reason
    Close {
        /// Reason for closing the link
        reason: String,
    },
}

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    /// Nothing sent yet
    Init,
    /// Hello sent, waiting for welcome or reconnected
    Pending,
    /// Handshake complete, events flow
    Ready,
    /// Link closed (timeout or explicit)
    Closed,
}

/// Signaling configuration
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Timeout for completing handshake
    pub handshake_timeout: Duration,
    /// Idle timeout before dropping the link
    pub idle_timeout: Duration,
    /// Heartbeat interval (should be < idle_timeout / 2)
    pub heartbeat_interval: Duration,
    /// First reconnect delay
    pub reconnect_base: Duration,
    /// Reconnect delay cap
    pub reconnect_max: Duration,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_base: DEFAULT_RECONNECT_BASE,
            reconnect_max: DEFAULT_RECONNECT_MAX,
        }
    }
}

/// Signaling link state machine
///
/// Generic over `Instant` so simulation can drive it with virtual time.
#[derive(Debug, Clone)]
pub struct SignalingConnection<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    state: SignalingState,
    config: SignalingConfig,
    /// Last inbound activity (or hello send time while pending)
    last_activity: I,
    /// Last ping sent
    last_heartbeat: Option<I>,
    /// Which handshake reply we got
    established: Option<LinkStatus>,
}

impl<I> SignalingConnection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new link in [`SignalingState::Init`]
    pub fn new(now: I, config: SignalingConfig) -> Self {
        Self {
            state: SignalingState::Init,
            config,
            last_activity: now,
            last_heartbeat: None,
            established: None,
        }
    }

    /// Current link state
    #[must_use]
    pub fn state(&self) -> SignalingState {
        self.state
    }

    /// Whether application events may flow.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == SignalingState::Ready
    }

    /// `Connected` or `Reconnected` once the handshake completed.
    #[must_use]
    pub fn established(&self) -> Option<LinkStatus> {
        self.established
    }

    /// Announce identity. Transitions to Pending.
    ///
    /// # Errors
    ///
    /// - `SignalingError::InvalidState` if not in Init state
    pub fn send_hello(
        &mut self,
        now: I,
        identity: &ClientIdentity,
    ) -> Result<Vec<SignalingAction>, SignalingError> {
        if self.state != SignalingState::Init {
            return Err(SignalingError::InvalidState {
                state: self.state,
                operation: "send_hello".to_string(),
            });
        }

        self.state = SignalingState::Pending;
        self.last_activity = now;

        let hello = Payload::Hello(Hello {
            version: PROTOCOL_VERSION,
            client_id: identity.as_str().to_string(),
        });

        Ok(vec![SignalingAction::SendFrame(hello.into_frame()?)])
    }

    /// Mark link as closed.
    pub fn close(&mut self) {
        self.state = SignalingState::Closed;
    }

    /// Elapsed time since last activity, if timeout exceeded. `None` otherwise.
    #[must_use]
    pub fn check_timeout(&self, now: I) -> Option<Duration> {
        let elapsed = now - self.last_activity;

        let timeout = match self.state {
            SignalingState::Pending => self.config.handshake_timeout,
            SignalingState::Ready => self.config.idle_timeout,
            SignalingState::Init | SignalingState::Closed => return None,
        };

        if elapsed > timeout { Some(elapsed) } else { None }
    }

    /// Process periodic maintenance (timeouts and heartbeats).
    pub fn tick(&mut self, now: I) -> Vec<SignalingAction> {
        if let Some(elapsed) = self.check_timeout(now) {
            let error = match self.state {
                SignalingState::Pending => SignalingError::HandshakeTimeout { elapsed },
                _ => SignalingError::IdleTimeout { elapsed },
            };

            self.close();
            return vec![SignalingAction::Close { reason: error.to_string() }];
        }

        if self.state != SignalingState::Ready {
            return Vec::new();
        }

        let should_send = match self.last_heartbeat {
            None => true,
            Some(last) => now - last >= self.config.heartbeat_interval,
        };

        if should_send {
            self.last_heartbeat = Some(now);
            let ping = Frame::new(FrameHeader::new(Opcode::Ping), Vec::new());
            vec![SignalingAction::SendFrame(ping)]
        } else {
            Vec::new()
        }
    }

    /// Process incoming frame and update state.
    ///
    /// # Errors
    ///
    /// - `SignalingError::UnexpectedFrame` if the opcode is unknown, client
    ///   only, or invalid for the current state
    /// - `SignalingError::Protocol` if the payload does not decode
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        now: I,
    ) -> Result<Vec<SignalingAction>, SignalingError> {
        let unexpected =
            |state| SignalingError::UnexpectedFrame { state, opcode: frame.header.opcode() };

        let Some(opcode) = frame.header.opcode_enum() else {
            return Err(unexpected(self.state));
        };

        if self.state == SignalingState::Closed || self.state == SignalingState::Init {
            return Err(unexpected(self.state));
        }

        self.last_activity = now;

        match (self.state, opcode) {
            (SignalingState::Pending, Opcode::Welcome | Opcode::Reconnected) => {
                let status = if opcode == Opcode::Welcome {
                    LinkStatus::Connected
                } else {
                    LinkStatus::Reconnected
                };

                self.state = SignalingState::Ready;
                self.established = Some(status);
                Ok(vec![SignalingAction::Status(status)])
            },

            (_, Opcode::Ping) => {
                let pong = Frame::new(FrameHeader::new(Opcode::Pong), Vec::new());
                Ok(vec![SignalingAction::SendFrame(pong)])
            },

            // Activity already updated
            (_, Opcode::Pong) => Ok(vec![]),

            // Errors may reject the hello itself
            (_, Opcode::Error) | (SignalingState::Ready, _) => {
                let payload = Payload::from_frame(frame)?;
                match InboundEvent::from_payload(payload) {
                    Some(event) => Ok(vec![SignalingAction::Deliver(event)]),
                    None => Err(unexpected(self.state)),
                }
            },

            _ => Err(unexpected(self.state)),
        }
    }
}

#[cfg(test)]
mod tests {
    use tandem_proto::{ChatPayload, ErrorPayload, Matched, QueueStatus, Role};

    use super::*;

    fn identity() -> ClientIdentity {
        ClientIdentity::parse("0123456789abcdef0123456789abcdef").unwrap()
    }

    fn frame(payload: Payload) -> Frame {
        payload.into_frame().unwrap()
    }

    fn ready(now: Instant) -> SignalingConnection {
        let mut conn = SignalingConnection::new(now, SignalingConfig::default());
        conn.send_hello(now, &identity()).unwrap();
        conn.handle_frame(&frame(Payload::Welcome), now).unwrap();
        conn
    }

    #[test]
    fn hello_carries_identity() {
        let now = Instant::now();
        let mut conn = SignalingConnection::new(now, SignalingConfig::default());

        let actions = conn.send_hello(now, &identity()).unwrap();
        assert_eq!(conn.state(), SignalingState::Pending);

        let [SignalingAction::SendFrame(hello)] = actions.as_slice() else {
            panic!("expected one frame, got {actions:?}");
        };
        match Payload::from_frame(hello).unwrap() {
            Payload::Hello(hello) => {
                assert_eq!(hello.client_id, identity().as_str());
                assert_eq!(hello.version, PROTOCOL_VERSION);
            },
            other => panic!("expected hello, got {other:?}"),
        }
    }

    #[test]
    fn hello_twice_rejected() {
        let now = Instant::now();
        let mut conn = SignalingConnection::new(now, SignalingConfig::default());
        conn.send_hello(now, &identity()).unwrap();

        let result = conn.send_hello(now, &identity());
        assert!(matches!(result, Err(SignalingError::InvalidState { .. })));
    }

    #[test]
    fn welcome_reports_first_connect() {
        let now = Instant::now();
        let conn = ready(now);
        assert!(conn.is_ready());
        assert_eq!(conn.established(), Some(LinkStatus::Connected));
    }

    #[test]
    fn reconnected_reports_restore() {
        let now = Instant::now();
        let mut conn = SignalingConnection::new(now, SignalingConfig::default());
        conn.send_hello(now, &identity()).unwrap();

        let actions = conn.handle_frame(&frame(Payload::Reconnected), now).unwrap();
        assert_eq!(actions, vec![SignalingAction::Status(LinkStatus::Reconnected)]);
    }

    #[test]
    fn events_before_handshake_rejected() {
        let now = Instant::now();
        let mut conn = SignalingConnection::new(now, SignalingConfig::default());
        conn.send_hello(now, &identity()).unwrap();

        let result = conn.handle_frame(&frame(Payload::Waiting), now);
        assert!(matches!(result, Err(SignalingError::UnexpectedFrame { .. })));
        assert_eq!(conn.state(), SignalingState::Pending);
    }

    #[test]
    fn error_before_handshake_delivered() {
        let now = Instant::now();
        let mut conn = SignalingConnection::new(now, SignalingConfig::default());
        conn.send_hello(now, &identity()).unwrap();

        let err = ErrorPayload::handshake_required();
        let actions = conn.handle_frame(&frame(Payload::Error(err.clone())), now).unwrap();
        assert_eq!(actions, vec![SignalingAction::Deliver(InboundEvent::ServerError(err))]);
    }

    #[test]
    fn ready_delivers_events_in_order() {
        let now = Instant::now();
        let mut conn = ready(now);

        let inbound = [
            Payload::Waiting,
            Payload::QueueStatus(QueueStatus { position: 2, eta_seconds: 10, waited_seconds: 1 }),
            Payload::Matched(Matched { role: Role::Callee }),
            Payload::ChatReceive(ChatPayload { id: "a".into(), text: "hi".into(), timestamp: 1 }),
        ];

        let delivered: Vec<_> = inbound
            .iter()
            .flat_map(|p| conn.handle_frame(&frame(p.clone()), now).unwrap())
            .collect();

        assert!(matches!(delivered.as_slice(), [
            SignalingAction::Deliver(InboundEvent::Waiting),
            SignalingAction::Deliver(InboundEvent::QueueStatus(_)),
            SignalingAction::Deliver(InboundEvent::Matched(Role::Callee)),
            SignalingAction::Deliver(InboundEvent::ChatReceive(_)),
        ]));
    }

    #[test]
    fn client_only_opcode_rejected() {
        let now = Instant::now();
        let mut conn = ready(now);

        let result = conn.handle_frame(&frame(Payload::Find), now);
        assert!(matches!(result, Err(SignalingError::UnexpectedFrame { opcode: 0x0101, .. })));
        assert!(conn.is_ready());
    }

    #[test]
    fn unknown_opcode_rejected() {
        let now = Instant::now();
        let mut conn = ready(now);

        let mut bytes = FrameHeader::new(Opcode::Find).to_bytes();
        bytes[6..8].copy_from_slice(&0x7777u16.to_be_bytes());
        let bad = Frame::new(*FrameHeader::from_bytes(&bytes).unwrap(), Vec::new());

        let result = conn.handle_frame(&bad, now);
        assert!(matches!(result, Err(SignalingError::UnexpectedFrame { opcode: 0x7777, .. })));
    }

    #[test]
    fn ping_answered_with_pong() {
        let now = Instant::now();
        let mut conn = ready(now);

        let actions = conn.handle_frame(&frame(Payload::Ping), now).unwrap();
        let [SignalingAction::SendFrame(pong)] = actions.as_slice() else {
            panic!("expected pong, got {actions:?}");
        };
        assert_eq!(pong.header.opcode_enum(), Some(Opcode::Pong));
    }

    #[test]
    fn heartbeat_respects_interval() {
        let now = Instant::now();
        let mut conn = ready(now);

        assert_eq!(conn.tick(now).len(), 1, "first tick pings");
        assert!(conn.tick(now + Duration::from_secs(5)).is_empty());

        // Keep the link alive so the idle timeout does not fire first
        conn.handle_frame(&frame(Payload::Pong), now + DEFAULT_HEARTBEAT_INTERVAL).unwrap();
        assert_eq!(conn.tick(now + DEFAULT_HEARTBEAT_INTERVAL).len(), 1);
    }

    #[test]
    fn handshake_timeout_closes() {
        let now = Instant::now();
        let mut conn = SignalingConnection::new(now, SignalingConfig::default());
        conn.send_hello(now, &identity()).unwrap();

        let later = now + DEFAULT_HANDSHAKE_TIMEOUT + Duration::from_secs(1);
        let actions = conn.tick(later);

        assert!(matches!(actions.as_slice(), [SignalingAction::Close { reason }] if reason.contains("handshake")));
        assert_eq!(conn.state(), SignalingState::Closed);
    }

    #[test]
    fn idle_timeout_closes_ready_link() {
        let now = Instant::now();
        let mut conn = ready(now);

        let later = now + DEFAULT_IDLE_TIMEOUT + Duration::from_secs(1);
        let actions = conn.tick(later);

        assert!(matches!(actions.as_slice(), [SignalingAction::Close { reason }] if reason.contains("idle")));
    }

    #[test]
    fn closed_link_rejects_frames() {
        let now = Instant::now();
        let mut conn = ready(now);
        conn.close();

        assert!(conn.handle_frame(&frame(Payload::Waiting), now).is_err());
        assert!(conn.tick(now + Duration::from_secs(600)).is_empty());
    }
}

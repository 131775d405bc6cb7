//! Fuzz target for the signaling link state machine
//!
//! Drives a SignalingConnection with arbitrary frames and clock jumps.
//!
//! # Invariants
//!
//! - Nothing but server errors is delivered before the handshake completes
//! - A closed link never sends or delivers again
//! - Status is reported at most once per link
//! - Errors are structured, never panics

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tandem_core::{
    ClientIdentity, InboundEvent, SignalingAction, SignalingConfig, SignalingConnection,
    SignalingState,
};
use tandem_proto::{Frame, FrameHeader, Opcode, Payload};

#[derive(Debug, Arbitrary)]
enum Step {
    /// Server frame with a known opcode and arbitrary body
    Frame { opcode: u16, body: Vec<u8> },
    /// Well-formed bodiless server frame
    Control(ControlKind),
    /// Move the clock forward
    Advance { millis: u32 },
    /// Periodic maintenance
    Tick,
}

#[derive(Debug, Arbitrary)]
enum ControlKind {
    Welcome,
    Reconnected,
    Pong,
    Waiting,
    PartnerLeft,
    Reset,
}

impl ControlKind {
    fn payload(&self) -> Payload {
        match self {
            Self::Welcome => Payload::Welcome,
            Self::Reconnected => Payload::Reconnected,
            Self::Pong => Payload::Pong,
            Self::Waiting => Payload::Waiting,
            Self::PartnerLeft => Payload::PartnerLeft,
            Self::Reset => Payload::Reset,
        }
    }
}

#[derive(Debug, Arbitrary)]
struct Input {
    send_hello: bool,
    steps: Vec<Step>,
}

fuzz_target!(|input: Input| {
    let start = Instant::now();
    let mut now = start;
    let mut link = SignalingConnection::new(now, SignalingConfig::default());
    let identity = ClientIdentity::parse("fuzz-client").expect("valid identity");

    if input.send_hello {
        assert!(link.send_hello(now, &identity).is_ok());
        assert!(link.send_hello(now, &identity).is_err());
    }

    let mut statuses = 0;
    for step in input.steps {
        let before = link.state();
        let actions = match step {
            Step::Frame { opcode, body } => {
                let Some(opcode) = Opcode::from_u16(opcode) else {
                    continue;
                };
                let body: Vec<u8> =
                    body.into_iter().take(FrameHeader::MAX_PAYLOAD_SIZE as usize).collect();
                let frame = Frame::new(FrameHeader::new(opcode), body);
                link.handle_frame(&frame, now).unwrap_or_default()
            },
            Step::Control(kind) => match kind.payload().into_frame() {
                Ok(frame) => link.handle_frame(&frame, now).unwrap_or_default(),
                Err(_) => continue,
            },
            Step::Advance { millis } => {
                now += Duration::from_millis(u64::from(millis));
                continue;
            },
            Step::Tick => link.tick(now),
        };

        for action in &actions {
            match action {
                SignalingAction::Deliver(InboundEvent::ServerError(_)) => {
                    assert_ne!(before, SignalingState::Closed);
                },
                SignalingAction::Deliver(_) => assert_eq!(before, SignalingState::Ready),
                SignalingAction::SendFrame(_) => assert_ne!(before, SignalingState::Closed),
                SignalingAction::Status(_) => statuses += 1,
                SignalingAction::Close { .. } => {},
            }
        }
        assert!(statuses <= 1);
        if before == SignalingState::Closed {
            assert_eq!(link.state(), SignalingState::Closed);
        }
    }
});

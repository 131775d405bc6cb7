//! Fuzz target for Payload::decode
//!
//! Feeds the same bytes to every opcode:
//! - malformed or deeply nested CBOR
//! - a valid body under the wrong opcode
//! - oversized strings
//!
//! Decoding never panics. A payload that decodes reports the opcode it was
//! decoded under.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tandem_proto::{Opcode, Payload};

const OPCODES: [Opcode; 19] = [
    Opcode::Hello,
    Opcode::Welcome,
    Opcode::Reconnected,
    Opcode::Ping,
    Opcode::Pong,
    Opcode::Error,
    Opcode::Find,
    Opcode::Next,
    Opcode::Stop,
    Opcode::Waiting,
    Opcode::QueueStatus,
    Opcode::Matched,
    Opcode::PartnerLeft,
    Opcode::Reset,
    Opcode::Offer,
    Opcode::Answer,
    Opcode::Candidate,
    Opcode::ChatSend,
    Opcode::ChatReceive,
];

fuzz_target!(|data: &[u8]| {
    for opcode in OPCODES {
        if let Ok(payload) = Payload::decode(opcode, data) {
            assert_eq!(payload.opcode(), opcode);
        }
    }
});

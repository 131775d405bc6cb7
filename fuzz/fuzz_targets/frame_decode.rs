//! Fuzz target for Frame::decode
//!
//! Arbitrary bytes must decode to a frame or a structured error, never a
//! panic. A frame that decodes must re-encode to the bytes it came from.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tandem_proto::{Frame, FrameHeader};

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    assert!(frame.payload.len() <= FrameHeader::MAX_PAYLOAD_SIZE as usize);

    let mut encoded = Vec::new();
    frame.encode(&mut encoded).expect("decoded frame must re-encode");
    assert_eq!(&encoded[..], &data[..encoded.len()]);
});

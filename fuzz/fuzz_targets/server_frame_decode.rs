//! Fuzz target for ServerFrame::decode
//!
//! Anything that decodes must encode again and decode to the same frame.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_proto::ServerFrame;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(frame) = ServerFrame::decode(text) {
        let encoded = frame.encode().expect("decoded frame must encode");
        let decoded = ServerFrame::decode(&encoded).expect("encoded frame must decode");
        assert_eq!(frame, decoded);
    }
});

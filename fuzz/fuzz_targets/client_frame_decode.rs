//! Fuzz target for inbound WebSocket frames
//!
//! Feeds arbitrary bytes through the same path a live connection uses:
//! size check, JSON decode, sender resolution.
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use chrono::DateTime;
use libfuzzer_sys::fuzz_target;
use parley_server::inbound_message;

fuzz_target!(|data: &[u8]| {
    let Some((&user, frame)) = data.split_first() else {
        return;
    };
    let user_id = u64::from(user) + 1;

    if let Ok(message) = inbound_message(frame, user_id, DateTime::UNIX_EPOCH) {
        assert_eq!(message.sender_id, user_id);
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use signaling_protocol::codec::{decode_client, encode_client, MAX_FRAME_BYTES};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Must never panic, only return Err for invalid input
    if let Ok(event) = decode_client(text, MAX_FRAME_BYTES) {
        // Anything we accept we must be able to write back out
        let encoded = encode_client(&event).expect("accepted event must encode");
        let again = decode_client(&encoded, usize::MAX).expect("encoded event must decode");
        assert_eq!(again, event);
    }
});

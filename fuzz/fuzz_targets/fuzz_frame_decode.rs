#![no_main]

use btp_server::core::frame::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Anything accepted must survive a re-encode
    if let Ok(frame) = Frame::from_bytes(data) {
        let again = Frame::from_bytes(&frame.to_bytes());
        assert_eq!(again.ok(), Some(frame));
    }
});

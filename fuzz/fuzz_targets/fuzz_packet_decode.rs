#![no_main]

use btp_server::core::packet::Packet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = Packet::from_bytes(data);
});

#![no_main]

use bytes::Bytes;
use huddle_protocol::codec::decode_envelope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let buf = Bytes::copy_from_slice(data);

    // Must return Err for invalid input, never panic
    let _ = decode_envelope(&mut buf.clone());
});

#![no_main]

use bytes::Bytes;
use huddle_protocol::codec::{decode_envelope, encode_envelope};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let buf = Bytes::copy_from_slice(data);

    if let Ok(envelope) = decode_envelope(&mut buf.clone()) {
        // Anything that decodes must re-encode to an equal envelope
        if let Ok(encoded) = encode_envelope(&envelope) {
            if let Ok(again) = decode_envelope(&mut encoded.clone()) {
                assert_eq!(envelope, again);
            }
        }
    }
});

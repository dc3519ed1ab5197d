//! Control-channel framing.
//!
//! The control channel is a byte stream, so every message on it is prefixed
//! with a 4-byte big-endian length. This includes the handshake exchange,
//! whose frames carry raw UTF-8 (the participant name, then `OK` or a
//! rejection string) rather than an encoded envelope.

use tokio_util::codec::LengthDelimitedCodec;

/// Width of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound on one control frame
pub const MAX_CONTROL_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Build the length-delimited codec used on the control channel.
///
/// Frames longer than `max_frame_len` are rejected with an I/O error of
/// kind `InvalidData` on both read and write.
#[must_use]
pub fn control_codec(max_frame_len: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_PREFIX_LEN)
        .big_endian()
        .max_frame_length(max_frame_len)
        .new_codec()
}

//! Codec for encoding and decoding envelopes.
//!
//! Envelope format (big-endian):
//! - Version: 1 byte
//! - Request kind: 1 byte
//! - Media kind: 1 byte (0 = absent)
//! - Sender: 2-byte length + UTF-8
//! - Recipient count: 2 bytes, then each recipient as 2-byte length + UTF-8
//! - Payload tag: 1 byte (0 = empty, 1 = text, 2 = binary, 3 = map, 4 = list)
//! - Payload: 4-byte length + body (absent for tag 0; JSON for map and list)
//!
//! The same encoding is used on the control channel (inside a length-prefixed
//! frame) and on media channels (one envelope per datagram).

use crate::envelope::{Envelope, MediaKind, Payload, RequestKind};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};

/// Current envelope encoding version
pub const VERSION: u8 = 1;

/// Bytes preceding the sender name
const FIXED_HEADER_SIZE: usize = 3;

const PAYLOAD_EMPTY: u8 = 0x00;
const PAYLOAD_TEXT: u8 = 0x01;
const PAYLOAD_BINARY: u8 = 0x02;
const PAYLOAD_MAP: u8 = 0x03;
const PAYLOAD_LIST: u8 = 0x04;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Insufficient data to decode
    #[error("Insufficient data")]
    InsufficientData,

    /// Invalid envelope format
    #[error("Invalid envelope format: {0}")]
    InvalidFormat(String),

    /// Unsupported version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// Invalid request kind
    #[error("Invalid request kind: {0}")]
    InvalidRequestKind(u8),

    /// Invalid media kind
    #[error("Invalid media kind: {0}")]
    InvalidMediaKind(u8),

    /// Invalid payload tag
    #[error("Invalid payload tag: {0}")]
    InvalidPayloadTag(u8),

    /// Payload does not have the expected shape
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Bytes left over after a complete envelope
    #[error("Trailing bytes after envelope: {0}")]
    TrailingBytes(usize),

    /// A field is too long for its length prefix
    #[error("Field too long: {field} is {len} bytes")]
    FieldTooLong { field: &'static str, len: usize },
}

/// Encode an envelope to bytes
///
/// # Errors
///
/// Returns an error if a field exceeds its length prefix or a structured
/// payload cannot be serialized.
pub fn encode_envelope(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let body = encode_payload_body(&envelope.payload)?;
    let recipients_len: usize = envelope.recipients.iter().map(|r| 2 + r.len()).sum();
    let capacity = FIXED_HEADER_SIZE
        + 2
        + envelope.sender.len()
        + 2
        + recipients_len
        + 1
        + body.as_ref().map_or(0, |b| 4 + b.len());

    let mut buf = BytesMut::with_capacity(capacity);

    buf.put_u8(VERSION);
    buf.put_u8(envelope.request as u8);
    buf.put_u8(envelope.media_kind.map_or(0, |kind| kind as u8));

    put_str(&mut buf, "sender", &envelope.sender)?;

    let count = u16::try_from(envelope.recipients.len()).map_err(|_| CodecError::FieldTooLong {
        field: "recipients",
        len: envelope.recipients.len(),
    })?;
    buf.put_u16(count);
    for recipient in &envelope.recipients {
        put_str(&mut buf, "recipient", recipient)?;
    }

    buf.put_u8(payload_tag(&envelope.payload));
    if let Some(body) = body {
        let len = u32::try_from(body.len()).map_err(|_| CodecError::FieldTooLong {
            field: "payload",
            len: body.len(),
        })?;
        buf.put_u32(len);
        buf.extend_from_slice(&body);
    }

    Ok(buf.freeze())
}

/// Decode an envelope from bytes
///
/// The buffer must hold exactly one envelope.
///
/// # Errors
///
/// Returns an error if decoding fails
pub fn decode_envelope(data: &mut impl Buf) -> Result<Envelope, CodecError> {
    if data.remaining() < FIXED_HEADER_SIZE {
        return Err(CodecError::InsufficientData);
    }

    let version = data.get_u8();
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let request_byte = data.get_u8();
    let request =
        RequestKind::from_u8(request_byte).ok_or(CodecError::InvalidRequestKind(request_byte))?;

    let media_kind = match data.get_u8() {
        0 => None,
        other => Some(MediaKind::from_u8(other).ok_or(CodecError::InvalidMediaKind(other))?),
    };

    let sender = get_str(data)?;

    if data.remaining() < 2 {
        return Err(CodecError::InsufficientData);
    }
    let count = data.get_u16();
    // Each recipient needs at least its 2-byte length prefix
    if data.remaining() < usize::from(count) * 2 {
        return Err(CodecError::InsufficientData);
    }
    let mut recipients = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        recipients.push(get_str(data)?);
    }

    if !data.has_remaining() {
        return Err(CodecError::InsufficientData);
    }
    let payload = decode_payload(data)?;

    if data.has_remaining() {
        return Err(CodecError::TrailingBytes(data.remaining()));
    }

    Ok(Envelope {
        sender,
        request,
        media_kind,
        payload,
        recipients,
    })
}

const fn payload_tag(payload: &Payload) -> u8 {
    match payload {
        Payload::Empty => PAYLOAD_EMPTY,
        Payload::Text(_) => PAYLOAD_TEXT,
        Payload::Binary(_) => PAYLOAD_BINARY,
        Payload::Map(_) => PAYLOAD_MAP,
        Payload::List(_) => PAYLOAD_LIST,
    }
}

fn encode_payload_body(payload: &Payload) -> Result<Option<Bytes>, CodecError> {
    let body = match payload {
        Payload::Empty => return Ok(None),
        Payload::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
        Payload::Binary(bytes) => bytes.clone(),
        Payload::Map(map) => serde_json::to_vec(map)
            .map(Bytes::from)
            .map_err(|e| CodecError::InvalidPayload(e.to_string()))?,
        Payload::List(items) => serde_json::to_vec(items)
            .map(Bytes::from)
            .map_err(|e| CodecError::InvalidPayload(e.to_string()))?,
    };
    Ok(Some(body))
}

fn decode_payload(data: &mut impl Buf) -> Result<Payload, CodecError> {
    let tag = data.get_u8();
    if tag == PAYLOAD_EMPTY {
        return Ok(Payload::Empty);
    }
    if !(PAYLOAD_TEXT..=PAYLOAD_LIST).contains(&tag) {
        return Err(CodecError::InvalidPayloadTag(tag));
    }

    if data.remaining() < 4 {
        return Err(CodecError::InsufficientData);
    }
    let len = data.get_u32() as usize;
    if data.remaining() < len {
        return Err(CodecError::InsufficientData);
    }
    let body = data.copy_to_bytes(len);

    match tag {
        PAYLOAD_TEXT => String::from_utf8(body.to_vec())
            .map(Payload::Text)
            .map_err(|_| CodecError::InvalidFormat("text payload is not UTF-8".to_string())),
        PAYLOAD_BINARY => Ok(Payload::Binary(body)),
        PAYLOAD_MAP => serde_json::from_slice::<Map<String, Value>>(&body)
            .map(Payload::Map)
            .map_err(|e| CodecError::InvalidPayload(e.to_string())),
        _ => serde_json::from_slice::<Vec<Map<String, Value>>>(&body)
            .map(Payload::List)
            .map_err(|e| CodecError::InvalidPayload(e.to_string())),
    }
}

fn put_str(buf: &mut BytesMut, field: &'static str, value: &str) -> Result<(), CodecError> {
    let len = u16::try_from(value.len()).map_err(|_| CodecError::FieldTooLong {
        field,
        len: value.len(),
    })?;
    buf.put_u16(len);
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

fn get_str(data: &mut impl Buf) -> Result<String, CodecError> {
    if data.remaining() < 2 {
        return Err(CodecError::InsufficientData);
    }
    let len = usize::from(data.get_u16());
    if data.remaining() < len {
        return Err(CodecError::InsufficientData);
    }
    let raw = data.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| CodecError::InvalidFormat("name is not UTF-8".to_string()))
}

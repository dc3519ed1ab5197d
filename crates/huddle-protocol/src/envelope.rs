//! Envelope types.

use crate::codec::CodecError;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// What an envelope asks the receiver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestKind {
    /// Presence: a participant joined, or a media endpoint registration
    Add = 0x01,
    /// Presence: a participant left
    Remove = 0x02,
    /// Content: text, file upload markers/chunks, or re-posted media
    Post = 0x03,
    /// Ask for (or announce) the presenter role
    StartShare = 0x04,
    /// Give up (or announce the end of) the presenter role
    StopShare = 0x05,
    /// Session is ending
    Disconnect = 0x06,
    /// Ask for the caller's file index
    GetFiles = 0x07,
    /// Ask the server to stream one indexed file
    DownloadFile = 0x08,
    /// Reply to `GetFiles`
    FileList = 0x09,
    /// One element of a download stream
    FileChunk = 0x0A,
}

impl RequestKind {
    /// Parse the wire value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Add),
            0x02 => Some(Self::Remove),
            0x03 => Some(Self::Post),
            0x04 => Some(Self::StartShare),
            0x05 => Some(Self::StopShare),
            0x06 => Some(Self::Disconnect),
            0x07 => Some(Self::GetFiles),
            0x08 => Some(Self::DownloadFile),
            0x09 => Some(Self::FileList),
            0x0A => Some(Self::FileChunk),
            _ => None,
        }
    }

    /// Name used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Remove => "REMOVE",
            Self::Post => "POST",
            Self::StartShare => "START_SHARE",
            Self::StopShare => "STOP_SHARE",
            Self::Disconnect => "DISCONNECT",
            Self::GetFiles => "GET_FILES",
            Self::DownloadFile => "DOWNLOAD_FILE",
            Self::FileList => "FILE_LIST",
            Self::FileChunk => "FILE_CHUNK",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of content an envelope carries.
///
/// `Video` and `Audio` are the media kinds: they travel over their own
/// connectionless channels. Everything else travels over the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MediaKind {
    Text = 0x01,
    Video = 0x02,
    Audio = 0x03,
    Screen = 0x04,
    File = 0x05,
}

impl MediaKind {
    /// Parse the wire value. `0x00` (absent) is handled by the codec.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Text),
            0x02 => Some(Self::Video),
            0x03 => Some(Self::Audio),
            0x04 => Some(Self::Screen),
            0x05 => Some(Self::File),
            _ => None,
        }
    }

    /// True for kinds relayed over a media channel.
    #[must_use]
    pub const fn is_media(self) -> bool {
        matches!(self, Self::Video | Self::Audio)
    }

    /// Default hard limit on one datagram for a media kind.
    ///
    /// Returns `None` for kinds that never travel over a media channel.
    #[must_use]
    pub const fn max_datagram_size(self) -> Option<usize> {
        match self {
            Self::Video => Some(65_536),
            Self::Audio => Some(8_192),
            Self::Text | Self::Screen | Self::File => None,
        }
    }

    /// Name used in log fields and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Screen => "screen",
            Self::File => "file",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope payload.
///
/// The meaning of a payload depends on the envelope's request and media
/// kind. For file uploads and downloads: `Text` is a start marker (source
/// filename), `Binary` is a chunk, `Empty` is the end marker, and `Map`
/// carries metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    #[default]
    Empty,
    Text(String),
    Binary(Bytes),
    Map(Map<String, Value>),
    List(Vec<Map<String, Value>>),
}

impl Payload {
    /// Build a map payload from a serializable record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not serialize to a JSON object.
    pub fn from_record<T: Serialize>(record: &T) -> Result<Self, CodecError> {
        Ok(Self::Map(record_to_map(record)?))
    }

    /// Build a list payload from serializable records.
    ///
    /// # Errors
    ///
    /// Returns an error if any record does not serialize to a JSON object.
    pub fn from_records<'a, T, I>(records: I) -> Result<Self, CodecError>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        records
            .into_iter()
            .map(record_to_map)
            .collect::<Result<Vec<_>, _>>()
            .map(Self::List)
    }

    /// Read a map payload back into a typed record.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a map or does not match `T`.
    pub fn to_record<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        match self {
            Self::Map(map) => serde_json::from_value(Value::Object(map.clone()))
                .map_err(|e| CodecError::InvalidPayload(e.to_string())),
            other => Err(CodecError::InvalidPayload(format!(
                "expected map payload, got {}",
                other.kind_name()
            ))),
        }
    }

    /// Read a list payload back into typed records.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a list or an element does not match `T`.
    pub fn to_records<T: DeserializeOwned>(&self) -> Result<Vec<T>, CodecError> {
        match self {
            Self::List(items) => items
                .iter()
                .map(|map| {
                    serde_json::from_value(Value::Object(map.clone()))
                        .map_err(|e| CodecError::InvalidPayload(e.to_string()))
                })
                .collect(),
            other => Err(CodecError::InvalidPayload(format!(
                "expected list payload, got {}",
                other.kind_name()
            ))),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Size of the payload body in bytes, for logging.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
            Self::Map(map) => map.len(),
            Self::List(items) => items.len(),
        }
    }

    /// Short name of the payload variant.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Map(_) => "map",
            Self::List(_) => "list",
        }
    }
}

fn record_to_map<T: Serialize>(record: &T) -> Result<Map<String, Value>, CodecError> {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CodecError::InvalidPayload(
            "record did not serialize to an object".to_string(),
        )),
        Err(e) => Err(CodecError::InvalidPayload(e.to_string())),
    }
}

/// The single message type carried on every channel.
///
/// An empty `recipients` list means "every participant except the sender".
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sender: String,
    pub request: RequestKind,
    pub media_kind: Option<MediaKind>,
    pub payload: Payload,
    pub recipients: Vec<String>,
}

impl Envelope {
    /// Envelope with no media kind, payload, or recipients.
    #[must_use]
    pub fn new(sender: impl Into<String>, request: RequestKind) -> Self {
        Self {
            sender: sender.into(),
            request,
            media_kind: None,
            payload: Payload::Empty,
            recipients: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_media(mut self, kind: MediaKind) -> Self {
        self.media_kind = Some(kind);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_payload(Payload::Text(text.into()))
    }

    #[must_use]
    pub fn with_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients = recipients.into_iter().map(Into::into).collect();
        self
    }

    /// True when the envelope addresses everyone except the sender.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.recipients.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::records::{DownloadRequest, FileListing, TransferId};
    use chrono::Utc;

    #[test]
    fn test_request_kind_wire_values_round_trip() {
        for value in 0x01..=0x0A {
            let kind = RequestKind::from_u8(value).unwrap();
            assert_eq!(kind as u8, value);
        }
        assert!(RequestKind::from_u8(0x00).is_none());
        assert!(RequestKind::from_u8(0x0B).is_none());
    }

    #[test]
    fn test_media_kind_limits() {
        assert_eq!(MediaKind::Video.max_datagram_size(), Some(65_536));
        assert_eq!(MediaKind::Audio.max_datagram_size(), Some(8_192));
        assert_eq!(MediaKind::Text.max_datagram_size(), None);
        assert!(MediaKind::Video.is_media());
        assert!(!MediaKind::Screen.is_media());
        assert!(MediaKind::from_u8(0x00).is_none());
    }

    #[test]
    fn test_record_payload_conversion() {
        let id = TransferId::new();
        let payload = Payload::from_record(&DownloadRequest { transfer_id: id }).unwrap();

        match &payload {
            Payload::Map(map) => {
                assert_eq!(map.get("transfer_id"), Some(&Value::String(id.to_string())));
            }
            other => unreachable!("expected map payload, got {}", other.kind_name()),
        }

        let back: DownloadRequest = payload.to_record().unwrap();
        assert_eq!(back.transfer_id, id);
    }

    #[test]
    fn test_record_list_payload_conversion() {
        let listings = vec![
            FileListing {
                transfer_id: TransferId::new(),
                filename: "a.txt".to_string(),
                size: 3,
                from: "alice".to_string(),
                timestamp: Utc::now(),
            },
            FileListing {
                transfer_id: TransferId::new(),
                filename: "b.txt".to_string(),
                size: 5,
                from: "carol".to_string(),
                timestamp: Utc::now(),
            },
        ];

        let payload = Payload::from_records(&listings).unwrap();
        let back: Vec<FileListing> = payload.to_records().unwrap();
        assert_eq!(back, listings);
    }

    #[test]
    fn test_to_record_rejects_wrong_variant() {
        let err = Payload::Text("nope".to_string())
            .to_record::<DownloadRequest>()
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidPayload(_)));

        let err = Payload::Map(Map::new())
            .to_record::<DownloadRequest>()
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidPayload(_)));
    }

    #[test]
    fn test_envelope_builder() {
        let envelope = Envelope::new("alice", RequestKind::Post)
            .with_media(MediaKind::Text)
            .with_text("hi")
            .with_recipients(["bob"]);

        assert_eq!(envelope.sender, "alice");
        assert_eq!(envelope.payload.as_text(), Some("hi"));
        assert!(!envelope.is_broadcast());
        assert!(Envelope::new("alice", RequestKind::Add).is_broadcast());
    }
}

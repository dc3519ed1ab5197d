//! Wire protocol for Huddle.
//!
//! Every message exchanged with a participant, on the connection-oriented
//! control channel and on the connectionless media channels, is an
//! [`Envelope`](envelope::Envelope). This crate defines the envelope, its
//! compact binary encoding, the typed records carried in structured
//! payloads, and the length-prefixed framing used on the control channel.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod envelope;
pub mod framing;
pub mod records;

pub use codec::{decode_envelope, encode_envelope, CodecError};
pub use envelope::{Envelope, MediaKind, Payload, RequestKind};
pub use records::{DownloadRequest, FileListing, FileMetadata, TransferId};

/// Sender name the server uses for everything it originates.
pub const SERVER_NAME: &str = "SERVER";

/// Handshake reply sent when a participant name is accepted.
pub const HANDSHAKE_OK: &str = "OK";

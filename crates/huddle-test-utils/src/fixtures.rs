//! Envelope builders for common participant requests.

use bytes::Bytes;
use huddle_protocol::{DownloadRequest, Envelope, MediaKind, Payload, RequestKind, TransferId};

/// Text message to everyone else.
pub fn text(sender: &str, body: &str) -> Envelope {
    Envelope::new(sender, RequestKind::Post)
        .with_media(MediaKind::Text)
        .with_text(body)
}

/// Text message to the named recipients only.
pub fn text_to(sender: &str, body: &str, recipients: &[&str]) -> Envelope {
    text(sender, body).with_recipients(recipients.iter().copied())
}

/// Start of an upload; empty `recipients` means everyone else.
pub fn file_start(sender: &str, filename: &str, recipients: &[&str]) -> Envelope {
    Envelope::new(sender, RequestKind::Post)
        .with_media(MediaKind::File)
        .with_text(filename)
        .with_recipients(recipients.iter().copied())
}

/// One chunk of the sender's current upload.
pub fn file_chunk(sender: &str, chunk: &[u8]) -> Envelope {
    Envelope::new(sender, RequestKind::Post)
        .with_media(MediaKind::File)
        .with_payload(Payload::Binary(Bytes::copy_from_slice(chunk)))
}

/// End marker of the sender's current upload.
pub fn file_end(sender: &str) -> Envelope {
    Envelope::new(sender, RequestKind::Post).with_media(MediaKind::File)
}

pub fn get_files(sender: &str) -> Envelope {
    Envelope::new(sender, RequestKind::GetFiles).with_media(MediaKind::File)
}

/// Download request for `transfer_id`.
///
/// # Panics
///
/// Panics if the request cannot be encoded as a map payload.
#[allow(clippy::expect_used)]
pub fn download_request(sender: &str, transfer_id: TransferId) -> Envelope {
    let payload = Payload::from_record(&DownloadRequest { transfer_id })
        .expect("download request should encode");
    Envelope::new(sender, RequestKind::DownloadFile)
        .with_media(MediaKind::File)
        .with_payload(payload)
}

pub fn start_share(sender: &str) -> Envelope {
    Envelope::new(sender, RequestKind::StartShare).with_media(MediaKind::Screen)
}

pub fn stop_share(sender: &str) -> Envelope {
    Envelope::new(sender, RequestKind::StopShare).with_media(MediaKind::Screen)
}

/// Screen frame posted on the control channel.
pub fn screen_frame(sender: &str, frame: &[u8]) -> Envelope {
    Envelope::new(sender, RequestKind::Post)
        .with_media(MediaKind::Screen)
        .with_payload(Payload::Binary(Bytes::copy_from_slice(frame)))
}

pub fn disconnect(sender: &str) -> Envelope {
    Envelope::new(sender, RequestKind::Disconnect)
}

/// Opaque media payload for a video or audio datagram.
pub fn media_frame(sender: &str, kind: MediaKind, frame: &[u8]) -> Envelope {
    Envelope::new(sender, RequestKind::Post)
        .with_media(kind)
        .with_payload(Payload::Binary(Bytes::copy_from_slice(frame)))
}

pub fn video_frame(sender: &str, frame: &[u8]) -> Envelope {
    media_frame(sender, MediaKind::Video, frame)
}

pub fn audio_frame(sender: &str, frame: &[u8]) -> Envelope {
    media_frame(sender, MediaKind::Audio, frame)
}

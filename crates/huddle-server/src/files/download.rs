//! Streaming an indexed file back to its recipient.
//!
//! Sequence on the requester's control channel:
//! 1. `FILE_CHUNK` with the metadata map
//! 2. zero or more `FILE_CHUNK` binary chunks, paced
//! 3. a text notice if the stream is incomplete or failed
//! 4. `FILE_CHUNK` with an empty payload marking the end
//!
//! The end marker is sent on every path once the metadata went out, so the
//! client can always finalize.

use super::store::FileIndexEntry;
use crate::actors::room::server_notice;
use crate::actors::ConnectionActorHandle;
use crate::errors::ServerError;
use crate::observability::metrics;

use bytes::BytesMut;
use huddle_protocol::{Envelope, MediaKind, Payload, RequestKind, SERVER_NAME};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

/// How a download stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Exactly the recorded size was sent.
    Completed { bytes: u64 },
    /// The file on disk no longer matches the recorded size.
    Incomplete { bytes: u64, expected: u64 },
    /// Reading the file failed part way.
    Failed { bytes: u64 },
}

impl DownloadOutcome {
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        match self {
            Self::Completed { bytes }
            | Self::Incomplete { bytes, .. }
            | Self::Failed { bytes } => *bytes,
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Incomplete { .. } => "incomplete",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Notice sent when fewer or more bytes exist than were recorded.
#[must_use]
pub fn incomplete_notice(sent: u64, expected: u64) -> String {
    format!("Incomplete transfer: sent {sent} of {expected} bytes")
}

fn file_chunk(payload: Payload) -> Envelope {
    Envelope::new(SERVER_NAME, RequestKind::FileChunk)
        .with_media(MediaKind::File)
        .with_payload(payload)
}

/// Stream `entry` to `connection`.
///
/// At most `entry.size` bytes are sent, in chunks of `chunk_bytes`, with
/// `pacing` between chunks.
///
/// # Errors
///
/// Returns an error only if the connection itself is gone; file problems
/// are reported to the requester and reflected in the outcome.
pub async fn stream_download(
    connection: &ConnectionActorHandle,
    entry: &FileIndexEntry,
    chunk_bytes: usize,
    pacing: Duration,
) -> Result<DownloadOutcome, ServerError> {
    let started = Instant::now();
    let expected = entry.size;

    connection
        .send_envelope(&file_chunk(Payload::from_record(&entry.metadata())?))
        .await?;

    let streamed = send_chunks(connection, entry, chunk_bytes.max(1), pacing).await;

    let outcome = match streamed {
        Ok((sent, on_disk)) if sent == expected && on_disk == expected => {
            DownloadOutcome::Completed { bytes: sent }
        }
        Ok((sent, on_disk)) => {
            warn!(
                target: "huddle.files",
                transfer_id = %entry.transfer_id,
                sent = sent,
                expected = expected,
                on_disk = on_disk,
                "Download size mismatch"
            );
            connection
                .send_envelope(&server_notice(incomplete_notice(sent, expected)))
                .await?;
            DownloadOutcome::Incomplete {
                bytes: sent,
                expected,
            }
        }
        Err((sent, e)) => {
            warn!(
                target: "huddle.files",
                transfer_id = %entry.transfer_id,
                sent = sent,
                error = %e,
                "Download stream failed"
            );
            connection
                .send_envelope(&server_notice(ServerError::Io(e).client_message()))
                .await?;
            DownloadOutcome::Failed { bytes: sent }
        }
    };

    connection.send_envelope(&file_chunk(Payload::Empty)).await?;

    metrics::record_file_download(outcome.label(), outcome.bytes(), started.elapsed());
    info!(
        target: "huddle.files",
        transfer_id = %entry.transfer_id,
        filename = %entry.filename,
        requester = %connection.peer(),
        bytes = outcome.bytes(),
        outcome = outcome.label(),
        "Download finished"
    );
    Ok(outcome)
}

/// Send the file body. Returns bytes sent and the file's length on disk, or
/// the bytes sent before an I/O error.
async fn send_chunks(
    connection: &ConnectionActorHandle,
    entry: &FileIndexEntry,
    chunk_bytes: usize,
    pacing: Duration,
) -> Result<(u64, u64), (u64, std::io::Error)> {
    let mut file = tokio::fs::File::open(&entry.path)
        .await
        .map_err(|e| (0, e))?;
    let on_disk = file.metadata().await.map_err(|e| (0, e))?.len();

    let mut sent: u64 = 0;
    let mut remaining = entry.size;

    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(chunk_bytes, |r| r.min(chunk_bytes));
        let mut buf = BytesMut::zeroed(want);
        let read = file.read(&mut buf).await.map_err(|e| (sent, e))?;
        if read == 0 {
            break;
        }
        buf.truncate(read);

        let chunk = file_chunk(Payload::Binary(buf.freeze()));
        if let Err(e) = connection.send_envelope(&chunk).await {
            return Err((
                sent,
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, e.to_string()),
            ));
        }

        sent += read as u64;
        remaining -= read as u64;
        tokio::time::sleep(pacing).await;
    }

    Ok((sent, on_disk))
}

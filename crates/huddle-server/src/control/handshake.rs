//! Control-channel handshake.
//!
//! The first frame on a new connection is the participant's name as raw
//! UTF-8. The reply is a raw frame too: `OK` on success (sent by the room so
//! it precedes the presence sync), or a rejection text followed by close.

use crate::actors::{ConnectionActorHandle, RoomActorHandle};
use crate::errors::ServerError;
use crate::observability::metrics;

use bytes::Bytes;
use futures_util::StreamExt;
use huddle_protocol::SERVER_NAME;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tracing::{debug, info, warn};

/// Longest accepted participant name, in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// How long a new connection may take to send its name.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Check a handshake name.
///
/// Names become directory names under the data root, so anything that could
/// escape or confuse a path is rejected.
///
/// # Errors
///
/// Returns `InvalidName` with a short reason.
pub fn validate_name(name: &str) -> Result<(), ServerError> {
    let reason = if name.trim().is_empty() {
        "name is empty"
    } else if name.len() > MAX_NAME_LEN {
        "name is too long"
    } else if name == SERVER_NAME {
        "name is reserved"
    } else if name.contains(['/', '\\']) || name.contains("..") {
        "name contains a path separator"
    } else if name.chars().any(char::is_control) {
        "name contains control characters"
    } else {
        return Ok(());
    };
    Err(ServerError::InvalidName(reason.to_string()))
}

/// Run the handshake on a fresh connection.
///
/// On success the participant is registered and the name is returned. On
/// failure the peer has been told why (when that makes sense) and the
/// connection is closing.
pub async fn perform_handshake<R>(
    reader: &mut FramedRead<R, LengthDelimitedCodec>,
    connection: &ConnectionActorHandle,
    room: &RoomActorHandle,
) -> Result<String, ServerError>
where
    R: AsyncRead + Unpin,
{
    let frame = match tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.next()).await {
        Ok(Some(Ok(frame))) if !frame.is_empty() => frame,
        Ok(Some(Ok(_)) | None) => {
            debug!(
                target: "huddle.control",
                peer = %connection.peer(),
                "Peer closed before sending a name"
            );
            metrics::record_handshake("failed");
            connection.cancel();
            return Err(ServerError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        Ok(Some(Err(e))) => {
            warn!(
                target: "huddle.control",
                peer = %connection.peer(),
                error = %e,
                "Handshake read failed"
            );
            metrics::record_handshake("failed");
            connection.cancel();
            return Err(ServerError::Io(e));
        }
        Err(_) => {
            warn!(
                target: "huddle.control",
                peer = %connection.peer(),
                timeout_secs = HANDSHAKE_TIMEOUT.as_secs(),
                "Handshake timed out"
            );
            metrics::record_handshake("failed");
            connection.cancel();
            return Err(ServerError::Io(std::io::ErrorKind::TimedOut.into()));
        }
    };

    let name = String::from_utf8(frame.to_vec())
        .map_err(|_| ServerError::InvalidName("name is not valid UTF-8".to_string()))
        .and_then(|name| validate_name(&name).map(|()| name));

    let name = match name {
        Ok(name) => name,
        Err(e) => {
            warn!(
                target: "huddle.control",
                peer = %connection.peer(),
                error = %e,
                "Handshake rejected"
            );
            metrics::record_handshake("invalid_name");
            reject(connection, &e).await;
            return Err(e);
        }
    };

    match room.join(name.clone(), connection.clone()).await {
        Ok(()) => {
            metrics::record_handshake("accepted");
            info!(
                target: "huddle.control",
                peer = %connection.peer(),
                name = %name,
                "Handshake accepted"
            );
            Ok(name)
        }
        Err(e @ ServerError::NameTaken(_)) => {
            info!(
                target: "huddle.control",
                peer = %connection.peer(),
                name = %name,
                "Handshake rejected, name taken"
            );
            metrics::record_handshake("name_taken");
            reject(connection, &e).await;
            Err(e)
        }
        Err(e) => {
            warn!(
                target: "huddle.control",
                peer = %connection.peer(),
                error = %e,
                "Room unavailable during handshake"
            );
            metrics::record_handshake("failed");
            connection.cancel();
            Err(e)
        }
    }
}

/// Tell the peer why, then close without a `DISCONNECT` envelope.
async fn reject(connection: &ConnectionActorHandle, error: &ServerError) {
    let message = Bytes::from(error.client_message());
    if connection.send(message).await.is_err() || connection.close(false).await.is_err() {
        connection.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["alice", "Bob Smith", "día", "user_42", "a.b"] {
            assert!(validate_name(name).is_ok(), "{name:?} should be accepted");
        }
    }

    #[test]
    fn test_invalid_names() {
        let too_long = "x".repeat(MAX_NAME_LEN + 1);
        for name in [
            "",
            "   ",
            "SERVER",
            "../etc",
            "a/b",
            "a\\b",
            "..",
            "tab\there",
            too_long.as_str(),
        ] {
            let err = validate_name(name).unwrap_err();
            assert!(
                matches!(err, ServerError::InvalidName(_)),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_name_at_length_limit_is_accepted() {
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
    }
}

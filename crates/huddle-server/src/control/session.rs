//! One control session: handshake, then the receive loop.
//!
//! The loop decodes one envelope per frame and dispatches it. It ends on a
//! clean close, a zero-length frame, a `DISCONNECT` envelope, a transport
//! error, or cancellation of the session token (server shutdown, or the
//! connection's writer failing). Whatever ends it, the room then runs
//! disconnect cleanup exactly once for this session.

use super::handshake::perform_handshake;
use super::ControlContext;
use crate::actors::room::server_notice;
use crate::actors::{ConnectionActor, ConnectionActorHandle};
use crate::errors::ServerError;
use crate::files::stream_download;
use crate::observability::metrics;

use futures_util::StreamExt;
use huddle_protocol::framing::control_codec;
use huddle_protocol::{
    decode_envelope, DownloadRequest, Envelope, MediaKind, Payload, RequestKind, SERVER_NAME,
};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Serve an accepted TCP connection until it ends.
pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: ControlContext,
    session_token: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(target: "huddle.control", peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }
    let (read_half, write_half) = stream.into_split();
    serve(read_half, write_half, peer.to_string(), context, session_token).await;
}

/// Serve one control connection over any byte stream halves.
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    peer: String,
    context: ControlContext,
    session_token: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let max_frame_len = context.config.max_control_frame_bytes;
    let (connection, writer_task) = ConnectionActor::spawn(
        peer,
        writer,
        max_frame_len,
        session_token.clone(),
    );
    let mut reader = FramedRead::new(reader, control_codec(max_frame_len));

    if let Ok(name) = perform_handshake(&mut reader, &connection, &context.room).await {
        let session = Session {
            name,
            connection,
            context,
            session_token,
        };
        session.run(reader).await;
    }

    // Let the writer flush whatever cleanup queued before the socket drops
    let _ = writer_task.await;
}

struct Session {
    name: String,
    connection: ConnectionActorHandle,
    context: ControlContext,
    session_token: CancellationToken,
}

impl Session {
    #[instrument(
        skip_all,
        name = "huddle.control.session",
        fields(name = %self.name, connection_id = %self.connection.connection_id())
    )]
    async fn run<R>(self, mut reader: FramedRead<R, LengthDelimitedCodec>)
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let frame = tokio::select! {
                () = self.session_token.cancelled() => {
                    debug!(target: "huddle.control", name = %self.name, "Session cancelled");
                    break;
                }
                frame = reader.next() => frame,
            };

            let frame = match frame {
                Some(Ok(frame)) if !frame.is_empty() => frame.freeze(),
                Some(Ok(_)) | None => {
                    debug!(target: "huddle.control", name = %self.name, "Peer closed control connection");
                    break;
                }
                Some(Err(e)) => {
                    warn!(
                        target: "huddle.control",
                        name = %self.name,
                        error = %e,
                        "Control read failed, ending session"
                    );
                    break;
                }
            };

            let mut envelope = match decode_envelope(&mut frame.clone()) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(
                        target: "huddle.control",
                        name = %self.name,
                        len = frame.len(),
                        error = %e,
                        "Undecodable control frame skipped"
                    );
                    metrics::record_decode_error("control");
                    continue;
                }
            };

            // The session name is authoritative, whatever the peer claims
            envelope.sender.clone_from(&self.name);

            if envelope.request == RequestKind::Disconnect {
                debug!(target: "huddle.control", name = %self.name, "Peer requested disconnect");
                break;
            }
            if let Err(e) = self.dispatch(envelope).await {
                warn!(
                    target: "huddle.control",
                    name = %self.name,
                    error = %e,
                    "Request handling failed"
                );
                if matches!(e, ServerError::Internal(_)) {
                    break;
                }
            }
        }

        match self
            .context
            .room
            .disconnect(self.name.clone(), self.connection.connection_id().to_string())
            .await
        {
            Ok(true) => {}
            Ok(false) | Err(_) => self.connection.cancel(),
        }

        info!(
            target: "huddle.control",
            name = %self.name,
            "Session ended"
        );
    }

    async fn dispatch(&self, envelope: Envelope) -> Result<(), ServerError> {
        match (envelope.request, envelope.media_kind) {
            (RequestKind::StartShare, _) => {
                self.context.room.start_share(self.name.clone()).await?;
                Ok(())
            }
            (RequestKind::StopShare, _) => {
                self.context.room.stop_share(self.name.clone()).await?;
                Ok(())
            }
            (RequestKind::Post, Some(MediaKind::File)) => self.handle_file_post(envelope).await,
            (RequestKind::GetFiles, _) => self.send_file_list().await,
            (RequestKind::DownloadFile, Some(MediaKind::File)) => {
                self.handle_download(&envelope.payload).await
            }
            _ => self.context.room.route(envelope).await,
        }
    }

    async fn handle_file_post(&self, envelope: Envelope) -> Result<(), ServerError> {
        let files = &self.context.files;

        match envelope.payload {
            Payload::Text(source_name) => {
                let recipients = self
                    .context
                    .room
                    .resolve_recipients(self.name.clone(), envelope.recipients)
                    .await?;
                files
                    .start_transfer(&self.name, &source_name, &recipients)
                    .await;
            }
            Payload::Binary(chunk) => {
                if !files.append_chunk(&self.name, &chunk).await {
                    warn!(
                        target: "huddle.files",
                        from = %self.name,
                        len = chunk.len(),
                        "Chunk with no upload in progress dropped"
                    );
                }
            }
            Payload::Empty => {
                if files.finish_transfer(&self.name).await.is_none() {
                    warn!(
                        target: "huddle.files",
                        from = %self.name,
                        "End marker with no upload in progress ignored"
                    );
                }
            }
            other => {
                warn!(
                    target: "huddle.files",
                    from = %self.name,
                    payload = other.kind_name(),
                    "Unexpected file payload ignored"
                );
            }
        }
        Ok(())
    }

    async fn send_file_list(&self) -> Result<(), ServerError> {
        let listing = self.context.files.list_files(&self.name).await;
        let reply = Envelope::new(SERVER_NAME, RequestKind::FileList)
            .with_media(MediaKind::File)
            .with_payload(Payload::from_records(&listing)?);
        self.connection.send_envelope(&reply).await
    }

    async fn handle_download(&self, payload: &Payload) -> Result<(), ServerError> {
        let files = &self.context.files;

        let request: DownloadRequest = match payload.to_record() {
            Ok(request) => request,
            Err(e) => {
                let err = ServerError::InvalidRequest(e.to_string());
                metrics::record_file_download("invalid", 0, std::time::Duration::ZERO);
                return self.notify(&err).await;
            }
        };

        let entry = match files
            .resolve_download(&self.name, &request.transfer_id)
            .await
        {
            Ok(entry) => entry,
            Err(err) => {
                metrics::record_file_download("not_found", 0, std::time::Duration::ZERO);
                return self.notify(&err).await;
            }
        };

        let config = &self.context.config;
        stream_download(
            &self.connection,
            &entry,
            config.download_chunk_bytes,
            config.download_pacing(),
        )
        .await
        .map(|_| ())
    }

    async fn notify(&self, error: &ServerError) -> Result<(), ServerError> {
        debug!(
            target: "huddle.control",
            name = %self.name,
            error = %error,
            "Request rejected"
        );
        self.connection
            .send_envelope(&server_notice(error.client_message()))
            .await
    }
}

//! `ConnectionActor` - per-control-connection writer.
//!
//! Each `ConnectionActor`:
//! - Exclusively owns the write half of one control connection
//! - Drains a bounded mailbox of pre-encoded frames in order
//! - Cancels its session token when a write fails, so the receive loop ends
//!   and the room runs disconnect cleanup
//!
//! # Lifecycle
//!
//! 1. Spawned by the control listener right after accept, before the handshake
//! 2. Runs until closed, cancelled, or a write fails
//! 3. Cancellation comes from the server's root token or from the room

use super::messages::ConnectionMessage;
use super::metrics::{ActorType, MailboxMonitor};
use crate::errors::ServerError;
use crate::observability::metrics;

use bytes::Bytes;
use futures_util::SinkExt;
use huddle_protocol::{encode_envelope, Envelope, RequestKind, SERVER_NAME};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 1024;

/// Upper bound on the farewell write when closing.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a non-blocking delivery did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Mailbox is full; the frame was dropped.
    #[error("connection mailbox full")]
    Full,
    /// The connection is gone.
    #[error("connection closed")]
    Closed,
}

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: String,
    peer: String,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActorHandle {
    /// Get the connection ID.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Get the peer label (remote address) used in logs.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue a frame without waiting.
    ///
    /// Used by the room for fan-out so one slow participant never stalls
    /// delivery to the others.
    pub fn try_deliver(&self, frame: Bytes) -> Result<(), DeliveryError> {
        if self.cancel_token.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        match self.sender.try_send(ConnectionMessage::Frame { frame }) {
            Ok(()) => {
                self.mailbox.record_enqueue();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.mailbox.record_drop();
                Err(DeliveryError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Queue a frame, waiting for mailbox capacity.
    ///
    /// Used for replies to this connection's own requests (file lists,
    /// download streams), where waiting is the back-pressure.
    pub async fn send(&self, frame: Bytes) -> Result<(), ServerError> {
        self.enqueue(ConnectionMessage::Frame { frame }).await
    }

    /// Encode and queue an envelope, waiting for mailbox capacity.
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<(), ServerError> {
        let frame = encode_envelope(envelope)?;
        self.send(frame).await
    }

    /// Close the connection after all previously queued frames.
    pub async fn close(&self, notify_peer: bool) -> Result<(), ServerError> {
        self.enqueue(ConnectionMessage::Close { notify_peer }).await
    }

    /// Close without waiting; falls back to cancellation if the mailbox is full.
    pub fn try_close(&self, notify_peer: bool) {
        match self.sender.try_send(ConnectionMessage::Close { notify_peer }) {
            Ok(()) => self.mailbox.record_enqueue(),
            Err(_) => self.cancel_token.cancel(),
        }
    }

    /// Ping the connection; resolves once everything queued earlier was written.
    pub async fn ping(&self) -> Result<(), ServerError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.enqueue(ConnectionMessage::Ping { respond_to: tx }).await?;

        rx.await
            .map_err(|e| ServerError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn enqueue(&self, message: ConnectionMessage) -> Result<(), ServerError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| ServerError::Internal(format!("channel send failed: {e}")))?;
        self.mailbox.record_enqueue();
        Ok(())
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor<W> {
    connection_id: String,
    peer: String,
    writer: FramedWrite<W, LengthDelimitedCodec>,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Session token, shared with the receive loop.
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    is_closing: bool,
    write_failed: bool,
}

impl<W> ConnectionActor<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Spawn a new connection actor over `writer`.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        peer: String,
        writer: W,
        max_frame_len: usize,
        cancel_token: CancellationToken,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let connection_id = uuid::Uuid::new_v4().to_string();
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Connection, &connection_id));

        metrics::control_connection_opened();

        let actor = Self {
            connection_id: connection_id.clone(),
            peer: peer.clone(),
            writer: FramedWrite::new(
                writer,
                huddle_protocol::framing::control_codec(max_frame_len),
            ),
            receiver,
            cancel_token: cancel_token.clone(),
            mailbox: Arc::clone(&mailbox),
            is_closing: false,
            write_failed: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
            peer,
            mailbox,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "huddle.actor.connection",
        fields(connection_id = %self.connection_id, peer = %self.peer)
    )]
    async fn run(mut self) {
        debug!(
            target: "huddle.actor.connection",
            connection_id = %self.connection_id,
            peer = %self.peer,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "huddle.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    let notify_peer = !self.write_failed;
                    self.graceful_close(notify_peer).await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "huddle.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            self.graceful_close(false).await;
                            break;
                        }
                    }
                }
            }
        }

        // Whatever ended the writer also ends the receive loop
        self.cancel_token.cancel();
        metrics::control_connection_closed();

        info!(
            target: "huddle.actor.connection",
            connection_id = %self.connection_id,
            peer = %self.peer,
            messages_processed = self.mailbox.messages_processed(),
            write_failed = self.write_failed,
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Frame { frame } => self.handle_frame(frame).await,

            ConnectionMessage::Close { notify_peer } => {
                self.graceful_close(notify_peer).await;
                true
            }

            ConnectionMessage::Ping { respond_to } => {
                let _ = respond_to.send(());
                false
            }
        }
    }

    async fn handle_frame(&mut self, frame: Bytes) -> bool {
        if self.is_closing {
            warn!(
                target: "huddle.actor.connection",
                connection_id = %self.connection_id,
                "Attempted to send frame while closing"
            );
            return false;
        }

        let frame_len = frame.len();
        match self.writer.send(frame).await {
            Ok(()) => false,
            Err(e) => {
                warn!(
                    target: "huddle.actor.connection",
                    connection_id = %self.connection_id,
                    peer = %self.peer,
                    frame_len = frame_len,
                    error = %e,
                    "Control write failed, closing connection"
                );
                metrics::record_control_delivery_dropped("write_failed");
                self.write_failed = true;
                true
            }
        }
    }

    /// Gracefully close the connection.
    async fn graceful_close(&mut self, notify_peer: bool) {
        if self.is_closing {
            return;
        }

        self.is_closing = true;

        debug!(
            target: "huddle.actor.connection",
            connection_id = %self.connection_id,
            notify_peer = notify_peer,
            "Closing connection"
        );

        if notify_peer {
            match encode_envelope(&Envelope::new(SERVER_NAME, RequestKind::Disconnect)) {
                Ok(frame) => {
                    if let Ok(Err(e)) =
                        tokio::time::timeout(CLOSE_TIMEOUT, self.writer.send(frame)).await
                    {
                        debug!(
                            target: "huddle.actor.connection",
                            connection_id = %self.connection_id,
                            error = %e,
                            "Failed to send disconnect notice"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        target: "huddle.actor.connection",
                        error = %e,
                        "Failed to encode disconnect notice"
                    );
                }
            }
        }

        let _ = tokio::time::timeout(CLOSE_TIMEOUT, SinkExt::<Bytes>::close(&mut self.writer))
            .await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use huddle_protocol::decode_envelope;
    use huddle_protocol::framing::{control_codec, MAX_CONTROL_FRAME_LEN};
    use tokio::io::DuplexStream;
    use tokio_util::codec::FramedRead;

    fn spawn_actor() -> (
        ConnectionActorHandle,
        JoinHandle<()>,
        FramedRead<DuplexStream, LengthDelimitedCodec>,
        CancellationToken,
    ) {
        let (ours, theirs) = tokio::io::duplex(4096);
        let cancel_token = CancellationToken::new();
        let (handle, task) = ConnectionActor::spawn(
            "test-peer".to_string(),
            ours,
            MAX_CONTROL_FRAME_LEN,
            cancel_token.clone(),
        );
        let reader = FramedRead::new(theirs, control_codec(MAX_CONTROL_FRAME_LEN));
        (handle, task, reader, cancel_token)
    }

    #[tokio::test]
    async fn test_frames_are_written_in_order() {
        let (handle, _task, mut reader, _token) = spawn_actor();

        handle.try_deliver(Bytes::from_static(b"OK")).unwrap();
        handle.send(Bytes::from_static(b"second")).await.unwrap();
        handle.ping().await.unwrap();

        assert_eq!(reader.next().await.unwrap().unwrap().as_ref(), b"OK");
        assert_eq!(reader.next().await.unwrap().unwrap().as_ref(), b"second");
    }

    #[tokio::test]
    async fn test_close_sends_disconnect_notice() {
        let (handle, task, mut reader, token) = spawn_actor();

        handle.close(true).await.unwrap();
        task.await.unwrap();

        let frame = reader.next().await.unwrap().unwrap();
        let envelope = decode_envelope(&mut frame.freeze()).unwrap();
        assert_eq!(envelope.sender, SERVER_NAME);
        assert_eq!(envelope.request, RequestKind::Disconnect);

        assert!(reader.next().await.is_none());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_close_without_notice() {
        let (handle, task, mut reader, _token) = spawn_actor();

        handle.send(Bytes::from_static(b"Username already taken")).await.unwrap();
        handle.close(false).await.unwrap();
        task.await.unwrap();

        assert_eq!(
            reader.next().await.unwrap().unwrap().as_ref(),
            b"Username already taken"
        );
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_deliver_after_cancel_reports_closed() {
        let (handle, task, _reader, _token) = spawn_actor();

        handle.cancel();
        task.await.unwrap();

        assert_eq!(
            handle.try_deliver(Bytes::from_static(b"late")),
            Err(DeliveryError::Closed)
        );
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_write_failure_cancels_session() {
        let (ours, theirs) = tokio::io::duplex(64);
        let cancel_token = CancellationToken::new();
        let (handle, task) = ConnectionActor::spawn(
            "gone-peer".to_string(),
            ours,
            MAX_CONTROL_FRAME_LEN,
            cancel_token.clone(),
        );
        drop(theirs);

        handle.try_deliver(Bytes::from_static(b"into the void")).unwrap();
        task.await.unwrap();

        assert!(cancel_token.is_cancelled());
        assert!(handle.is_cancelled());
        assert_eq!(
            handle.try_deliver(Bytes::from_static(b"again")),
            Err(DeliveryError::Closed)
        );
    }
}

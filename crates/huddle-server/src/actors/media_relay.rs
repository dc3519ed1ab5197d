//! Media relays - one UDP receive loop per media kind.
//!
//! A relay learns where a participant receives media from that participant's
//! `ADD` datagram, and hands every other datagram to the room for fan-out.
//! Sending goes through [`MediaSender`], which the room holds.

use super::room::RoomActorHandle;
use crate::observability::metrics;

use bytes::{Bytes, BytesMut};
use huddle_protocol::{decode_envelope, MediaKind, RequestKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Non-blocking sending side of one media channel.
#[derive(Clone, Debug)]
pub struct MediaSender {
    kind: MediaKind,
    socket: Arc<UdpSocket>,
}

impl MediaSender {
    #[must_use]
    pub fn new(kind: MediaKind, socket: Arc<UdpSocket>) -> Self {
        Self { kind, socket }
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Send one datagram without waiting. Returns `false` if it was dropped.
    pub fn try_send_to(&self, datagram: &[u8], target: SocketAddr) -> bool {
        match self.socket.try_send_to(datagram, target) {
            Ok(_) => true,
            Err(e) => {
                debug!(
                    target: "huddle.media",
                    kind = %self.kind,
                    target_addr = %target,
                    len = datagram.len(),
                    error = %e,
                    "Media datagram dropped on send"
                );
                false
            }
        }
    }
}

/// Senders for both media kinds.
#[derive(Clone, Debug)]
pub struct MediaSenders {
    pub video: MediaSender,
    pub audio: MediaSender,
}

impl MediaSenders {
    /// Sender for `kind`, or `None` for non-media kinds.
    #[must_use]
    pub fn for_kind(&self, kind: MediaKind) -> Option<&MediaSender> {
        match kind {
            MediaKind::Video => Some(&self.video),
            MediaKind::Audio => Some(&self.audio),
            MediaKind::Text | MediaKind::Screen | MediaKind::File => None,
        }
    }
}

/// Receive loop for one media kind.
pub struct MediaRelay {
    kind: MediaKind,
    socket: Arc<UdpSocket>,
    max_datagram: usize,
    room: RoomActorHandle,
    cancel_token: CancellationToken,
}

impl MediaRelay {
    /// Spawn the receive loop on an already-bound socket.
    pub fn spawn(
        kind: MediaKind,
        socket: Arc<UdpSocket>,
        max_datagram: usize,
        room: RoomActorHandle,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let relay = Self {
            kind,
            socket,
            max_datagram,
            room,
            cancel_token,
        };
        tokio::spawn(relay.run())
    }

    #[instrument(skip_all, name = "huddle.media.relay", fields(kind = %self.kind))]
    async fn run(self) {
        info!(
            target: "huddle.media",
            kind = %self.kind,
            addr = ?self.socket.local_addr().ok(),
            max_datagram = self.max_datagram,
            "Media relay started"
        );

        // One spare byte so an oversized datagram is detectable rather than
        // silently truncated to exactly the limit.
        let mut buf = BytesMut::with_capacity(self.max_datagram + 1);

        loop {
            buf.clear();
            buf.reserve(self.max_datagram + 1);

            let received = tokio::select! {
                () = self.cancel_token.cancelled() => break,
                result = self.socket.recv_buf_from(&mut buf) => result,
            };

            match received {
                Ok((len, from)) => {
                    let datagram = buf.split().freeze();
                    self.handle_datagram(datagram, len, from).await;
                }
                Err(e) => {
                    // ICMP errors from earlier sends surface here; keep serving
                    debug!(
                        target: "huddle.media",
                        kind = %self.kind,
                        error = %e,
                        "Media receive error"
                    );
                }
            }
        }

        info!(target: "huddle.media", kind = %self.kind, "Media relay stopped");
    }

    async fn handle_datagram(&self, datagram: Bytes, len: usize, from: SocketAddr) {
        let kind_label = self.kind.as_str();

        if len > self.max_datagram {
            warn!(
                target: "huddle.media",
                kind = %self.kind,
                from = %from,
                len = len,
                max = self.max_datagram,
                "Oversized media datagram dropped"
            );
            metrics::record_media_datagram(kind_label, "oversized");
            return;
        }

        let envelope = match decode_envelope(&mut datagram.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    target: "huddle.media",
                    kind = %self.kind,
                    from = %from,
                    len = len,
                    error = %e,
                    "Undecodable media datagram dropped"
                );
                metrics::record_decode_error(kind_label);
                metrics::record_media_datagram(kind_label, "undecodable");
                return;
            }
        };

        if envelope.request == RequestKind::Add {
            if let Err(e) = self
                .room
                .register_media(envelope.sender, self.kind, from)
                .await
            {
                warn!(target: "huddle.media", error = %e, "Room unavailable for media registration");
            }
            return;
        }

        if self.room.try_relay_media(envelope.sender, self.kind, datagram) {
            metrics::record_media_datagram(kind_label, "relayed");
        } else {
            metrics::record_media_datagram(kind_label, "dropped");
        }
    }
}

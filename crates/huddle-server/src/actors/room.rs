//! `RoomActor` - owns presence, the presenter lock, and all fan-out.
//!
//! The room is a singleton. Every read or mutation of the session registry
//! and presenter cell is a message to it, so those operations are serialized
//! without locks. The room never performs socket I/O on the control channel:
//! it hands pre-encoded frames to each recipient's `ConnectionActor` with a
//! non-blocking enqueue. Media fan-out is a non-blocking `try_send_to`.
//!
//! # Delivery failures
//!
//! A recipient whose connection is closed is marked disconnected and its
//! session is cancelled; delivery to everyone else continues. A recipient
//! whose mailbox is full loses that one frame.

use super::connection::{ConnectionActorHandle, DeliveryError};
use super::media_relay::MediaSenders;
use super::messages::{ParticipantInfo, RoomMessage, RoomState};
use super::metrics::{ActorType, MailboxMonitor};
use crate::errors::ServerError;
use crate::observability::metrics;
use crate::presenter::{PresenterLock, StartOutcome, StopOutcome};
use crate::registry::SessionRegistry;

use bytes::Bytes;
use huddle_protocol::{
    encode_envelope, Envelope, MediaKind, RequestKind, HANDSHAKE_OK, SERVER_NAME,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 1000;

/// Notice sent when the presenter role is held by someone else.
pub const SHARE_BUSY_NOTICE: &str = "Screen sharing already active by another user";

/// Notice sent when a non-presenter asks to stop sharing.
pub const NOT_PRESENTER_NOTICE: &str = "You are not the current presenter";

/// Plain-text notice from the server to one participant.
#[must_use]
pub fn server_notice(text: impl Into<String>) -> Envelope {
    Envelope::new(SERVER_NAME, RequestKind::Post)
        .with_media(MediaKind::Text)
        .with_text(text)
}

/// Handle to the `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActorHandle {
    /// Register `name` and sync presence.
    ///
    /// On success the new participant has been sent `OK`, then one `ADD` per
    /// existing participant, and everyone else has been sent its `ADD`.
    pub async fn join(
        &self,
        name: String,
        connection: ConnectionActorHandle,
    ) -> Result<(), ServerError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(RoomMessage::Join {
            name,
            connection,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| ServerError::Internal(format!("response receive failed: {e}")))?
    }

    /// Deliver an envelope from a registered participant.
    pub async fn route(&self, envelope: Envelope) -> Result<(), ServerError> {
        self.enqueue(RoomMessage::Route { envelope }).await
    }

    pub async fn start_share(&self, name: String) -> Result<StartOutcome, ServerError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(RoomMessage::StartShare {
            name,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| ServerError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn stop_share(&self, name: String) -> Result<StopOutcome, ServerError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(RoomMessage::StopShare {
            name,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| ServerError::Internal(format!("response receive failed: {e}")))
    }

    /// Record where `name` receives `kind` media.
    pub async fn register_media(
        &self,
        name: String,
        kind: MediaKind,
        address: SocketAddr,
    ) -> Result<(), ServerError> {
        self.enqueue(RoomMessage::RegisterMedia {
            name,
            kind,
            address,
        })
        .await
    }

    /// Hand a media datagram to the room without waiting.
    ///
    /// Returns `false` if the room is saturated or gone; media is lossy, so
    /// the datagram is simply dropped.
    pub fn try_relay_media(&self, sender: String, kind: MediaKind, datagram: Bytes) -> bool {
        match self.sender.try_send(RoomMessage::RelayMedia {
            sender,
            kind,
            datagram,
        }) {
            Ok(()) => {
                self.mailbox.record_enqueue();
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.mailbox.record_drop();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Resolve upload recipients: `requested` filtered to present names, or
    /// everyone except `sender` when `requested` is empty.
    pub async fn resolve_recipients(
        &self,
        sender: String,
        requested: Vec<String>,
    ) -> Result<Vec<String>, ServerError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(RoomMessage::ResolveRecipients {
            sender,
            requested,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| ServerError::Internal(format!("response receive failed: {e}")))
    }

    /// Run disconnect cleanup for one session. Returns `false` if there was
    /// nothing to clean up (already removed, or superseded by a newer session).
    pub async fn disconnect(
        &self,
        name: String,
        connection_id: String,
    ) -> Result<bool, ServerError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(RoomMessage::Disconnect {
            name,
            connection_id,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| ServerError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn get_state(&self) -> Result<RoomState, ServerError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(RoomMessage::GetState { respond_to: tx })
            .await?;
        rx.await
            .map_err(|e| ServerError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn enqueue(&self, message: RoomMessage) -> Result<(), ServerError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| ServerError::Internal(format!("channel send failed: {e}")))?;
        self.mailbox.record_enqueue();
        Ok(())
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    registry: SessionRegistry,
    presenter: PresenterLock,
    media: MediaSenders,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActor {
    /// Spawn the room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        media: MediaSenders,
        cancel_token: CancellationToken,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Room, "room"));

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            registry: SessionRegistry::new(),
            presenter: PresenterLock::new(),
            media,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "huddle.actor.room")]
    async fn run(mut self) {
        info!(target: "huddle.actor.room", "RoomActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "huddle.actor.room", "RoomActor received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            debug!(target: "huddle.actor.room", "RoomActor channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        // Tell everyone still connected that the server is going away
        for name in self.registry.names() {
            if let Some(session) = self.registry.lookup(&name) {
                session.connection().try_close(true);
            }
        }

        info!(
            target: "huddle.actor.room",
            participants = self.registry.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                name,
                connection,
                respond_to,
            } => {
                let result = self.handle_join(&name, connection);
                let _ = respond_to.send(result);
            }

            RoomMessage::Route { envelope } => self.multicast(&envelope),

            RoomMessage::StartShare { name, respond_to } => {
                let outcome = self.handle_start_share(&name);
                let _ = respond_to.send(outcome);
            }

            RoomMessage::StopShare { name, respond_to } => {
                let outcome = self.handle_stop_share(&name);
                let _ = respond_to.send(outcome);
            }

            RoomMessage::RegisterMedia {
                name,
                kind,
                address,
            } => self.handle_register_media(&name, kind, address),

            RoomMessage::RelayMedia {
                sender,
                kind,
                datagram,
            } => {
                let targets = self.targets_except(&sender);
                self.send_media(kind, &targets, &datagram);
            }

            RoomMessage::ResolveRecipients {
                sender,
                requested,
                respond_to,
            } => {
                let recipients = if requested.is_empty() {
                    self.targets_except(&sender)
                } else {
                    self.targets_named(&requested)
                };
                let _ = respond_to.send(recipients);
            }

            RoomMessage::Disconnect {
                name,
                connection_id,
                respond_to,
            } => {
                let cleaned = self.handle_disconnect(&name, &connection_id);
                let _ = respond_to.send(cleaned);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    fn handle_join(
        &mut self,
        name: &str,
        connection: ConnectionActorHandle,
    ) -> Result<(), ServerError> {
        self.registry.register(name, connection)?;

        self.deliver_frame(name, Bytes::from_static(HANDSHAKE_OK.as_bytes()));

        // Seed the newcomer's view before anyone learns of it
        for existing in self.targets_except(name) {
            self.deliver_envelope(name, &Envelope::new(existing, RequestKind::Add));
        }
        self.broadcast_except(name, &Envelope::new(name, RequestKind::Add));

        metrics::set_participants_active(self.registry.len());
        info!(
            target: "huddle.actor.room",
            name = %name,
            participants = self.registry.len(),
            "Participant joined"
        );
        Ok(())
    }

    fn handle_start_share(&mut self, name: &str) -> StartOutcome {
        let outcome = self.presenter.try_start(name);
        let started = Envelope::new(SERVER_NAME, RequestKind::StartShare)
            .with_media(MediaKind::Screen)
            .with_text(name);

        match outcome {
            StartOutcome::Started => {
                self.deliver_envelope(name, &started);
                self.broadcast_except(name, &started);
                info!(target: "huddle.actor.room", presenter = %name, "Screen share started");
            }
            StartOutcome::Busy => {
                self.deliver_envelope(name, &server_notice(SHARE_BUSY_NOTICE));
                debug!(target: "huddle.actor.room", requester = %name, "Screen share rejected");
            }
        }
        outcome
    }

    fn handle_stop_share(&mut self, name: &str) -> StopOutcome {
        let outcome = self.presenter.stop(name);
        match outcome {
            StopOutcome::Stopped => {
                self.broadcast_except(SERVER_NAME, &stop_notice());
                info!(target: "huddle.actor.room", presenter = %name, "Screen share stopped");
            }
            StopOutcome::NotPresenter => {
                self.deliver_envelope(name, &server_notice(NOT_PRESENTER_NOTICE));
            }
        }
        outcome
    }

    fn handle_register_media(&mut self, name: &str, kind: MediaKind, address: SocketAddr) {
        if self.registry.set_media_address(name, kind, address) {
            metrics::record_media_datagram(kind.as_str(), "registered");
            info!(
                target: "huddle.actor.room",
                name = %name,
                kind = %kind,
                address = %address,
                "Media endpoint registered"
            );
        } else {
            metrics::record_media_datagram(kind.as_str(), "unknown_sender");
            warn!(
                target: "huddle.actor.room",
                name = %name,
                kind = %kind,
                address = %address,
                "Media registration from unknown participant dropped"
            );
        }
    }

    /// Cleanup steps run in order, each regardless of the others.
    fn handle_disconnect(&mut self, name: &str, connection_id: &str) -> bool {
        let Some(connection) = self
            .registry
            .lookup(name)
            .map(|session| session.connection().clone())
        else {
            return false;
        };
        if connection.connection_id() != connection_id {
            debug!(
                target: "huddle.actor.room",
                name = %name,
                "Ignoring disconnect for superseded session"
            );
            return false;
        }

        if self.presenter.release_if(name) {
            self.broadcast_except(name, &stop_notice());
            info!(target: "huddle.actor.room", presenter = %name, "Presenter left, screen share stopped");
        }
        self.registry.clear_media(name);
        self.registry.mark_disconnected(name);
        self.broadcast_except(name, &Envelope::new(name, RequestKind::Remove));
        connection.try_close(true);
        self.registry.remove(name);

        metrics::set_participants_active(self.registry.len());
        info!(
            target: "huddle.actor.room",
            name = %name,
            participants = self.registry.len(),
            "Participant left"
        );
        true
    }

    /// Deliver to `envelope.recipients`, or to everyone but the sender if empty.
    fn multicast(&mut self, envelope: &Envelope) {
        let targets = if envelope.is_broadcast() {
            self.targets_except(&envelope.sender)
        } else {
            self.targets_named(&envelope.recipients)
        };
        self.deliver_to(&targets, envelope);
    }

    fn broadcast_except(&mut self, excluded: &str, envelope: &Envelope) {
        let targets = self.targets_except(excluded);
        self.deliver_to(&targets, envelope);
    }

    /// Encode once, then deliver over the channel matching the media kind.
    fn deliver_to(&mut self, targets: &[String], envelope: &Envelope) {
        let encoded = match encode_envelope(envelope) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(
                    target: "huddle.actor.room",
                    sender = %envelope.sender,
                    request = %envelope.request,
                    error = %e,
                    "Failed to encode envelope for delivery"
                );
                return;
            }
        };

        match envelope.media_kind {
            Some(kind) if kind.is_media() => self.send_media(kind, targets, &encoded),
            _ => {
                for target in targets {
                    self.deliver_frame(target, encoded.clone());
                }
            }
        }
    }

    fn deliver_envelope(&mut self, target: &str, envelope: &Envelope) {
        self.deliver_to(&[target.to_string()], envelope);
    }

    /// Hand one control frame to one recipient, recording failures.
    fn deliver_frame(&mut self, target: &str, frame: Bytes) {
        let Some(session) = self.registry.lookup(target) else {
            return;
        };
        if !session.is_connected() {
            return;
        }

        match session.connection().try_deliver(frame) {
            Ok(()) => {}
            Err(DeliveryError::Full) => {
                metrics::record_control_delivery_dropped("mailbox_full");
                warn!(
                    target: "huddle.actor.room",
                    recipient = %target,
                    "Recipient mailbox full, frame dropped"
                );
            }
            Err(DeliveryError::Closed) => {
                metrics::record_control_delivery_dropped("closed");
                session.connection().cancel();
                self.registry.mark_disconnected(target);
                warn!(
                    target: "huddle.actor.room",
                    recipient = %target,
                    "Recipient connection closed, marked disconnected"
                );
            }
        }
    }

    fn send_media(&self, kind: MediaKind, targets: &[String], datagram: &[u8]) {
        let Some(sender) = self.media.for_kind(kind) else {
            return;
        };
        for target in targets {
            // Recipients without a registered endpoint are skipped
            let address = self
                .registry
                .lookup(target)
                .filter(|session| session.is_connected())
                .and_then(|session| session.media().get(kind));
            if let Some(address) = address {
                sender.try_send_to(datagram, address);
            }
        }
    }

    /// Connected participants other than `excluded`, sorted.
    fn targets_except(&self, excluded: &str) -> Vec<String> {
        let mut targets = Vec::with_capacity(self.registry.len());
        self.registry.for_each_except(excluded, |session| {
            if session.is_connected() {
                targets.push(session.name().to_string());
            }
        });
        targets.sort();
        targets
    }

    /// Connected participants named in `requested`, deduplicated, in request order.
    fn targets_named(&self, requested: &[String]) -> Vec<String> {
        let mut targets: Vec<String> = Vec::with_capacity(requested.len());
        for name in requested {
            let present = self
                .registry
                .lookup(name)
                .is_some_and(|session| session.is_connected());
            if present && !targets.contains(name) {
                targets.push(name.clone());
            }
        }
        targets
    }

    fn snapshot(&self) -> RoomState {
        let participants = self
            .registry
            .names()
            .into_iter()
            .filter_map(|name| {
                self.registry.lookup(&name).map(|session| ParticipantInfo {
                    name: session.name().to_string(),
                    connected: session.is_connected(),
                    media: *session.media(),
                })
            })
            .collect();

        RoomState {
            participants,
            presenter: self.presenter.current().map(str::to_string),
        }
    }
}

fn stop_notice() -> Envelope {
    Envelope::new(SERVER_NAME, RequestKind::StopShare).with_media(MediaKind::Screen)
}

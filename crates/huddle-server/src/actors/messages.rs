//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use super::connection::ConnectionActorHandle;
use crate::errors::ServerError;
use crate::presenter::{StartOutcome, StopOutcome};
use crate::registry::MediaAddresses;
use bytes::Bytes;
use huddle_protocol::{Envelope, MediaKind};
use std::net::SocketAddr;
use tokio::sync::oneshot;

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// A handshake completed; register the name and sync presence.
    Join {
        name: String,
        connection: ConnectionActorHandle,
        /// Response channel for the registration result.
        respond_to: oneshot::Sender<Result<(), ServerError>>,
    },

    /// Deliver an envelope from a registered participant.
    ///
    /// `envelope.sender` is the authenticated session name.
    Route { envelope: Envelope },

    /// Participant asks for the presenter role.
    StartShare {
        name: String,
        respond_to: oneshot::Sender<StartOutcome>,
    },

    /// Participant gives up the presenter role.
    StopShare {
        name: String,
        respond_to: oneshot::Sender<StopOutcome>,
    },

    /// A media relay saw an `ADD` from `name` at `address`.
    RegisterMedia {
        name: String,
        kind: MediaKind,
        address: SocketAddr,
    },

    /// A media relay received a datagram to fan out.
    RelayMedia {
        sender: String,
        kind: MediaKind,
        /// The datagram exactly as received.
        datagram: Bytes,
    },

    /// Resolve the recipients of an upload.
    ResolveRecipients {
        sender: String,
        /// Requested names; empty means everyone except `sender`.
        requested: Vec<String>,
        respond_to: oneshot::Sender<Vec<String>>,
    },

    /// A session's receive loop ended.
    Disconnect {
        name: String,
        /// Identifies the session, so a stale disconnect cannot evict a
        /// newer session that reused the name.
        connection_id: String,
        /// Responds `true` if cleanup ran, `false` if there was nothing to do.
        respond_to: oneshot::Sender<bool>,
    },

    /// Get a snapshot of room state.
    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Write one control frame (length prefix added by the codec).
    Frame { frame: Bytes },

    /// Close the connection after everything queued before this message.
    Close {
        /// Send a `DISCONNECT` envelope from the server before closing.
        notify_peer: bool,
    },

    /// Ping; answered after every earlier message has been written.
    Ping { respond_to: oneshot::Sender<()> },
}

/// Snapshot of room state.
#[derive(Debug, Clone, Default)]
pub struct RoomState {
    /// Registered participants, sorted by name.
    pub participants: Vec<ParticipantInfo>,
    /// Current presenter, if any.
    pub presenter: Option<String>,
}

impl RoomState {
    /// Look up one participant by name.
    #[must_use]
    pub fn participant(&self, name: &str) -> Option<&ParticipantInfo> {
        self.participants.iter().find(|p| p.name == name)
    }

    /// Names of all registered participants.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.name.as_str()).collect()
    }
}

/// Public view of one participant session.
#[derive(Debug, Clone)]
pub struct ParticipantInfo {
    pub name: String,
    pub connected: bool,
    pub media: MediaAddresses,
}

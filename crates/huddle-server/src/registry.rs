//! Session registry: the authoritative record of who is present.
//!
//! Owned exclusively by the room actor, which serializes every access.

use crate::actors::ConnectionActorHandle;
use crate::errors::ServerError;
use huddle_protocol::MediaKind;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Where a participant receives each media kind.
///
/// One slot per media kind. Populated only when the matching media relay
/// receives an `ADD` from the participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaAddresses {
    pub video: Option<SocketAddr>,
    pub audio: Option<SocketAddr>,
}

impl MediaAddresses {
    /// Address for `kind`, or `None` if unknown or not a media kind.
    #[must_use]
    pub const fn get(&self, kind: MediaKind) -> Option<SocketAddr> {
        match kind {
            MediaKind::Video => self.video,
            MediaKind::Audio => self.audio,
            MediaKind::Text | MediaKind::Screen | MediaKind::File => None,
        }
    }

    /// Record the address for `kind`. Returns `false` for non-media kinds.
    pub fn set(&mut self, kind: MediaKind, address: SocketAddr) -> bool {
        match kind {
            MediaKind::Video => self.video = Some(address),
            MediaKind::Audio => self.audio = Some(address),
            MediaKind::Text | MediaKind::Screen | MediaKind::File => return false,
        }
        true
    }

    pub fn clear(&mut self) {
        self.video = None;
        self.audio = None;
    }
}

/// One registered participant.
#[derive(Debug)]
pub struct ParticipantSession {
    name: String,
    connection: ConnectionActorHandle,
    connected: bool,
    media: MediaAddresses,
}

impl ParticipantSession {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionActorHandle {
        &self.connection
    }

    /// False once a delivery failed or disconnect cleanup started.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    #[must_use]
    pub fn media(&self) -> &MediaAddresses {
        &self.media
    }
}

/// Map of participant name to session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, ParticipantSession>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`. Fails if the name is already present.
    pub fn register(
        &mut self,
        name: &str,
        connection: ConnectionActorHandle,
    ) -> Result<&ParticipantSession, ServerError> {
        use std::collections::hash_map::Entry;

        match self.sessions.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ServerError::NameTaken(name.to_string())),
            Entry::Vacant(slot) => Ok(slot.insert(ParticipantSession {
                name: name.to_string(),
                connection,
                connected: true,
                media: MediaAddresses::default(),
            })),
        }
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&ParticipantSession> {
        self.sessions.get(name)
    }

    /// Visit every session except `excluded`.
    pub fn for_each_except<F>(&self, excluded: &str, mut f: F)
    where
        F: FnMut(&ParticipantSession),
    {
        self.sessions
            .values()
            .filter(|session| session.name != excluded)
            .for_each(|session| f(session));
    }

    /// Remove `name`. Removing an absent name is a no-op.
    pub fn remove(&mut self, name: &str) -> Option<ParticipantSession> {
        self.sessions.remove(name)
    }

    /// Record a media address. Returns `false` if `name` is not registered
    /// and connected, or `kind` is not a media kind.
    pub fn set_media_address(&mut self, name: &str, kind: MediaKind, address: SocketAddr) -> bool {
        match self.sessions.get_mut(name) {
            Some(session) if session.connected => session.media.set(kind, address),
            _ => false,
        }
    }

    pub fn clear_media(&mut self, name: &str) {
        if let Some(session) = self.sessions.get_mut(name) {
            session.media.clear();
        }
    }

    pub fn mark_disconnected(&mut self, name: &str) {
        if let Some(session) = self.sessions.get_mut(name) {
            session.connected = false;
        }
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

//! Mailbox depth tracking for the room and connection actors.
//!
//! The room mailbox carries every routed envelope and every relayed media
//! datagram, so it deepens with the number of senders. A connection mailbox
//! holds frames fanned out to one participant and only deepens when that
//! participant reads slowly.
//!
//! | Actor      | Warns above |
//! |------------|-------------|
//! | Room       | 500         |
//! | Connection | 200         |

use crate::observability::metrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::warn;

pub const ROOM_MAILBOX_WARNING: usize = 500;
pub const CONNECTION_MAILBOX_WARNING: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    Room,
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Room => "room",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Room => ROOM_MAILBOX_WARNING,
            ActorType::Connection => CONNECTION_MAILBOX_WARNING,
        }
    }
}

/// Queue depth of one actor mailbox.
///
/// Senders call [`record_enqueue`](Self::record_enqueue) once a message is
/// accepted; the actor calls [`record_dequeue`](Self::record_dequeue) after
/// handling it. The room's depth is exported as a gauge. Connection depths
/// are only logged, since there is one per participant.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    depth: AtomicUsize,
    processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
        }
    }

    pub fn record_enqueue(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.export(depth);

        // Once per crossing, not on every message above the line
        if depth == self.actor_type.warning_threshold() + 1 {
            warn!(
                target: "huddle.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = depth,
                "Mailbox backing up"
            );
        }
    }

    pub fn record_dequeue(&self) {
        // Saturating: a message enqueued before the monitor existed must not wrap
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            })
            .unwrap_or_default();
        self.export(previous.saturating_sub(1));
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// A message was refused because the mailbox was full.
    pub fn record_drop(&self) {
        metrics::record_mailbox_drop(self.actor_type.as_str());
        warn!(
            target: "huddle.actor.mailbox",
            actor_type = self.actor_type.as_str(),
            actor_id = %self.actor_id,
            depth = self.current_depth(),
            "Mailbox full, message dropped"
        );
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    fn export(&self, depth: usize) {
        if self.actor_type == ActorType::Room {
            metrics::set_room_mailbox_depth(depth);
        }
    }
}

//! Actor model for the Huddle server.
//!
//! ```text
//! RoomActor (singleton)
//! ├── owns the session registry and presenter lock
//! ├── fans out to N ConnectionActors
//! │   └── ConnectionActor (one per control connection, owns the write half)
//! └── fans out media through MediaSenders
//!
//! MediaRelay (one per media kind, owns the receive side of its socket)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single owner**: Presence and the presenter cell are touched only by the room
//! - **Non-blocking fan-out**: The room enqueues frames with `try_send`; it never writes sockets
//! - **CancellationToken propagation**: Sessions get child tokens of the server's root token
//! - **Mailbox monitoring**: Room depth gauge and drop counters; warnings past 500 (room) and 200 (connection)
//!
//! # Modules
//!
//! - [`room`] - `RoomActor` singleton
//! - [`connection`] - `ConnectionActor` per control connection
//! - [`media_relay`] - UDP receive loops and senders
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox depth monitoring

pub mod connection;
pub mod media_relay;
pub mod messages;
pub mod metrics;
pub mod room;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionActorHandle, DeliveryError};
pub use media_relay::{MediaRelay, MediaSender, MediaSenders};
pub use messages::*;
pub use metrics::MailboxMonitor;
pub use room::{RoomActor, RoomActorHandle};

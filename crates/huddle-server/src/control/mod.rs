//! Control channel: listener, handshake, and per-connection sessions.
//!
//! - [`listener`] - TCP accept loop
//! - [`handshake`] - Name exchange and registration
//! - [`session`] - Receive loop and request dispatch

pub mod handshake;
pub mod listener;
pub mod session;

pub use listener::ControlListener;

use crate::actors::RoomActorHandle;
use crate::config::Config;
use crate::files::FileStore;
use std::sync::Arc;

/// Everything a control session needs, cloned into each one.
#[derive(Clone, Debug)]
pub struct ControlContext {
    pub room: RoomActorHandle,
    pub files: Arc<FileStore>,
    pub config: Arc<Config>,
}

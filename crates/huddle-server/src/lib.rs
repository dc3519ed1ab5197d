//! Huddle Server Library
//!
//! Core functionality for the Huddle group-communication server:
//!
//! - Presence: one named participant per control connection, with `ADD` and
//!   `REMOVE` notices to everyone else
//! - Text and control relay to everyone or to named recipients
//! - Best-effort video and audio relay over UDP
//! - Single-presenter screen-share arbitration
//! - File upload, a per-recipient file index, and on-demand download
//!
//! # Architecture
//!
//! ```text
//! ControlListener ──accept──> session task (one per connection)
//!                               ├── handshake, receive loop, file I/O
//!                               └── ConnectionActor (owns the write half)
//!
//! RoomActor (singleton) ── registry, presenter lock, fan-out
//!
//! MediaRelay (video) ─┐
//! MediaRelay (audio) ─┴──> RoomActor ──try_send_to──> participants
//!
//! FileStore (shared) ── index + active uploads, reaped when idle
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Room, connection, and media relay actors
//! - [`config`] - Service configuration from environment
//! - [`control`] - Control listener, handshake, and sessions
//! - [`errors`] - Error types with participant-safe messages
//! - [`files`] - File store and download streaming
//! - [`observability`] - Health endpoints and metrics
//! - [`presenter`] - Screen-share lock
//! - [`registry`] - Session registry
//! - [`server`] - Binding and startup

pub mod actors;
pub mod config;
pub mod control;
pub mod errors;
pub mod files;
pub mod observability;
pub mod presenter;
pub mod registry;
pub mod server;

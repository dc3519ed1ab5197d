//! Observability for the Huddle server.
//!
//! Media payloads and file contents are never logged or used as labels;
//! instrumentation records names, sizes, and bounded outcome labels only.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `huddle_participants_active` | Gauge | none | Registered participants |
//! | `huddle_file_transfers_active` | Gauge | none | Uploads in progress |
//! | `huddle_control_connections_active` | Gauge | none | Open control connections |
//! | `huddle_room_mailbox_depth` | Gauge | none | Queued room actor messages |
//! | `huddle_mailbox_drops_total` | Counter | `actor` | Messages refused by full mailboxes |
//! | `huddle_handshakes_total` | Counter | `outcome` | Handshake results |
//! | `huddle_decode_errors_total` | Counter | `channel` | Undecodable frames/datagrams |
//! | `huddle_control_deliveries_dropped_total` | Counter | `reason` | Fan-out drops |
//! | `huddle_media_datagrams_total` | Counter | `kind`, `outcome` | Media relay activity |
//! | `huddle_file_transfers_total` | Counter | `outcome` | Finished uploads |
//! | `huddle_file_downloads_total` | Counter | `outcome` | Finished downloads |
//! | `huddle_download_bytes_total` | Counter | none | Bytes streamed to requesters |
//! | `huddle_file_download_duration_seconds` | Histogram | none | Download stream time |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};

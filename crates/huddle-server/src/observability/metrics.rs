//! Metrics definitions for the Huddle server.
//!
//! All metrics follow Prometheus naming conventions:
//! - `huddle_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Every label value is a `&'static str` chosen by the caller from a fixed set:
//! - `channel`: control, video, audio
//! - `kind`: video, audio
//! - `outcome`: bounded per metric (see each function)
//! - `reason`: mailbox_full, closed, write_failed
//! - `actor`: room, connection

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Download streaming: paced at ~1ms per chunk, so seconds to minutes
        .set_buckets_for_metric(
            Matcher::Full("huddle_file_download_duration_seconds".to_string()),
            &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0],
        )
        .map_err(|e| format!("Failed to set download duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Presence (Gauges)
// ============================================================================

/// Set the number of registered participants.
///
/// Metric: `huddle_participants_active`
pub fn set_participants_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("huddle_participants_active").set(count as f64);
}

/// Set the number of uploads between start and end marker.
///
/// Metric: `huddle_file_transfers_active`
pub fn set_file_transfers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("huddle_file_transfers_active").set(count as f64);
}

/// Track open control connections, including ones still in the handshake.
///
/// Metric: `huddle_control_connections_active`
pub fn control_connection_opened() {
    gauge!("huddle_control_connections_active").increment(1.0);
}

/// Metric: `huddle_control_connections_active`
pub fn control_connection_closed() {
    gauge!("huddle_control_connections_active").decrement(1.0);
}

// ============================================================================
// Actor Mailboxes
// ============================================================================

/// Set the room actor's mailbox depth.
///
/// Metric: `huddle_room_mailbox_depth`
pub fn set_room_mailbox_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("huddle_room_mailbox_depth").set(depth as f64);
}

/// Record a message refused by a full actor mailbox.
///
/// Metric: `huddle_mailbox_drops_total`
/// Labels: `actor` (room, connection)
pub fn record_mailbox_drop(actor: &'static str) {
    counter!("huddle_mailbox_drops_total", "actor" => actor).increment(1);
}

// ============================================================================
// Control Channel
// ============================================================================

/// Record a handshake result.
///
/// Metric: `huddle_handshakes_total`
/// Labels: `outcome` (accepted, name_taken, invalid_name, failed)
pub fn record_handshake(outcome: &'static str) {
    counter!("huddle_handshakes_total", "outcome" => outcome).increment(1);
}

/// Record an undecodable frame or datagram.
///
/// Metric: `huddle_decode_errors_total`
/// Labels: `channel` (control, video, audio)
pub fn record_decode_error(channel: &'static str) {
    counter!("huddle_decode_errors_total", "channel" => channel).increment(1);
}

/// Record a control frame that was not delivered to a recipient.
///
/// Metric: `huddle_control_deliveries_dropped_total`
/// Labels: `reason` (mailbox_full, closed, write_failed)
pub fn record_control_delivery_dropped(reason: &'static str) {
    counter!("huddle_control_deliveries_dropped_total", "reason" => reason).increment(1);
}

// ============================================================================
// Media Relay
// ============================================================================

/// Record a datagram handled by a media relay.
///
/// Metric: `huddle_media_datagrams_total`
/// Labels: `kind` (video, audio), `outcome` (registered, relayed, oversized,
/// undecodable, unknown_sender, dropped)
pub fn record_media_datagram(kind: &'static str, outcome: &'static str) {
    counter!("huddle_media_datagrams_total", "kind" => kind, "outcome" => outcome).increment(1);
}

// ============================================================================
// File Transfer
// ============================================================================

/// Record the end of an upload.
///
/// Metric: `huddle_file_transfers_total`
/// Labels: `outcome` (completed, rejected_empty, aborted_idle)
pub fn record_file_transfer(outcome: &'static str) {
    counter!("huddle_file_transfers_total", "outcome" => outcome).increment(1);
}

/// Record the end of a download stream.
///
/// Metrics: `huddle_file_downloads_total`, `huddle_download_bytes_total`,
/// `huddle_file_download_duration_seconds`
/// Labels: `outcome` (completed, incomplete, failed, not_found, invalid)
pub fn record_file_download(outcome: &'static str, bytes: u64, duration: Duration) {
    counter!("huddle_file_downloads_total", "outcome" => outcome).increment(1);
    counter!("huddle_download_bytes_total").increment(bytes);
    histogram!("huddle_file_download_duration_seconds").record(duration.as_secs_f64());
}

//! Huddle server configuration.
//!
//! Configuration is loaded from environment variables. Every field has a
//! default, so an empty environment yields a working server on the
//! well-known ports.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default control-channel (TCP) bind address.
pub const DEFAULT_CONTROL_BIND_ADDRESS: &str = "0.0.0.0:53530";

/// Default video media-channel (UDP) bind address.
pub const DEFAULT_VIDEO_BIND_ADDRESS: &str = "0.0.0.0:53531";

/// Default audio media-channel (UDP) bind address.
pub const DEFAULT_AUDIO_BIND_ADDRESS: &str = "0.0.0.0:53532";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default root directory for recipient file storage.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Default maximum size of one control frame.
pub const DEFAULT_MAX_CONTROL_FRAME_BYTES: usize = huddle_protocol::framing::MAX_CONTROL_FRAME_LEN;

/// Default maximum video datagram size.
pub const DEFAULT_VIDEO_MAX_DATAGRAM_BYTES: usize = 65_536;

/// Default maximum audio datagram size.
pub const DEFAULT_AUDIO_MAX_DATAGRAM_BYTES: usize = 8_192;

/// Default chunk size when streaming a download.
pub const DEFAULT_DOWNLOAD_CHUNK_BYTES: usize = 1024;

/// Default delay between download chunks in milliseconds.
pub const DEFAULT_DOWNLOAD_PACING_MS: u64 = 1;

/// Default idle time after which an unfinished upload is aborted.
pub const DEFAULT_TRANSFER_IDLE_TIMEOUT_SECONDS: u64 = 300;

/// Huddle server configuration.
#[derive(Clone)]
pub struct Config {
    /// Control channel bind address (default: "0.0.0.0:53530").
    pub control_bind_address: SocketAddr,

    /// Video relay bind address (default: "0.0.0.0:53531").
    pub video_bind_address: SocketAddr,

    /// Audio relay bind address (default: "0.0.0.0:53532").
    pub audio_bind_address: SocketAddr,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: SocketAddr,

    /// Root of `<data_dir>/<recipient>/<stored filename>` storage.
    pub data_dir: PathBuf,

    /// Largest accepted control frame, excluding the length prefix.
    pub max_control_frame_bytes: usize,

    /// Largest accepted video datagram.
    pub video_max_datagram_bytes: usize,

    /// Largest accepted audio datagram.
    pub audio_max_datagram_bytes: usize,

    /// Bytes per binary chunk when streaming a download.
    pub download_chunk_bytes: usize,

    /// Delay after each download chunk, in milliseconds.
    pub download_pacing_ms: u64,

    /// Idle time before an unfinished upload is aborted, in seconds.
    pub transfer_idle_timeout_seconds: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("control_bind_address", &self.control_bind_address)
            .field("video_bind_address", &self.video_bind_address)
            .field("audio_bind_address", &self.audio_bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("data_dir", &self.data_dir)
            .field("max_control_frame_bytes", &self.max_control_frame_bytes)
            .field("video_max_datagram_bytes", &self.video_max_datagram_bytes)
            .field("audio_max_datagram_bytes", &self.audio_max_datagram_bytes)
            .field("download_chunk_bytes", &self.download_chunk_bytes)
            .field("download_pacing_ms", &self.download_pacing_ms)
            .field(
                "transfer_idle_timeout_seconds",
                &self.transfer_idle_timeout_seconds,
            )
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let control_bind_address = parse_address(
            vars,
            "HUDDLE_CONTROL_BIND_ADDRESS",
            DEFAULT_CONTROL_BIND_ADDRESS,
        )?;
        let video_bind_address =
            parse_address(vars, "HUDDLE_VIDEO_BIND_ADDRESS", DEFAULT_VIDEO_BIND_ADDRESS)?;
        let audio_bind_address =
            parse_address(vars, "HUDDLE_AUDIO_BIND_ADDRESS", DEFAULT_AUDIO_BIND_ADDRESS)?;
        let health_bind_address = parse_address(
            vars,
            "HUDDLE_HEALTH_BIND_ADDRESS",
            DEFAULT_HEALTH_BIND_ADDRESS,
        )?;

        let data_dir = vars
            .get("HUDDLE_DATA_DIR")
            .map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from);

        let max_control_frame_bytes = vars
            .get("HUDDLE_MAX_CONTROL_FRAME_BYTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONTROL_FRAME_BYTES);

        let video_max_datagram_bytes = vars
            .get("HUDDLE_VIDEO_MAX_DATAGRAM_BYTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_VIDEO_MAX_DATAGRAM_BYTES);

        let audio_max_datagram_bytes = vars
            .get("HUDDLE_AUDIO_MAX_DATAGRAM_BYTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_AUDIO_MAX_DATAGRAM_BYTES);

        let download_chunk_bytes = vars
            .get("HUDDLE_DOWNLOAD_CHUNK_BYTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_DOWNLOAD_CHUNK_BYTES);

        let download_pacing_ms = vars
            .get("HUDDLE_DOWNLOAD_PACING_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_DOWNLOAD_PACING_MS);

        let transfer_idle_timeout_seconds = vars
            .get("HUDDLE_TRANSFER_IDLE_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TRANSFER_IDLE_TIMEOUT_SECONDS);

        for (name, value) in [
            ("HUDDLE_MAX_CONTROL_FRAME_BYTES", max_control_frame_bytes),
            ("HUDDLE_VIDEO_MAX_DATAGRAM_BYTES", video_max_datagram_bytes),
            ("HUDDLE_AUDIO_MAX_DATAGRAM_BYTES", audio_max_datagram_bytes),
            ("HUDDLE_DOWNLOAD_CHUNK_BYTES", download_chunk_bytes),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{name} must be non-zero")));
            }
        }

        Ok(Config {
            control_bind_address,
            video_bind_address,
            audio_bind_address,
            health_bind_address,
            data_dir,
            max_control_frame_bytes,
            video_max_datagram_bytes,
            audio_max_datagram_bytes,
            download_chunk_bytes,
            download_pacing_ms,
            transfer_idle_timeout_seconds,
        })
    }

    /// Delay after each download chunk.
    #[must_use]
    pub fn download_pacing(&self) -> Duration {
        Duration::from_millis(self.download_pacing_ms)
    }

    /// Idle time before an unfinished upload is aborted.
    #[must_use]
    pub fn transfer_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_idle_timeout_seconds)
    }
}

fn parse_address(
    vars: &HashMap<String, String>,
    name: &str,
    default: &str,
) -> Result<SocketAddr, ConfigError> {
    let raw = vars.get(name).map_or(default, String::as_str);
    raw.parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{name}={raw}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = base_vars();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.control_bind_address.port(), 53530);
        assert_eq!(config.video_bind_address.port(), 53531);
        assert_eq!(config.audio_bind_address.port(), 53532);
        assert_eq!(config.health_bind_address.port(), 8081);
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.max_control_frame_bytes, DEFAULT_MAX_CONTROL_FRAME_BYTES);
        assert_eq!(config.video_max_datagram_bytes, 65_536);
        assert_eq!(config.audio_max_datagram_bytes, 8_192);
        assert_eq!(config.download_chunk_bytes, 1024);
        assert_eq!(config.download_pacing(), Duration::from_millis(1));
        assert_eq!(config.transfer_idle_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert(
            "HUDDLE_CONTROL_BIND_ADDRESS".to_string(),
            "127.0.0.1:6000".to_string(),
        );
        vars.insert(
            "HUDDLE_VIDEO_BIND_ADDRESS".to_string(),
            "127.0.0.1:6001".to_string(),
        );
        vars.insert(
            "HUDDLE_AUDIO_BIND_ADDRESS".to_string(),
            "127.0.0.1:6002".to_string(),
        );
        vars.insert("HUDDLE_DATA_DIR".to_string(), "/var/lib/huddle".to_string());
        vars.insert("HUDDLE_DOWNLOAD_CHUNK_BYTES".to_string(), "4096".to_string());
        vars.insert("HUDDLE_DOWNLOAD_PACING_MS".to_string(), "0".to_string());
        vars.insert(
            "HUDDLE_TRANSFER_IDLE_TIMEOUT_SECONDS".to_string(),
            "60".to_string(),
        );

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.control_bind_address.to_string(), "127.0.0.1:6000");
        assert_eq!(config.video_bind_address.to_string(), "127.0.0.1:6001");
        assert_eq!(config.audio_bind_address.to_string(), "127.0.0.1:6002");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/huddle"));
        assert_eq!(config.download_chunk_bytes, 4096);
        assert_eq!(config.download_pacing(), Duration::ZERO);
        assert_eq!(config.transfer_idle_timeout_seconds, 60);
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let mut vars = base_vars();
        vars.insert(
            "HUDDLE_CONTROL_BIND_ADDRESS".to_string(),
            "not-an-address".to_string(),
        );

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("HUDDLE_CONTROL_BIND_ADDRESS")));
    }

    #[test]
    fn test_unparsable_number_falls_back_to_default() {
        let mut vars = base_vars();
        vars.insert(
            "HUDDLE_TRANSFER_IDLE_TIMEOUT_SECONDS".to_string(),
            "soon".to_string(),
        );

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(
            config.transfer_idle_timeout_seconds,
            DEFAULT_TRANSFER_IDLE_TIMEOUT_SECONDS
        );
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let mut vars = base_vars();
        vars.insert("HUDDLE_DOWNLOAD_CHUNK_BYTES".to_string(), "0".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_debug_lists_fields() {
        let config = Config::from_vars(&base_vars()).unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("control_bind_address"));
        assert!(debug.contains("transfer_idle_timeout_seconds"));
    }
}

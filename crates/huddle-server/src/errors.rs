//! Huddle server error types.
//!
//! Internal details are logged server-side. Participants only ever see
//! [`ServerError::client_message`].

use huddle_protocol::CodecError;
use std::net::SocketAddr;
use thiserror::Error;

/// Rejection sent when a handshake name is already registered.
pub const NAME_TAKEN_MESSAGE: &str = "Username already taken";

/// Huddle server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Handshake name is already registered.
    #[error("Name already taken: {0}")]
    NameTaken(String),

    /// Handshake name is not acceptable.
    #[error("Invalid participant name: {0}")]
    InvalidName(String),

    /// A listening endpoint could not be bound.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Socket or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Request was well-formed on the wire but not meaningful.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Requested file is not in the requester's index.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (actor gone, channel closed).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ServerError::NameTaken(_) => NAME_TAKEN_MESSAGE.to_string(),
            ServerError::InvalidName(reason) => format!("Invalid username: {reason}"),
            ServerError::InvalidRequest(_) => "Invalid download request".to_string(),
            ServerError::FileNotFound(_) => "Requested file not found".to_string(),
            ServerError::Io(e) => format!("Error streaming file: {e}"),
            ServerError::Bind { .. }
            | ServerError::Codec(_)
            | ServerError::Config(_)
            | ServerError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<crate::config::ConfigError> for ServerError {
    fn from(err: crate::config::ConfigError) -> Self {
        ServerError::Config(err.to_string())
    }
}

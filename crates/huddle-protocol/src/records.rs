//! Typed records carried in map and list payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Server-minted identifier of one upload.
///
/// Serialized as its hyphenated string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Mint a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TransferId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One entry of a `FILE_LIST` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListing {
    pub transfer_id: TransferId,
    pub filename: String,
    pub size: u64,
    pub from: String,
    pub timestamp: DateTime<Utc>,
}

/// First element of a download stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub transfer_id: TransferId,
    pub filename: String,
    pub size: u64,
    pub from: String,
}

/// Payload of a `DOWNLOAD_FILE` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub transfer_id: TransferId,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_id_is_unique() {
        assert_ne!(TransferId::new(), TransferId::new());
    }

    #[test]
    fn test_transfer_id_parses_its_display_form() {
        let id = TransferId::new();
        let parsed: TransferId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<TransferId>().is_err());
    }

    #[test]
    fn test_download_request_json_shape() {
        let id = TransferId::new();
        let json = serde_json::to_value(DownloadRequest { transfer_id: id }).unwrap();
        assert_eq!(json, serde_json::json!({ "transfer_id": id.to_string() }));
    }
}

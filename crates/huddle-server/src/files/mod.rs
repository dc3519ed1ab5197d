//! File transfer: upload ingestion, the per-recipient index, and download
//! streaming.
//!
//! - [`naming`] - Safe, collision-free stored filenames
//! - [`store`] - `FileStore` index and active-transfer table
//! - [`download`] - Re-streaming an indexed file to its recipient

pub mod download;
pub mod naming;
pub mod store;

pub use download::{stream_download, DownloadOutcome};
pub use store::{FileIndexEntry, FileStore, FinishedTransfer, TransferKey};

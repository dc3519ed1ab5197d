//! `FileStore` - per-recipient file index and in-flight uploads.
//!
//! Layout on disk is `<root>/<recipient>/<stored filename>`, one physical
//! copy per recipient per upload.
//!
//! # Locking
//!
//! The index and the active-transfer table each sit behind their own mutex,
//! held only for the map operation itself. File I/O for one upload happens
//! under that upload's own lock, so chunk writes for different uploads
//! proceed independently and chunks of one upload stay ordered.

use super::naming::{create_unique, sanitize_filename};
use crate::errors::ServerError;
use crate::observability::metrics;

use chrono::{DateTime, Utc};
use huddle_protocol::{FileListing, FileMetadata, TransferId};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// One file available to one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct FileIndexEntry {
    pub transfer_id: TransferId,
    /// Stored name, unique within the recipient's directory.
    pub filename: String,
    pub path: PathBuf,
    /// Bytes on disk at completion; 0 while the upload is in flight.
    pub size: u64,
    /// Name of the uploading participant.
    pub from: String,
    pub timestamp: DateTime<Utc>,
    /// True between start marker and end marker. Pending entries are never
    /// listed or downloadable.
    pub pending: bool,
}

impl FileIndexEntry {
    /// Public fields for a `FILE_LIST` reply.
    #[must_use]
    pub fn listing(&self) -> FileListing {
        FileListing {
            transfer_id: self.transfer_id,
            filename: self.filename.clone(),
            size: self.size,
            from: self.from.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Metadata sent ahead of a download stream.
    #[must_use]
    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            transfer_id: self.transfer_id,
            filename: self.filename.clone(),
            size: self.size,
            from: self.from.clone(),
        }
    }
}

/// Identifies one upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferKey {
    pub from: String,
    /// Sanitized source filename, or the raw one if it was unusable.
    pub filename: String,
    pub transfer_id: TransferId,
}

/// Result of an end marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishedTransfer {
    pub transfer_id: TransferId,
    /// Recipients now holding an indexed copy.
    pub indexed: Vec<String>,
    /// Recipients whose copy was empty or missing and was discarded.
    pub discarded: Vec<String>,
}

#[derive(Debug)]
struct RecipientFile {
    file: Option<File>,
    path: PathBuf,
    bytes_written: u64,
}

#[derive(Debug)]
struct ActiveTransfer {
    recipients: HashMap<String, RecipientFile>,
    last_activity: Instant,
}

#[derive(Debug, Clone)]
struct ActiveSlot {
    /// Start order; the newest upload from a sender receives its chunks.
    sequence: u64,
    transfer: Arc<Mutex<ActiveTransfer>>,
}

/// File index plus active-transfer table.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    index: Mutex<HashMap<String, Vec<FileIndexEntry>>>,
    active: Mutex<HashMap<TransferKey, ActiveSlot>>,
    next_sequence: AtomicU64,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// The index starts empty; files left on disk by an earlier run are not
    /// re-indexed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ServerError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        Ok(Self {
            root,
            index: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Handle a start marker: open one file per recipient and index each
    /// provisionally.
    ///
    /// The upload is always registered, so its chunks and end marker never
    /// land in an earlier upload from the same sender. An unusable filename
    /// registers an upload with no recipient copies. A recipient whose file
    /// cannot be created is left out of this upload.
    pub async fn start_transfer(
        &self,
        from: &str,
        source_name: &str,
        recipients: &[String],
    ) -> TransferId {
        let transfer_id = TransferId::new();
        let timestamp = Utc::now();

        let mut opened: HashMap<String, RecipientFile> = HashMap::new();
        let mut entries: Vec<(String, FileIndexEntry)> = Vec::new();

        let (filename, targets): (String, &[String]) = match sanitize_filename(source_name) {
            Ok(filename) => (filename, recipients),
            Err(e) => {
                warn!(
                    target: "huddle.files",
                    transfer_id = %transfer_id,
                    from = %from,
                    error = %e,
                    "Unusable filename, upload will be discarded"
                );
                (source_name.to_string(), &[])
            }
        };

        for recipient in targets {
            let dir = self.root.join(recipient);
            let created = match tokio::fs::create_dir_all(&dir).await {
                Ok(()) => create_unique(&dir, &filename).await,
                Err(e) => Err(ServerError::Io(e)),
            };

            let (file, path, stored) = match created {
                Ok(created) => created,
                Err(e) => {
                    warn!(
                        target: "huddle.files",
                        transfer_id = %transfer_id,
                        from = %from,
                        recipient = %recipient,
                        error = %e,
                        "Failed to create recipient file, skipping recipient"
                    );
                    continue;
                }
            };

            entries.push((
                recipient.clone(),
                FileIndexEntry {
                    transfer_id,
                    filename: stored,
                    path: path.clone(),
                    size: 0,
                    from: from.to_string(),
                    timestamp,
                    pending: true,
                },
            ));
            opened.insert(
                recipient.clone(),
                RecipientFile {
                    file: Some(file),
                    path,
                    bytes_written: 0,
                },
            );
        }
        let copies = opened.len();

        {
            let mut index = self.index.lock().await;
            for (recipient, entry) in entries {
                index.entry(recipient).or_default().push(entry);
            }
        }

        let key = TransferKey {
            from: from.to_string(),
            filename: filename.clone(),
            transfer_id,
        };
        let slot = ActiveSlot {
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            transfer: Arc::new(Mutex::new(ActiveTransfer {
                recipients: opened,
                last_activity: Instant::now(),
            })),
        };
        let active_count = {
            let mut active = self.active.lock().await;
            active.insert(key, slot);
            active.len()
        };
        metrics::set_file_transfers_active(active_count);

        info!(
            target: "huddle.files",
            transfer_id = %transfer_id,
            from = %from,
            filename = %filename,
            recipients = copies,
            "Upload started"
        );
        transfer_id
    }

    /// Handle a chunk: append to every recipient copy of the sender's newest
    /// upload. Returns `false` if the sender has no upload in flight.
    ///
    /// A failed write to one recipient's copy does not affect the others.
    pub async fn append_chunk(&self, from: &str, chunk: &[u8]) -> bool {
        let Some((_, slot)) = self.newest_for(from).await else {
            return false;
        };

        let mut transfer = slot.transfer.lock().await;
        transfer.last_activity = Instant::now();
        for (recipient, copy) in &mut transfer.recipients {
            let Some(file) = copy.file.as_mut() else {
                continue;
            };
            match file.write_all(chunk).await {
                Ok(()) => copy.bytes_written += chunk.len() as u64,
                Err(e) => {
                    warn!(
                        target: "huddle.files",
                        from = %from,
                        recipient = %recipient,
                        error = %e,
                        "Chunk write failed"
                    );
                }
            }
        }
        true
    }

    /// Handle an end marker for the sender's newest upload.
    ///
    /// Every recipient copy is closed. Empty or missing copies are deleted
    /// and unindexed; the rest are indexed with their size on disk. Returns
    /// `None` if the sender has no upload in flight.
    pub async fn finish_transfer(&self, from: &str) -> Option<FinishedTransfer> {
        let (key, slot) = {
            let mut active = self.active.lock().await;
            let key = newest_key(&active, from)?;
            let slot = active.remove(&key)?;
            metrics::set_file_transfers_active(active.len());
            (key, slot)
        };

        let mut finished = FinishedTransfer {
            transfer_id: key.transfer_id,
            ..FinishedTransfer::default()
        };
        let mut sizes: Vec<(String, Option<u64>)> = Vec::new();

        {
            let mut transfer = slot.transfer.lock().await;
            for (recipient, copy) in &mut transfer.recipients {
                close_copy(recipient, copy).await;

                let size = match tokio::fs::metadata(&copy.path).await {
                    Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
                    _ => {
                        remove_quietly(&copy.path).await;
                        None
                    }
                };
                sizes.push((recipient.clone(), size));
            }
        }

        {
            let mut index = self.index.lock().await;
            for (recipient, size) in sizes {
                let entries = index.entry(recipient.clone()).or_default();
                match size {
                    Some(size) => {
                        for entry in entries
                            .iter_mut()
                            .filter(|e| e.transfer_id == key.transfer_id)
                        {
                            entry.size = size;
                            entry.pending = false;
                        }
                        finished.indexed.push(recipient);
                    }
                    None => {
                        entries.retain(|e| e.transfer_id != key.transfer_id);
                        finished.discarded.push(recipient);
                    }
                }
            }
        }

        finished.indexed.sort();
        finished.discarded.sort();

        if finished.indexed.is_empty() {
            metrics::record_file_transfer("rejected_empty");
        } else {
            metrics::record_file_transfer("completed");
        }
        info!(
            target: "huddle.files",
            transfer_id = %key.transfer_id,
            from = %from,
            filename = %key.filename,
            indexed = finished.indexed.len(),
            discarded = finished.discarded.len(),
            "Upload finished"
        );
        Some(finished)
    }

    /// Files available to `name`.
    ///
    /// Entries whose backing file is gone or empty are dropped from the
    /// index as a side effect.
    pub async fn list_files(&self, name: &str) -> Vec<FileListing> {
        let candidates: Vec<FileIndexEntry> = {
            let index = self.index.lock().await;
            index
                .get(name)
                .map(|entries| entries.iter().filter(|e| !e.pending).cloned().collect())
                .unwrap_or_default()
        };

        let mut valid = Vec::with_capacity(candidates.len());
        let mut invalid = Vec::new();
        for entry in candidates {
            if backing_file_is_valid(&entry.path).await {
                valid.push(entry.listing());
            } else {
                invalid.push(entry.transfer_id);
            }
        }

        if !invalid.is_empty() {
            debug!(
                target: "huddle.files",
                name = %name,
                dropped = invalid.len(),
                "Dropping index entries with missing or empty files"
            );
            let mut index = self.index.lock().await;
            if let Some(entries) = index.get_mut(name) {
                entries.retain(|e| e.pending || !invalid.contains(&e.transfer_id));
            }
        }

        valid
    }

    /// Find `requester`'s own completed entry for `transfer_id`.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if there is no such entry or its file is gone.
    pub async fn resolve_download(
        &self,
        requester: &str,
        transfer_id: &TransferId,
    ) -> Result<FileIndexEntry, ServerError> {
        let entry = {
            let index = self.index.lock().await;
            index
                .get(requester)
                .and_then(|entries| {
                    entries
                        .iter()
                        .find(|e| !e.pending && &e.transfer_id == transfer_id)
                })
                .cloned()
        };

        match entry {
            Some(entry) if backing_file_is_valid(&entry.path).await => Ok(entry),
            _ => Err(ServerError::FileNotFound(transfer_id.to_string())),
        }
    }

    /// Abort uploads with no activity for longer than `max_idle`.
    ///
    /// Partial files are deleted and their provisional entries dropped.
    /// Uploads busy writing a chunk right now are not idle and are skipped.
    /// Returns the number of uploads aborted.
    pub async fn reap_idle(&self, max_idle: Duration) -> usize {
        let reaped: Vec<(TransferKey, ActiveSlot)> = {
            let mut active = self.active.lock().await;
            let idle: Vec<TransferKey> = active
                .iter()
                .filter(|(_, slot)| {
                    slot.transfer
                        .try_lock()
                        .is_ok_and(|t| t.last_activity.elapsed() > max_idle)
                })
                .map(|(key, _)| key.clone())
                .collect();
            let reaped = idle
                .into_iter()
                .filter_map(|key| active.remove(&key).map(|slot| (key, slot)))
                .collect();
            metrics::set_file_transfers_active(active.len());
            reaped
        };

        for (key, slot) in &reaped {
            let recipients: Vec<String> = {
                let mut transfer = slot.transfer.lock().await;
                for (recipient, copy) in &mut transfer.recipients {
                    close_copy(recipient, copy).await;
                    remove_quietly(&copy.path).await;
                }
                transfer.recipients.keys().cloned().collect()
            };

            {
                let mut index = self.index.lock().await;
                for recipient in &recipients {
                    if let Some(entries) = index.get_mut(recipient) {
                        entries.retain(|e| e.transfer_id != key.transfer_id);
                    }
                }
            }

            metrics::record_file_transfer("aborted_idle");
            warn!(
                target: "huddle.files",
                transfer_id = %key.transfer_id,
                from = %key.from,
                filename = %key.filename,
                recipients = recipients.len(),
                "Idle upload aborted"
            );
        }

        reaped.len()
    }

    /// Number of uploads between start and end marker.
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    async fn newest_for(&self, from: &str) -> Option<(TransferKey, ActiveSlot)> {
        let active = self.active.lock().await;
        let key = newest_key(&active, from)?;
        let slot = active.get(&key)?.clone();
        Some((key, slot))
    }
}

fn newest_key(active: &HashMap<TransferKey, ActiveSlot>, from: &str) -> Option<TransferKey> {
    active
        .iter()
        .filter(|(key, _)| key.from == from)
        .max_by_key(|(_, slot)| slot.sequence)
        .map(|(key, _)| key.clone())
}

async fn backing_file_is_valid(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

/// Flush and drop the handle. Safe to call twice.
async fn close_copy(recipient: &str, copy: &mut RecipientFile) {
    if let Some(mut file) = copy.file.take() {
        if let Err(e) = file.flush().await {
            warn!(
                target: "huddle.files",
                recipient = %recipient,
                path = %copy.path.display(),
                bytes_written = copy.bytes_written,
                error = %e,
                "Flush failed while closing recipient file"
            );
        }
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            warn!(
                target: "huddle.files",
                path = %path.display(),
                error = %e,
                "Failed to remove file"
            );
        }
    }
}

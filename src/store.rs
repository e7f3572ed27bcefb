//! Filesystem-backed message queue: inbox records and outbox lifecycle.
//!
//! The inbox holds one write-once JSON record per accepted inbound SMS.
//! The outbox is a mailbox polled by the drainer: external producers drop
//! `{anything}.json` files, and the bridge is the sole mutator of their
//! state. A pending file is deleted once sent, or renamed to `.failed` on
//! permanent failure; a rate-deferred file is left untouched. File suffixes
//! are the only persisted state markers, so crash safety reduces to the
//! filesystem's atomic rename and delete.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Suffix of pending outbound records.
const PENDING_EXTENSION: &str = "json";

/// Suffix a permanently failed outbound record is renamed to.
const FAILED_EXTENSION: &str = "failed";

/// Errors raised by queue operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem failure.
    #[error("queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An outbound record that is not valid JSON or lacks required fields.
    #[error("malformed outbound record {file}: {source}")]
    Parse {
        /// File the record was read from.
        file: String,
        /// Parse failure detail.
        source: serde_json::Error,
    },
}

/// An accepted inbound SMS, persisted once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundRecord {
    /// Normalized phone-like sender address.
    pub from: String,
    /// Message body, already clamped to the configured maximum length.
    pub body: String,
    /// Receipt time in epoch seconds.
    pub timestamp: i64,
    /// Bare origin address on the chat protocol.
    pub jid: String,
}

/// An outbound SMS request read from the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRecord {
    /// Destination phone-like address.
    pub to: String,
    /// Message body.
    pub body: String,
}

/// Crash-safe file queue over the inbox and outbox directories.
pub struct FileQueueStore {
    inbox_dir: PathBuf,
    outbox_dir: PathBuf,
}

impl FileQueueStore {
    /// Create a store over the given directories.
    pub fn new(inbox_dir: impl Into<PathBuf>, outbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            inbox_dir: inbox_dir.into(),
            outbox_dir: outbox_dir.into(),
        }
    }

    /// Create both queue directories if they do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if either directory cannot be created.
    pub fn ensure_dirs(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.inbox_dir)?;
        fs::create_dir_all(&self.outbox_dir)?;
        Ok(())
    }

    /// Persist an inbound record as `{timestamp}-{sanitized_sender}.json`.
    ///
    /// The file is created with owner-only permissions where the platform
    /// supports it. Readers that only open fully-named `.json` files never
    /// observe a partial record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the inbox directory is unwritable.
    pub fn write_inbound(&self, record: &InboundRecord) -> Result<PathBuf, StoreError> {
        let name = format!(
            "{}-{}.{PENDING_EXTENSION}",
            record.timestamp,
            sanitize_sender(&record.from)
        );
        let path = self.inbox_dir.join(name);
        let json = serde_json::to_vec(record).map_err(std::io::Error::other)?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        file.write_all(&json)?;
        Ok(path)
    }

    /// Pending outbound files in lexicographic filename order.
    ///
    /// Producers embed no ordering guarantee beyond creation order, so the
    /// sorted listing gives a stable, deterministic processing order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the outbox directory cannot be listed.
    pub fn list_pending(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut pending: Vec<PathBuf> = fs::read_dir(&self.outbox_dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext == PENDING_EXTENSION)
            })
            .collect();
        pending.sort();
        Ok(pending)
    }

    /// Parse a pending outbound record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be read, or
    /// [`StoreError::Parse`] on malformed JSON or missing fields.
    pub fn read_pending(&self, file: &Path) -> Result<OutboundRecord, StoreError> {
        let contents = fs::read_to_string(file)?;
        serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
            file: file.display().to_string(),
            source,
        })
    }

    /// Transition a record to sent by deleting its file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the delete fails; the file then stays
    /// in its prior state for the next scan.
    pub fn mark_sent(&self, file: &Path) -> Result<(), StoreError> {
        fs::remove_file(file)?;
        Ok(())
    }

    /// Transition a record to failed by renaming it to the `.failed` suffix.
    ///
    /// Failed records are permanently retained and never retried.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the rename fails; the file then stays
    /// in its prior state for the next scan.
    pub fn mark_failed(&self, file: &Path) -> Result<(), StoreError> {
        fs::rename(file, file.with_extension(FAILED_EXTENSION))?;
        Ok(())
    }
}

/// Reduce a sender address to a filename-safe token.
pub fn sanitize_sender(addr: &str) -> String {
    addr.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Clamp a message body to at most `max` characters.
pub fn clamp_body(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}

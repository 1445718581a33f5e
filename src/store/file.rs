//! File-backed reference store.
//!
//! Every appended revision is written as one JSON line to
//! `<dir>/documents.jsonl` and fsynced before the append returns. Opening a
//! store replays the log, so documents survive process restarts.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::{DocumentId, ReferenceDocument};
use super::memory::{InMemoryError, InMemoryReferenceStore};
use super::ReferenceStore;

/// Name of the append-only log inside the store directory.
pub const DOCUMENT_LOG: &str = "documents.jsonl";

/// Error type for the file store.
#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A log line could not be decoded.
    #[error("Corrupt document log at line {line}: {message}")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        /// Decoder message.
        message: String,
    },
    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Revision rules violated.
    #[error(transparent)]
    Conflict(#[from] InMemoryError),
}

/// Reference store persisted as an append-only JSON-lines log.
pub struct FileReferenceStore {
    path: PathBuf,
    log: Mutex<File>,
    index: InMemoryReferenceStore,
}

impl FileReferenceStore {
    /// Open (or create) a store in `dir`, replaying its log.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, FileStoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(DOCUMENT_LOG);

        let index = InMemoryReferenceStore::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (i, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let document: ReferenceDocument =
                    serde_json::from_str(&line).map_err(|e| FileStoreError::Corrupt {
                        line: i + 1,
                        message: e.to_string(),
                    })?;
                index.append(document)?;
            }
        }

        let log = OpenOptions::new().create(true).append(true).open(&path)?;

        tracing::info!(
            path = %path.display(),
            documents = index.num_documents(),
            revisions = index.num_revisions(),
            "Opened file reference store"
        );

        Ok(Self {
            path,
            log: Mutex::new(log),
            index,
        })
    }

    /// Path of the document log.
    pub fn log_path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReferenceStore for FileReferenceStore {
    type Error = FileStoreError;

    async fn get_document(&self, id: &DocumentId) -> Result<Option<ReferenceDocument>, Self::Error> {
        Ok(self.index.get_document(id).await?)
    }

    async fn document_history(&self, id: &DocumentId) -> Result<Vec<ReferenceDocument>, Self::Error> {
        Ok(self.index.document_history(id).await?)
    }

    async fn list_documents(&self) -> Result<Vec<DocumentId>, Self::Error> {
        Ok(self.index.list_documents().await?)
    }

    async fn append_document(&self, document: ReferenceDocument) -> Result<(), Self::Error> {
        let mut line = serde_json::to_vec(&document)?;
        line.push(b'\n');

        // Hold the log lock across the revision check so concurrent writers
        // cannot interleave a conflicting revision.
        let mut log = self.log.lock();
        let expected = self
            .index
            .current_revision(&document.id)
            .map(|r| r + 1)
            .unwrap_or(1);
        if document.revision != expected {
            return Err(InMemoryError::RevisionConflict {
                document_id: document.id,
                expected,
                got: document.revision,
            }
            .into());
        }

        log.write_all(&line)?;
        log.sync_data()?;
        self.index.append(document)?;
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.path.exists()
    }
}

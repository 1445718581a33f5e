//! Reference store backends.
//!
//! The store owns reference documents and their passages. Writes are
//! append-only: re-ingesting a document with different bytes appends a new
//! revision that supersedes the old one; re-ingesting identical bytes is a
//! no-op that returns the existing revision.

pub mod memory;
pub mod file;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::Utc;

use crate::canonical_content::compute_content_hash;
use crate::segment::{segment, SegmentationPolicy};
use crate::types::{DocumentId, IdentifierError, Passage, PassageId, ReferenceDocument};

/// Error type for ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// No bytes were supplied.
    #[error("Ingest rejected: input is empty")]
    Empty,
    /// Bytes are not UTF-8 text.
    #[error("Ingest rejected: input is not valid UTF-8 ({0})")]
    NotUtf8(#[from] std::str::Utf8Error),
    /// Input has no words to segment.
    #[error("Ingest rejected: input contains no passages")]
    NoPassages,
    /// Source id cannot be used as a document id.
    #[error("Ingest rejected: invalid source id: {0}")]
    InvalidSourceId(#[from] IdentifierError),
    /// A corpus file could not be read.
    #[error("Ingest rejected: cannot read {path}: {source}")]
    File {
        /// Offending path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Store error.
    #[error("Store error: {0}")]
    Store(String),
}

/// Error type for lookups.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// Document not in store.
    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),
    /// Passage not in the current revision of the document.
    #[error("Passage not found: {document_id}#{passage_id}")]
    PassageNotFound {
        /// Document searched.
        document_id: DocumentId,
        /// Passage requested.
        passage_id: PassageId,
    },
    /// Store error.
    #[error("Store error: {0}")]
    Store(String),
}

/// Trait for reference store backends.
///
/// Implementations must be safe for concurrent readers. Ingestion is the
/// only writer and is expected to be serialized by the caller.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the current revision of a document.
    async fn get_document(&self, id: &DocumentId) -> Result<Option<ReferenceDocument>, Self::Error>;

    /// Fetch every revision of a document, oldest first.
    async fn document_history(&self, id: &DocumentId) -> Result<Vec<ReferenceDocument>, Self::Error>;

    /// List document ids, in id order.
    async fn list_documents(&self) -> Result<Vec<DocumentId>, Self::Error>;

    /// Append a new revision. Implementations reject a revision that is not
    /// exactly one past the current one.
    async fn append_document(&self, document: ReferenceDocument) -> Result<(), Self::Error>;

    /// Whether the backend can currently serve reads.
    async fn is_healthy(&self) -> bool {
        true
    }

    /// Fetch a passage from the current revision of a document.
    async fn get_passage(
        &self,
        document_id: &DocumentId,
        passage_id: &PassageId,
    ) -> Result<Option<Passage>, Self::Error> {
        Ok(self
            .get_document(document_id)
            .await?
            .and_then(|doc| doc.passage(passage_id).cloned()))
    }

    /// Ingest raw bytes under `source_id`.
    async fn ingest(
        &self,
        raw: &[u8],
        source_id: &str,
        policy: &SegmentationPolicy,
    ) -> Result<ReferenceDocument, IngestError> {
        self.ingest_with_source(raw, source_id, source_id, policy).await
    }

    /// Ingest raw bytes under `source_id`, recording where they came from.
    async fn ingest_with_source(
        &self,
        raw: &[u8],
        source_id: &str,
        source: &str,
        policy: &SegmentationPolicy,
    ) -> Result<ReferenceDocument, IngestError> {
        let document_id = DocumentId::new(source_id)?;
        if raw.is_empty() {
            return Err(IngestError::Empty);
        }

        let content_hash = compute_content_hash(raw);
        let current = self
            .get_document(&document_id)
            .await
            .map_err(|e| IngestError::Store(e.to_string()))?;

        if let Some(existing) = current.as_ref().filter(|d| d.content_hash == content_hash) {
            tracing::debug!(
                document_id = %document_id,
                content_hash = %content_hash,
                revision = existing.revision,
                "Identical content already ingested"
            );
            return Ok(existing.clone());
        }

        let text = std::str::from_utf8(raw)?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let segments = segment(text, policy);
        if segments.is_empty() {
            return Err(IngestError::NoPassages);
        }

        let passages = segments
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                Passage::new(PassageId::from_ordinal(i + 1), document_id.clone(), s.range, s.text)
            })
            .collect();

        let document = ReferenceDocument {
            id: document_id.clone(),
            source: source.to_string(),
            content_hash,
            revision: current.as_ref().map(|d| d.revision + 1).unwrap_or(1),
            ingested_at: Utc::now(),
            passages,
        };

        self.append_document(document.clone())
            .await
            .map_err(|e| IngestError::Store(e.to_string()))?;

        tracing::info!(
            document_id = %document.id,
            content_hash = %document.content_hash,
            revision = document.revision,
            passage_count = document.num_passages(),
            superseded = current.is_some(),
            "Reference document ingested"
        );

        Ok(document)
    }

    /// Fetch the current revision or fail with `DocumentNotFound`.
    async fn lookup(&self, id: &DocumentId) -> Result<ReferenceDocument, LookupError> {
        self.get_document(id)
            .await
            .map_err(|e| LookupError::Store(e.to_string()))?
            .ok_or_else(|| LookupError::DocumentNotFound(id.clone()))
    }

    /// Fetch a passage or fail with `DocumentNotFound` / `PassageNotFound`.
    async fn lookup_passage(
        &self,
        document_id: &DocumentId,
        passage_id: &PassageId,
    ) -> Result<Passage, LookupError> {
        let document = self.lookup(document_id).await?;
        document
            .passage(passage_id)
            .cloned()
            .ok_or_else(|| LookupError::PassageNotFound {
                document_id: document_id.clone(),
                passage_id: passage_id.clone(),
            })
    }
}

pub use memory::InMemoryReferenceStore;
pub use file::FileReferenceStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresReferenceStore;

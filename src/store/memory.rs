//! In-memory reference store.

use std::collections::BTreeMap;
use std::sync::Arc;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::{DocumentId, ReferenceDocument};
use super::ReferenceStore;

/// Error type for in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryError {
    /// Appended revision is not the next one.
    #[error("Revision conflict for {document_id}: expected {expected}, got {got}")]
    RevisionConflict {
        /// Document being appended to.
        document_id: DocumentId,
        /// The revision the store expected.
        expected: u32,
        /// The revision supplied.
        got: u32,
    },
}

/// In-memory reference store.
///
/// Cloning shares the underlying data. Uses BTreeMap for deterministic
/// iteration order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReferenceStore {
    /// Revisions by document id, oldest first.
    documents: Arc<RwLock<BTreeMap<DocumentId, Vec<ReferenceDocument>>>>,
}

impl InMemoryReferenceStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append without going through the async trait.
    pub fn append(&self, document: ReferenceDocument) -> Result<(), InMemoryError> {
        let mut documents = self.documents.write();
        let revisions = documents.entry(document.id.clone()).or_default();
        let expected = revisions.last().map(|d| d.revision + 1).unwrap_or(1);
        if document.revision != expected {
            return Err(InMemoryError::RevisionConflict {
                document_id: document.id,
                expected,
                got: document.revision,
            });
        }
        revisions.push(document);
        Ok(())
    }

    /// Revision number of the current revision of a document.
    pub fn current_revision(&self, id: &DocumentId) -> Option<u32> {
        self.documents.read().get(id).and_then(|r| r.last()).map(|d| d.revision)
    }

    /// Get number of documents.
    pub fn num_documents(&self) -> usize {
        self.documents.read().len()
    }

    /// Get number of stored revisions across all documents.
    pub fn num_revisions(&self) -> usize {
        self.documents.read().values().map(Vec::len).sum()
    }

    /// Replace the current revision in place, bypassing append-only rules.
    ///
    /// Test hook for simulating tampering of stored passages.
    #[cfg(test)]
    pub(crate) fn overwrite_current(&self, document: ReferenceDocument) {
        let mut documents = self.documents.write();
        if let Some(last) = documents.get_mut(&document.id).and_then(|r| r.last_mut()) {
            *last = document;
        }
    }
}

#[async_trait]
impl ReferenceStore for InMemoryReferenceStore {
    type Error = InMemoryError;

    async fn get_document(&self, id: &DocumentId) -> Result<Option<ReferenceDocument>, Self::Error> {
        Ok(self.documents.read().get(id).and_then(|r| r.last().cloned()))
    }

    async fn document_history(&self, id: &DocumentId) -> Result<Vec<ReferenceDocument>, Self::Error> {
        Ok(self.documents.read().get(id).cloned().unwrap_or_default())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentId>, Self::Error> {
        Ok(self.documents.read().keys().cloned().collect())
    }

    async fn append_document(&self, document: ReferenceDocument) -> Result<(), Self::Error> {
        self.append(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentationPolicy;
    use crate::store::{IngestError, LookupError};
    use crate::types::PassageId;

    const MANUAL: &[u8] = b"Accounts must report Date of First Delinquency.\n\nUse status code 13 for paid accounts.";

    #[tokio::test]
    async fn test_ingest_and_lookup() {
        let store = InMemoryReferenceStore::new();
        let doc = store
            .ingest(MANUAL, "crrg.md", &SegmentationPolicy::default())
            .await
            .unwrap();

        assert_eq!(doc.revision, 1);
        assert_eq!(doc.num_passages(), 2);
        assert_eq!(doc.passages[0].normalized_text, "Accounts must report Date of First Delinquency.");

        let passage = store
            .lookup_passage(&doc.id, &PassageId::from_ordinal(2))
            .await
            .unwrap();
        assert_eq!(passage.normalized_text, "Use status code 13 for paid accounts.");
    }

    #[tokio::test]
    async fn test_reingest_identical_is_noop() {
        let store = InMemoryReferenceStore::new();
        let policy = SegmentationPolicy::default();
        let first = store.ingest(MANUAL, "crrg.md", &policy).await.unwrap();
        let second = store.ingest(MANUAL, "crrg.md", &policy).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.num_revisions(), 1);
    }

    #[tokio::test]
    async fn test_reingest_changed_supersedes() {
        let store = InMemoryReferenceStore::new();
        let policy = SegmentationPolicy::default();
        let first = store.ingest(MANUAL, "crrg.md", &policy).await.unwrap();
        let second = store
            .ingest(b"Accounts may report Date of First Delinquency.", "crrg.md", &policy)
            .await
            .unwrap();

        assert_eq!(second.revision, 2);
        assert_ne!(first.content_hash, second.content_hash);

        let current = store.lookup(&first.id).await.unwrap();
        assert_eq!(current.content_hash, second.content_hash);

        let history = store.document_history(&first.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], first);
    }

    #[tokio::test]
    async fn test_ingest_rejections() {
        let store = InMemoryReferenceStore::new();
        let policy = SegmentationPolicy::default();

        assert!(matches!(store.ingest(b"", "a.md", &policy).await, Err(IngestError::Empty)));
        assert!(matches!(
            store.ingest(b"  \n\n ", "a.md", &policy).await,
            Err(IngestError::NoPassages)
        ));
        assert!(matches!(
            store.ingest(&[0xff, 0xfe, 0x00], "a.md", &policy).await,
            Err(IngestError::NotUtf8(_))
        ));
        assert!(matches!(
            store.ingest(MANUAL, "a.md#x", &policy).await,
            Err(IngestError::InvalidSourceId(_))
        ));
        assert_eq!(store.num_documents(), 0);
    }

    #[tokio::test]
    async fn test_bom_is_stripped() {
        let store = InMemoryReferenceStore::new();
        let mut raw = vec![0xef, 0xbb, 0xbf];
        raw.extend_from_slice(b"Rule one.");
        let doc = store.ingest(&raw, "bom.txt", &SegmentationPolicy::default()).await.unwrap();
        assert_eq!(doc.passages[0].normalized_text, "Rule one.");
        assert_eq!(doc.passages[0].offset_range.start, 0);
    }

    #[tokio::test]
    async fn test_lookup_missing() {
        let store = InMemoryReferenceStore::new();
        let id = DocumentId::new("missing.md").unwrap();
        assert!(matches!(store.lookup(&id).await, Err(LookupError::DocumentNotFound(_))));

        store.ingest(MANUAL, "crrg.md", &SegmentationPolicy::default()).await.unwrap();
        let doc_id = DocumentId::new("crrg.md").unwrap();
        assert!(matches!(
            store.lookup_passage(&doc_id, &PassageId::new("P99").unwrap()).await,
            Err(LookupError::PassageNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_append_rejects_revision_gap() {
        let store = InMemoryReferenceStore::new();
        let mut doc = store
            .ingest(MANUAL, "crrg.md", &SegmentationPolicy::default())
            .await
            .unwrap();
        doc.revision = 5;
        assert!(matches!(
            store.append(doc),
            Err(InMemoryError::RevisionConflict { expected: 2, got: 5, .. })
        ));
    }
}

//! Manifest snapshot types.
//!
//! A manifest binds logical reference names to the exact content-hashed
//! revision of each reference document, plus the text hash of every passage
//! in that revision. The version is derived from the entries, so two
//! manifests with the same entries have the same version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::document::{DocumentId, PassageId, ReferenceDocument};
use crate::canonical::canonical_hash_hex;

/// One logical reference in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Document this entry snapshots.
    pub document_id: DocumentId,
    /// Content hash of the snapshotted revision.
    pub content_hash: String,
    /// Revision number at snapshot time.
    pub revision: u32,
    /// Passage index: passage id -> text hash at snapshot time.
    pub passages: BTreeMap<PassageId, String>,
}

impl ManifestEntry {
    /// Snapshot a document revision.
    pub fn from_document(document: &ReferenceDocument) -> Self {
        Self {
            document_id: document.id.clone(),
            content_hash: document.content_hash.clone(),
            revision: document.revision,
            passages: document
                .passages
                .iter()
                .map(|p| (p.passage_id.clone(), p.text_hash.clone()))
                .collect(),
        }
    }

    /// Recorded text hash of a passage, if the passage was indexed.
    pub fn recorded_hash(&self, passage_id: &PassageId) -> Option<&str> {
        self.passages.get(passage_id).map(String::as_str)
    }
}

/// Versioned snapshot of a reference corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Content-derived version (xxh64 of the entries).
    pub manifest_version: String,
    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
    /// Logical reference name -> snapshot entry.
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    /// Build a manifest from entries, deriving its version.
    pub fn new(entries: BTreeMap<String, ManifestEntry>, generated_at: DateTime<Utc>) -> Self {
        let manifest_version = Self::compute_version(&entries);
        Self {
            manifest_version,
            generated_at,
            entries,
        }
    }

    /// Version for a set of entries.
    pub fn compute_version(entries: &BTreeMap<String, ManifestEntry>) -> String {
        canonical_hash_hex(entries)
    }

    /// Whether the recorded version still matches the entries.
    ///
    /// A manifest edited at rest fails this check.
    pub fn version_matches(&self) -> bool {
        Self::compute_version(&self.entries) == self.manifest_version
    }

    /// Find the entry snapshotting a document.
    pub fn entry_for_document(&self, document_id: &DocumentId) -> Option<(&str, &ManifestEntry)> {
        self.entries
            .iter()
            .find(|(_, e)| &e.document_id == document_id)
            .map(|(name, e)| (name.as_str(), e))
    }

    /// Total number of indexed passages across all entries.
    pub fn num_passages(&self) -> usize {
        self.entries.values().map(|e| e.passages.len()).sum()
    }
}

/// Why a manifest entry is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaleReason {
    /// The document no longer exists in the store.
    Missing,
    /// The document's current content hash differs from the snapshot.
    ContentChanged {
        /// Hash recorded in the manifest.
        recorded: String,
        /// Hash of the current revision.
        current: String,
    },
}

/// A stale manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleEntry {
    /// Logical reference name.
    pub logical_ref: String,
    /// Document the entry points at.
    pub document_id: DocumentId,
    /// Why it is stale.
    pub reason: StaleReason,
}

/// Result of validating a manifest against the live store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Freshness {
    /// Every entry matches the store.
    Fresh,
    /// At least one entry drifted.
    Stale {
        /// Entries that drifted, in logical-name order.
        stale_entries: Vec<StaleEntry>,
    },
}

impl Freshness {
    /// Whether the manifest is fresh.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }

    /// Stale entries (empty when fresh).
    pub fn stale_entries(&self) -> &[StaleEntry] {
        match self {
            Self::Fresh => &[],
            Self::Stale { stale_entries } => stale_entries,
        }
    }
}

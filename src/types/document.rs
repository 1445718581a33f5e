//! Reference documents and their passages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::canonical_content::{compute_text_hash, validate_text_hash, HashValidation};

/// Error for identifiers that cannot be used in citations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    /// Identifier is empty or whitespace only.
    #[error("identifier is empty")]
    Empty,
    /// Identifier contains the citation separator `#`.
    #[error("identifier contains '#': {0}")]
    ContainsSeparator(String),
    /// Identifier contains a control character.
    #[error("identifier contains a control character: {0:?}")]
    ControlCharacter(String),
}

fn check_identifier(s: &str) -> Result<(), IdentifierError> {
    if s.trim().is_empty() {
        return Err(IdentifierError::Empty);
    }
    if s.contains(crate::CITATION_SEPARATOR) {
        return Err(IdentifierError::ContainsSeparator(s.to_string()));
    }
    if s.chars().any(char::is_control) {
        return Err(IdentifierError::ControlCharacter(s.to_string()));
    }
    Ok(())
}

/// Identifier of a reference document.
///
/// This is the logical source identifier (e.g. `METRO2_CRRG_2024.md`). It is
/// stable across re-ingestion; the content hash is what changes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a document id, rejecting values that would break citation syntax.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        check_identifier(&id)?;
        Ok(Self(id))
    }

    /// Get the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DocumentId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a passage, unique within its document (`P1`, `P2`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PassageId(String);

impl PassageId {
    /// Create a passage id.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        check_identifier(&id)?;
        Ok(Self(id))
    }

    /// Passage id for the 1-based position `ordinal` in a document.
    pub fn from_ordinal(ordinal: usize) -> Self {
        Self(format!("P{}", ordinal))
    }

    /// Get the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PassageId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PassageId> for String {
    fn from(id: PassageId) -> Self {
        id.0
    }
}

impl fmt::Display for PassageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte range of a passage in the decoded source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRange {
    /// Inclusive start offset.
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
}

impl OffsetRange {
    /// Create a new range.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A bounded, hashed unit of reference text that can be cited as evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    /// Id, unique within the owning document.
    pub passage_id: PassageId,
    /// Back-reference to the owning document.
    pub document_id: DocumentId,
    /// Where the passage sits in the source text.
    pub offset_range: OffsetRange,
    /// Whitespace-normalized passage text.
    pub normalized_text: String,
    /// SHA-256 of `normalized_text`.
    pub text_hash: String,
}

impl Passage {
    /// Create a passage, computing its text hash.
    pub fn new(
        passage_id: PassageId,
        document_id: DocumentId,
        offset_range: OffsetRange,
        normalized_text: String,
    ) -> Self {
        let text_hash = compute_text_hash(&normalized_text);
        Self {
            passage_id,
            document_id,
            offset_range,
            normalized_text,
            text_hash,
        }
    }

    /// The qualified citation form `document#passage`.
    pub fn citation(&self) -> String {
        format!(
            "{}{}{}",
            self.document_id,
            crate::CITATION_SEPARATOR,
            self.passage_id
        )
    }

    /// Check that the stored text still hashes to the stored `text_hash`.
    pub fn verify_integrity(&self) -> HashValidation {
        validate_text_hash(&self.normalized_text, &self.text_hash)
    }
}

/// An ingested reference document (one revision of it).
///
/// Immutable once ingested. Re-ingesting different bytes under the same id
/// produces a new revision that supersedes this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDocument {
    /// Logical source identifier.
    pub id: DocumentId,
    /// Path or URI the bytes came from.
    pub source: String,
    /// SHA-256 of the raw ingested bytes.
    pub content_hash: String,
    /// 1-based revision counter under this id.
    pub revision: u32,
    /// When this revision was ingested.
    pub ingested_at: DateTime<Utc>,
    /// Passages in document order.
    pub passages: Vec<Passage>,
}

impl ReferenceDocument {
    /// Find a passage by id.
    pub fn passage(&self, passage_id: &PassageId) -> Option<&Passage> {
        self.passages.iter().find(|p| &p.passage_id == passage_id)
    }

    /// Number of passages.
    pub fn num_passages(&self) -> usize {
        self.passages.len()
    }
}

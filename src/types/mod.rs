//! Core types for the consistency kernel.

pub mod document;
pub mod manifest;
pub mod claim;
pub mod verdict;

pub use document::{DocumentId, PassageId, OffsetRange, Passage, ReferenceDocument, IdentifierError};
pub use manifest::{Manifest, ManifestEntry, Freshness, StaleEntry, StaleReason};
pub use claim::{
    Claim, ClaimAssertion, CitationRef, ClaimStatus, RejectionReason, Rejection,
    EvidenceCitation, BoundClaim, InvalidBoundClaim,
};
pub use verdict::{Verdict, OverallStatus, CheckState, AbortCode, AbortRecord, InvalidVerdict};

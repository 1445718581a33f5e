//! # soul-consistency-kernel
//!
//! Fail-closed, evidence-bound consistency checking of a target document
//! against a content-addressed corpus of reference standards.
//!
//! The kernel answers one question:
//!
//! > Does every claim made about this document cite a reference passage
//! > whose bytes are exactly the ones that were approved?
//!
//! ## Core Contract
//!
//! 1. Reference documents are ingested into an append-only, content-addressed store
//! 2. A manifest snapshots the exact revision and passage hashes that were approved
//! 3. A check sends a bounded request to an untrusted reasoning capability
//! 4. Every returned claim is bound to hash-verified passages or rejected
//! 5. The result is a [`Verdict`] that an auditor can re-verify without the kernel
//!
//! ## Architecture
//!
//! ```text
//! CheckRequest → ManifestManager (load + validate) → prompt (bounded)
//!                      ↓                                   ↓
//!               ReferenceStore                      ReasoningClient
//!                      ↓                                   ↓
//!               EvidenceBinder  ←──────────────  parse_response (strict)
//!                      ↓
//!                   Verdict (PASS / FAIL / INCONCLUSIVE)
//! ```
//!
//! ## Fail-closed Guarantees
//!
//! - `PASS` only when every claim is `VERIFIED` and none asserts non-conformance
//! - A stale manifest never reaches the reasoning capability
//! - Every expected failure is an `ABORTED` verdict with status `INCONCLUSIVE`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod canonical;
pub mod canonical_content;
pub mod segment;
pub mod store;
pub mod manifest;
pub mod binder;
pub mod reasoning;
pub mod prompt;
pub mod config;
pub mod kernel;
pub mod corpus;
pub mod bureau;
pub mod translation;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use types::{
    DocumentId, PassageId, OffsetRange, Passage, ReferenceDocument, IdentifierError,
    Manifest, ManifestEntry, Freshness, StaleEntry, StaleReason,
    Claim, ClaimAssertion, CitationRef, ClaimStatus, RejectionReason, Rejection,
    EvidenceCitation, BoundClaim, InvalidBoundClaim,
    Verdict, OverallStatus, CheckState, AbortCode, AbortRecord, InvalidVerdict,
};
pub use canonical::{to_canonical_bytes, canonical_hash, canonical_hash_hex};
pub use canonical_content::{
    CANONICAL_CONTENT_VERSION, normalize_text, compute_content_hash, compute_text_hash,
    hashes_equal, validate_text_hash, HashValidation,
};
pub use segment::{segment, SegmentationPolicy, SEGMENTATION_VERSION};
pub use store::{
    ReferenceStore, InMemoryReferenceStore, FileReferenceStore, IngestError, LookupError,
};
#[cfg(feature = "postgres")]
pub use store::PostgresReferenceStore;
pub use manifest::{
    ManifestManager, ValidatedManifest, ManifestError, ManifestStaleError,
    ManifestRepository, InMemoryManifestRepository, FileManifestRepository,
};
pub use binder::{EvidenceBinder, EvidenceResolutionError, AuditReport, AuditOutcome, CitationAudit};
pub use reasoning::{
    ReasoningClient, ReasoningRequest, IndexedPassage, ReasoningTransportError,
    ParsedResponse, SchemaViolation, parse_response, ScriptedReasoningClient,
};
#[cfg(feature = "service")]
pub use reasoning::HttpReasoningClient;
pub use prompt::PromptError;
pub use config::{KernelConfig, ConfigError};
pub use kernel::{ConsistencyKernel, CheckRequest, CancellationFlag, KernelError};
pub use corpus::ingest_directory;
pub use bureau::{Bureau, detect_bureau};

// Service re-exports (when service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, ServiceState};

/// Kernel version stamped on every verdict.
pub const KERNEL_VERSION: &str = "NS-DK-1.0";

/// Scope note stamped on every verdict.
pub const SCOPE_NOTE: &str = "TECHNICAL_DATA_CONSISTENCY_CHECK_ONLY";

/// Separator between document id and passage id in a qualified citation.
pub const CITATION_SEPARATOR: char = '#';

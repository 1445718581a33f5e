//! Claims from the reasoning capability and their bound (verified) form.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::document::{DocumentId, PassageId};

/// What a claim asserts about the target document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimAssertion {
    /// The target conforms to the cited reference.
    Conformant,
    /// The target is inconsistent with the cited reference.
    NonConformant,
}

/// A claim produced by the reasoning capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Id assigned by the reasoning capability, unique within a response.
    pub claim_id: String,
    /// The claim as stated.
    pub statement_text: String,
    /// Conformance or non-conformance.
    pub assertion: ClaimAssertion,
    /// Citations in the order given.
    pub cited_passage_ids: Vec<String>,
}

impl Claim {
    /// Whether the claim asserts non-conformance.
    pub fn asserts_non_conformance(&self) -> bool {
        self.assertion == ClaimAssertion::NonConformant
    }
}

/// A parsed citation string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CitationRef {
    /// `document#passage`.
    Qualified {
        /// Cited document.
        document_id: DocumentId,
        /// Cited passage.
        passage_id: PassageId,
    },
    /// A passage id without its document.
    Bare(PassageId),
}

impl CitationRef {
    /// Parse a citation. Returns `None` when it is not a valid citation at all.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.split_once(crate::CITATION_SEPARATOR) {
            Some((doc, passage)) => Some(Self::Qualified {
                document_id: DocumentId::new(doc).ok()?,
                passage_id: PassageId::new(passage).ok()?,
            }),
            None => PassageId::new(raw).ok().map(Self::Bare),
        }
    }

    /// The cited passage id.
    pub fn passage_id(&self) -> &PassageId {
        match self {
            Self::Qualified { passage_id, .. } => passage_id,
            Self::Bare(passage_id) => passage_id,
        }
    }
}

/// Verification status of a bound claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    /// Every citation resolved to a hash-verified passage.
    Verified,
    /// At least one citation could not be verified.
    Unverifiable,
}

/// Why a claim was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    /// The claim cites no passage.
    NoCitation,
    /// A citation does not resolve to a passage in the manifest.
    PassageNotFound,
    /// The live passage hash differs from the manifest-recorded hash.
    HashMismatch,
    /// The manifest was stale at validation time.
    ManifestStale,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCitation => write!(f, "NO_CITATION"),
            Self::PassageNotFound => write!(f, "PASSAGE_NOT_FOUND"),
            Self::HashMismatch => write!(f, "HASH_MISMATCH"),
            Self::ManifestStale => write!(f, "MANIFEST_STALE"),
        }
    }
}

/// Rejection details for an unverifiable claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Reason code.
    pub reason: RejectionReason,
    /// The citation that failed, if a specific one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    /// Human-readable detail.
    pub detail: String,
}

/// Resolved evidence for one citation.
///
/// Carries everything an auditor needs to re-check the citation against the
/// store without re-running the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceCitation {
    /// The citation as the claim gave it.
    pub cited_as: String,
    /// Resolved document.
    pub document_id: DocumentId,
    /// Resolved passage.
    pub passage_id: PassageId,
    /// Verified text hash.
    pub text_hash: String,
}

/// A claim annotated with its verification outcome.
///
/// Constructed only by the evidence binder; immutable afterwards.
/// Deserialized claims must have the shape the binder produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BoundClaimRecord")]
pub struct BoundClaim {
    claim: Claim,
    status: ClaimStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    evidence: Vec<EvidenceCitation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rejection: Option<Rejection>,
}

/// A bound claim that could not have come from the binder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid bound claim: {0}")]
pub struct InvalidBoundClaim(&'static str);

#[derive(Deserialize)]
struct BoundClaimRecord {
    claim: Claim,
    status: ClaimStatus,
    #[serde(default)]
    evidence: Vec<EvidenceCitation>,
    #[serde(default)]
    rejection: Option<Rejection>,
}

impl TryFrom<BoundClaimRecord> for BoundClaim {
    type Error = InvalidBoundClaim;

    fn try_from(record: BoundClaimRecord) -> Result<Self, Self::Error> {
        match (record.status, record.evidence.is_empty(), &record.rejection) {
            (ClaimStatus::Verified, false, None) => Ok(Self::verified(record.claim, record.evidence)),
            (ClaimStatus::Verified, _, _) => {
                Err(InvalidBoundClaim("verified claims carry evidence and no rejection"))
            }
            (ClaimStatus::Unverifiable, true, Some(_)) => Ok(Self {
                claim: record.claim,
                status: ClaimStatus::Unverifiable,
                evidence: Vec::new(),
                rejection: record.rejection,
            }),
            (ClaimStatus::Unverifiable, _, _) => {
                Err(InvalidBoundClaim("unverifiable claims carry a rejection and no evidence"))
            }
        }
    }
}

impl BoundClaim {
    pub(crate) fn verified(claim: Claim, evidence: Vec<EvidenceCitation>) -> Self {
        Self {
            claim,
            status: ClaimStatus::Verified,
            evidence,
            rejection: None,
        }
    }

    pub(crate) fn unverifiable(claim: Claim, rejection: Rejection) -> Self {
        Self {
            claim,
            status: ClaimStatus::Unverifiable,
            evidence: Vec::new(),
            rejection: Some(rejection),
        }
    }

    /// The underlying claim.
    pub fn claim(&self) -> &Claim {
        &self.claim
    }

    /// Verification status.
    pub fn status(&self) -> ClaimStatus {
        self.status
    }

    /// Whether the claim is verified.
    pub fn is_verified(&self) -> bool {
        self.status == ClaimStatus::Verified
    }

    /// Evidence citations (empty unless verified).
    pub fn evidence(&self) -> &[EvidenceCitation] {
        &self.evidence
    }

    /// Rejection details (present only when unverifiable).
    pub fn rejection(&self) -> Option<&Rejection> {
        self.rejection.as_ref()
    }

    /// Rejection reason code, if rejected.
    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        self.rejection.as_ref().map(|r| r.reason)
    }
}

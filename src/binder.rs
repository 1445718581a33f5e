//! Evidence binding: the gate between reasoning output and a verdict.
//!
//! Every claim passes through [`EvidenceBinder::bind`]. A claim is `VERIFIED`
//! only when every citation resolves, through the validated manifest, to a
//! passage whose live text hash equals the hash recorded in the manifest and
//! whose stored text still hashes to that value. Anything else yields
//! `UNVERIFIABLE` with a reason code. Binding never fails: store errors are
//! folded into rejections.

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical_content::{hashes_equal, HashValidation};
use crate::manifest::ValidatedManifest;
use crate::store::{LookupError, ReferenceStore};
use crate::types::{
    BoundClaim, CitationRef, Claim, DocumentId, EvidenceCitation, PassageId, Rejection,
    RejectionReason, Verdict,
};

/// Why a single citation failed to resolve.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvidenceResolutionError {
    /// Citation is not of the form `doc#P<n>` or `P<n>`.
    #[error("malformed citation {0:?}")]
    Malformed(String),
    /// The cited document is not part of the manifest.
    #[error("document {0} is not in the manifest")]
    DocumentNotInManifest(DocumentId),
    /// The manifest entry does not index the passage.
    #[error("passage {passage_id} is not indexed for {document_id}")]
    PassageNotInManifest {
        /// Cited document.
        document_id: DocumentId,
        /// Cited passage.
        passage_id: PassageId,
    },
    /// No manifest document has the bare passage id.
    #[error("no manifest document has passage {0}")]
    UnknownBarePassage(PassageId),
    /// More than one manifest document has the bare passage id.
    #[error("passage {passage_id} is ambiguous across {candidates} documents")]
    AmbiguousBarePassage {
        /// Cited passage.
        passage_id: PassageId,
        /// Number of documents having it.
        candidates: usize,
    },
    /// The store no longer has the passage.
    #[error("passage {document_id}#{passage_id} not found in store")]
    MissingFromStore {
        /// Resolved document.
        document_id: DocumentId,
        /// Resolved passage.
        passage_id: PassageId,
    },
    /// The store failed during lookup.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    /// Live hash differs from the manifest-recorded hash.
    #[error("live hash {live} differs from recorded hash {recorded}")]
    HashMismatch {
        /// Hash recorded in the manifest.
        recorded: String,
        /// Hash held by the store now.
        live: String,
    },
    /// Stored passage text no longer hashes to its stored hash.
    #[error("stored passage text does not match its hash (expected {expected}, computed {computed})")]
    CorruptPassage {
        /// Stored hash.
        expected: String,
        /// Hash of the stored text.
        computed: String,
    },
}

impl EvidenceResolutionError {
    /// Rejection reason code for this failure.
    pub fn reason(&self) -> RejectionReason {
        match self {
            Self::HashMismatch { .. } | Self::CorruptPassage { .. } => RejectionReason::HashMismatch,
            _ => RejectionReason::PassageNotFound,
        }
    }

    fn into_rejection(self, citation: &str) -> Rejection {
        Rejection {
            reason: self.reason(),
            citation: Some(citation.to_string()),
            detail: self.to_string(),
        }
    }
}

/// Outcome of re-checking one piece of evidence after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    /// The current revision still holds the passage with the same hash.
    Intact,
    /// The passage with that hash exists only in a superseded revision.
    Superseded {
        /// Revision that holds the evidence.
        revision: u32,
    },
    /// No revision of the document holds the passage with that hash.
    Missing,
}

/// Audit result for one evidence citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationAudit {
    /// Claim the evidence belongs to.
    pub claim_id: String,
    /// Evidence as recorded in the verdict.
    pub evidence: EvidenceCitation,
    /// What the store says now.
    pub outcome: AuditOutcome,
}

/// Report from [`EvidenceBinder::audit_verdict`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Check that produced the verdict.
    pub check_id: Uuid,
    /// One entry per evidence citation, in claim order.
    pub citations: Vec<CitationAudit>,
}

impl AuditReport {
    /// Whether every citation is still intact in the current store.
    pub fn is_intact(&self) -> bool {
        self.citations.iter().all(|c| c.outcome == AuditOutcome::Intact)
    }

    /// Whether any citation is missing entirely.
    pub fn has_missing(&self) -> bool {
        self.citations.iter().any(|c| c.outcome == AuditOutcome::Missing)
    }
}

/// Binds claims to hash-verified passages.
pub struct EvidenceBinder<S> {
    store: Arc<S>,
}

impl<S> Clone for EvidenceBinder<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ReferenceStore> EvidenceBinder<S> {
    /// Create a binder over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Bind one claim. Never fails; failures become `UNVERIFIABLE`.
    pub async fn bind(&self, claim: &Claim, manifest: &ValidatedManifest) -> BoundClaim {
        if let Err(stale) = manifest.require_fresh() {
            return reject(
                claim,
                Rejection {
                    reason: RejectionReason::ManifestStale,
                    citation: None,
                    detail: stale.to_string(),
                },
            );
        }

        if claim.cited_passage_ids.is_empty() {
            return reject(
                claim,
                Rejection {
                    reason: RejectionReason::NoCitation,
                    citation: None,
                    detail: "claim cites no passage".to_string(),
                },
            );
        }

        let mut evidence = Vec::with_capacity(claim.cited_passage_ids.len());
        for cited in &claim.cited_passage_ids {
            match self.resolve(cited, manifest).await {
                Ok(citation) => evidence.push(citation),
                Err(e) => return reject(claim, e.into_rejection(cited)),
            }
        }

        tracing::debug!(
            claim_id = %claim.claim_id,
            citations = evidence.len(),
            "Claim verified"
        );
        BoundClaim::verified(claim.clone(), evidence)
    }

    /// Bind every claim, preserving order.
    pub async fn bind_all(&self, claims: &[Claim], manifest: &ValidatedManifest) -> Vec<BoundClaim> {
        let mut bound = Vec::with_capacity(claims.len());
        for claim in claims {
            bound.push(self.bind(claim, manifest).await);
        }
        bound
    }

    /// Resolve a single citation string to verified evidence.
    pub async fn resolve(
        &self,
        cited: &str,
        manifest: &ValidatedManifest,
    ) -> Result<EvidenceCitation, EvidenceResolutionError> {
        let citation = CitationRef::parse(cited)
            .ok_or_else(|| EvidenceResolutionError::Malformed(cited.to_string()))?;
        let (document_id, passage_id, recorded) = locate(&citation, manifest)?;

        let live = self
            .store
            .lookup_passage(&document_id, &passage_id)
            .await
            .map_err(|e| match e {
                LookupError::DocumentNotFound(_) | LookupError::PassageNotFound { .. } => {
                    EvidenceResolutionError::MissingFromStore {
                        document_id: document_id.clone(),
                        passage_id: passage_id.clone(),
                    }
                }
                LookupError::Store(message) => EvidenceResolutionError::StoreUnavailable(message),
            })?;

        if !hashes_equal(&live.text_hash, &recorded) {
            return Err(EvidenceResolutionError::HashMismatch {
                recorded,
                live: live.text_hash,
            });
        }
        if let HashValidation::Mismatch { expected, computed } = live.verify_integrity() {
            return Err(EvidenceResolutionError::CorruptPassage { expected, computed });
        }

        Ok(EvidenceCitation {
            cited_as: cited.to_string(),
            document_id,
            passage_id,
            text_hash: recorded,
        })
    }

    /// Re-check every evidence citation of a verdict against the store.
    ///
    /// Evidence found only in an older revision is reported as superseded,
    /// so a verdict can still be traced after its references move on.
    pub async fn audit_verdict(&self, verdict: &Verdict) -> Result<AuditReport, LookupError> {
        let mut citations = Vec::new();

        for bound in verdict.bound_claims() {
            for evidence in bound.evidence() {
                let history = self
                    .store
                    .document_history(&evidence.document_id)
                    .await
                    .map_err(|e| LookupError::Store(e.to_string()))?;

                let holds = |revision: &crate::types::ReferenceDocument| {
                    revision
                        .passage(&evidence.passage_id)
                        .map(|p| {
                            hashes_equal(&p.text_hash, &evidence.text_hash)
                                && p.verify_integrity() == HashValidation::Valid
                        })
                        .unwrap_or(false)
                };

                let outcome = match history.last() {
                    Some(current) if holds(current) => AuditOutcome::Intact,
                    _ => history
                        .iter()
                        .rev()
                        .find(|r| holds(r))
                        .map(|r| AuditOutcome::Superseded { revision: r.revision })
                        .unwrap_or(AuditOutcome::Missing),
                };

                citations.push(CitationAudit {
                    claim_id: bound.claim().claim_id.clone(),
                    evidence: evidence.clone(),
                    outcome,
                });
            }
        }

        let report = AuditReport {
            check_id: verdict.check_id(),
            citations,
        };
        tracing::info!(
            check_id = %report.check_id,
            citations = report.citations.len(),
            intact = report.is_intact(),
            "Verdict audited"
        );
        Ok(report)
    }
}

fn reject(claim: &Claim, rejection: Rejection) -> BoundClaim {
    tracing::warn!(
        claim_id = %claim.claim_id,
        reason = %rejection.reason,
        citation = rejection.citation.as_deref().unwrap_or(""),
        detail = %rejection.detail,
        "Claim unverifiable"
    );
    BoundClaim::unverifiable(claim.clone(), rejection)
}

/// Resolve a citation to (document, passage, recorded hash) via the manifest.
fn locate(
    citation: &CitationRef,
    manifest: &ValidatedManifest,
) -> Result<(DocumentId, PassageId, String), EvidenceResolutionError> {
    let manifest = manifest.manifest();
    match citation {
        CitationRef::Qualified { document_id, passage_id } => {
            let (_, entry) = manifest
                .entry_for_document(document_id)
                .ok_or_else(|| EvidenceResolutionError::DocumentNotInManifest(document_id.clone()))?;
            let recorded = entry.recorded_hash(passage_id).ok_or_else(|| {
                EvidenceResolutionError::PassageNotInManifest {
                    document_id: document_id.clone(),
                    passage_id: passage_id.clone(),
                }
            })?;
            Ok((document_id.clone(), passage_id.clone(), recorded.to_string()))
        }
        CitationRef::Bare(passage_id) => {
            let candidates: Vec<_> = manifest
                .entries
                .values()
                .filter_map(|e| e.recorded_hash(passage_id).map(|h| (e, h)))
                .collect();
            match candidates.as_slice() {
                [(entry, recorded)] => Ok((
                    entry.document_id.clone(),
                    passage_id.clone(),
                    recorded.to_string(),
                )),
                [] => Err(EvidenceResolutionError::UnknownBarePassage(passage_id.clone())),
                many => Err(EvidenceResolutionError::AmbiguousBarePassage {
                    passage_id: passage_id.clone(),
                    candidates: many.len(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{InMemoryManifestRepository, ManifestManager};
    use crate::segment::SegmentationPolicy;
    use crate::store::InMemoryReferenceStore;
    use crate::types::{ClaimAssertion, ClaimStatus};

    const CRRG: &[u8] = b"Accounts must report Date of First Delinquency.\n\nStatus code 13 means paid.";

    struct Fixture {
        store: Arc<InMemoryReferenceStore>,
        manager: ManifestManager<InMemoryReferenceStore, InMemoryManifestRepository>,
        binder: EvidenceBinder<InMemoryReferenceStore>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryReferenceStore::new());
        store.ingest(CRRG, "crrg.md", &SegmentationPolicy::default()).await.unwrap();
        let manager = ManifestManager::new(
            Arc::clone(&store),
            Arc::new(InMemoryManifestRepository::new()),
        );
        let binder = EvidenceBinder::new(Arc::clone(&store));
        Fixture { store, manager, binder }
    }

    async fn validated(f: &Fixture, ids: &[&str]) -> ValidatedManifest {
        let ids: Vec<_> = ids.iter().map(|i| DocumentId::new(*i).unwrap()).collect();
        let manifest = f.manager.build_manifest(&ids).await.unwrap();
        f.manager.validate(manifest).await.unwrap()
    }

    fn claim(cites: &[&str]) -> Claim {
        Claim {
            claim_id: "C1".to_string(),
            statement_text: "DOFD is reported".to_string(),
            assertion: ClaimAssertion::Conformant,
            cited_passage_ids: cites.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_bare_and_qualified_citations_verify() {
        let f = fixture().await;
        let manifest = validated(&f, &["crrg.md"]).await;

        let bound = f.binder.bind(&claim(&["P1", "crrg.md#P2"]), &manifest).await;
        assert_eq!(bound.status(), ClaimStatus::Verified);
        assert_eq!(bound.evidence().len(), 2);
        assert_eq!(bound.evidence()[0].document_id.as_str(), "crrg.md");
        assert_eq!(bound.evidence()[1].cited_as, "crrg.md#P2");
    }

    #[tokio::test]
    async fn test_no_citation() {
        let f = fixture().await;
        let manifest = validated(&f, &["crrg.md"]).await;
        let bound = f.binder.bind(&claim(&[]), &manifest).await;
        assert_eq!(bound.rejection_reason(), Some(RejectionReason::NoCitation));
    }

    #[tokio::test]
    async fn test_unknown_passage() {
        let f = fixture().await;
        let manifest = validated(&f, &["crrg.md"]).await;

        for cite in ["P99", "crrg.md#P99", "other.md#P1", "not a citation"] {
            let bound = f.binder.bind(&claim(&["P1", cite]), &manifest).await;
            assert_eq!(bound.rejection_reason(), Some(RejectionReason::PassageNotFound), "{}", cite);
            assert_eq!(bound.rejection().unwrap().citation.as_deref(), Some(cite));
            assert!(bound.evidence().is_empty());
        }
    }

    #[tokio::test]
    async fn test_ambiguous_bare_citation() {
        let f = fixture().await;
        f.store
            .ingest(b"Metro 2 base segment.", "metro2.md", &SegmentationPolicy::default())
            .await
            .unwrap();
        let manifest = validated(&f, &["crrg.md", "metro2.md"]).await;

        let bound = f.binder.bind(&claim(&["P1"]), &manifest).await;
        assert_eq!(bound.rejection_reason(), Some(RejectionReason::PassageNotFound));
        assert!(bound.rejection().unwrap().detail.contains("ambiguous"));

        // P2 exists only in crrg.md.
        let bound = f.binder.bind(&claim(&["P2"]), &manifest).await;
        assert!(bound.is_verified());
    }

    #[tokio::test]
    async fn test_stale_manifest_rejects_every_claim() {
        let f = fixture().await;
        let ids = [DocumentId::new("crrg.md").unwrap()];
        let manifest = f.manager.build_manifest(&ids).await.unwrap();
        f.store
            .ingest(b"Accounts may report DOFD.", "crrg.md", &SegmentationPolicy::default())
            .await
            .unwrap();
        let stale = f.manager.validate(manifest).await.unwrap();

        let bound = f.binder.bind(&claim(&["P1"]), &stale).await;
        assert_eq!(bound.rejection_reason(), Some(RejectionReason::ManifestStale));
    }

    #[tokio::test]
    async fn test_live_hash_differs_from_recorded() {
        let f = fixture().await;
        let manifest = validated(&f, &["crrg.md"]).await;

        // Same content hash, different passage text: the manifest stays fresh
        // but the passage no longer matches what was recorded.
        let mut doc = f.store.lookup(&DocumentId::new("crrg.md").unwrap()).await.unwrap();
        doc.passages[0] = crate::types::Passage::new(
            doc.passages[0].passage_id.clone(),
            doc.id.clone(),
            doc.passages[0].offset_range,
            "Accounts may skip Date of First Delinquency.".to_string(),
        );
        f.store.overwrite_current(doc);

        let bound = f.binder.bind(&claim(&["P1"]), &manifest).await;
        assert_eq!(bound.rejection_reason(), Some(RejectionReason::HashMismatch));
        let bound = f.binder.bind(&claim(&["P2"]), &manifest).await;
        assert!(bound.is_verified());
    }

    #[tokio::test]
    async fn test_corrupt_passage_text() {
        let f = fixture().await;
        let manifest = validated(&f, &["crrg.md"]).await;

        let mut doc = f.store.lookup(&DocumentId::new("crrg.md").unwrap()).await.unwrap();
        doc.passages[1].normalized_text = "Status code 13 means charged off.".to_string();
        f.store.overwrite_current(doc);

        let bound = f.binder.bind(&claim(&["P2"]), &manifest).await;
        assert_eq!(bound.rejection_reason(), Some(RejectionReason::HashMismatch));
        assert!(bound.rejection().unwrap().detail.contains("does not match its hash"));
    }

    #[tokio::test]
    async fn test_bind_all_preserves_order() {
        let f = fixture().await;
        let manifest = validated(&f, &["crrg.md"]).await;
        let mut second = claim(&["P99"]);
        second.claim_id = "C2".to_string();

        let bound = f.binder.bind_all(&[claim(&["P1"]), second], &manifest).await;
        assert_eq!(bound.len(), 2);
        assert_eq!(bound[0].claim().claim_id, "C1");
        assert!(bound[0].is_verified());
        assert_eq!(bound[1].claim().claim_id, "C2");
        assert!(!bound[1].is_verified());
    }

    #[test]
    fn test_resolution_error_reason_codes() {
        let mismatch = EvidenceResolutionError::HashMismatch {
            recorded: "a".to_string(),
            live: "b".to_string(),
        };
        assert_eq!(mismatch.reason(), RejectionReason::HashMismatch);
        assert_eq!(
            EvidenceResolutionError::StoreUnavailable("down".to_string()).reason(),
            RejectionReason::PassageNotFound
        );
    }
}

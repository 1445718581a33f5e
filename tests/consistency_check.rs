//! End-to-end consistency checks through the public API.
//!
//! The reasoning capability is replaced by a scripted client so every
//! scenario is deterministic.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;

use consistency_kernel::reasoning::scripted::ScriptedReply;
use consistency_kernel::{
    AbortCode, AuditOutcome, CheckRequest, CheckState, Claim, ClaimAssertion, ClaimStatus,
    ConsistencyKernel, DocumentId, EvidenceBinder, FileManifestRepository, FileReferenceStore,
    InMemoryManifestRepository, InMemoryReferenceStore, KernelConfig, Manifest, ManifestManager,
    OverallStatus, ReferenceStore, RejectionReason, ScriptedReasoningClient, SegmentationPolicy,
};

type Kernel = ConsistencyKernel<InMemoryReferenceStore, InMemoryManifestRepository, ScriptedReasoningClient>;

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

const METRO2: &str = "Accounts must report Date of First Delinquency\n\nAccount status 13 means paid or closed.";

fn reply(assertion: &str, cites: &[&str]) -> ScriptedReply {
    let body = serde_json::json!({
        "confidence": 0.92,
        "claims": [{
            "claim_id": "C1",
            "statement": "The tradeline reports a Date of First Delinquency",
            "assertion": assertion,
            "cited_passage_ids": cites,
        }]
    });
    ScriptedReply::Respond(body.to_string())
}

async fn setup(replies: Vec<ScriptedReply>) -> (Kernel, Arc<InMemoryReferenceStore>) {
    let config = KernelConfig {
        retry_backoff_ms: 1,
        ..Default::default()
    };
    let store = Arc::new(InMemoryReferenceStore::new());
    store
        .ingest(METRO2.as_bytes(), "metro2.md", &config.segmentation_policy())
        .await
        .unwrap();

    let kernel = ConsistencyKernel::new(
        Arc::clone(&store),
        Arc::new(InMemoryManifestRepository::new()),
        Arc::new(ScriptedReasoningClient::new(replies)),
        config,
    )
    .unwrap();
    let manifest = kernel
        .manifests()
        .build_manifest(&[DocumentId::new("metro2.md").unwrap()])
        .await
        .unwrap();
    kernel.manifests().save("soul", &manifest).await.unwrap();
    (kernel, store)
}

fn check_request() -> CheckRequest {
    CheckRequest {
        target_document_ref: "credit_report.pdf".to_string(),
        target_text: "Account 1234: DOFD 2021-03-01, status 11".to_string(),
        manifest_ref: "soul".to_string(),
    }
}

fn claim(cites: &[&str]) -> Claim {
    Claim {
        claim_id: "C1".to_string(),
        statement_text: "DOFD present".to_string(),
        assertion: ClaimAssertion::Conformant,
        cited_passage_ids: cites.iter().map(|c| c.to_string()).collect(),
    }
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_conformant_claim_citing_p1_passes() {
    let (kernel, _) = setup(vec![reply("CONFORMANT", &["P1"])]).await;

    let verdict = kernel.check(check_request()).await;
    assert_eq!(verdict.overall_status(), OverallStatus::Pass);
    assert_eq!(verdict.terminal_state(), CheckState::VerdictEmitted);
    assert_eq!(verdict.bound_claims().len(), 1);

    let bound = &verdict.bound_claims()[0];
    assert_eq!(bound.status(), ClaimStatus::Verified);
    assert_eq!(bound.evidence()[0].passage_id.as_str(), "P1");
    assert_eq!(bound.evidence()[0].document_id.as_str(), "metro2.md");
}

#[tokio::test]
async fn test_nonexistent_passage_is_inconclusive() {
    let (kernel, _) = setup(vec![reply("CONFORMANT", &["P99"])]).await;

    let verdict = kernel.check(check_request()).await;
    assert_eq!(verdict.overall_status(), OverallStatus::Inconclusive);
    let bound = &verdict.bound_claims()[0];
    assert_eq!(bound.status(), ClaimStatus::Unverifiable);
    assert_eq!(bound.rejection_reason(), Some(RejectionReason::PassageNotFound));
}

#[tokio::test]
async fn test_schema_failure_aborts() {
    let reply = ScriptedReply::Respond("The report looks compliant to me.".to_string());
    let (kernel, _) = setup(vec![reply]).await;

    let verdict = kernel.check(check_request()).await;
    assert_eq!(verdict.overall_status(), OverallStatus::Inconclusive);
    assert_eq!(verdict.terminal_state(), CheckState::Aborted);
    assert_eq!(verdict.abort().map(|a| a.code), Some(AbortCode::ReasoningSchema));
    assert!(verdict.bound_claims().is_empty());
}

#[tokio::test]
async fn test_stale_manifest_never_reaches_reasoning() {
    let (kernel, store) = setup(vec![reply("CONFORMANT", &["P1"])]).await;
    store
        .ingest(b"Accounts must report DOFD within 30 days", "metro2.md", &SegmentationPolicy::default())
        .await
        .unwrap();

    let verdict = kernel.check(check_request()).await;
    assert_eq!(verdict.overall_status(), OverallStatus::Inconclusive);
    assert_eq!(verdict.abort().map(|a| a.code), Some(AbortCode::ManifestStale));
}

#[tokio::test]
async fn test_audit_detects_superseded_evidence() {
    let (kernel, store) = setup(vec![reply("CONFORMANT", &["metro2.md#P1"])]).await;
    let verdict = kernel.check(check_request()).await;
    assert!(kernel.audit_verdict(&verdict).await.unwrap().is_intact());

    store
        .ingest(b"Date of First Delinquency is optional", "metro2.md", &SegmentationPolicy::default())
        .await
        .unwrap();
    let report = kernel.audit_verdict(&verdict).await.unwrap();
    assert!(!report.is_intact());
    assert!(matches!(report.citations[0].outcome, AuditOutcome::Superseded { .. }));
}

#[tokio::test]
async fn test_tampered_manifest_hash_is_rejected() {
    let store = Arc::new(InMemoryReferenceStore::new());
    let document = store
        .ingest(METRO2.as_bytes(), "metro2.md", &SegmentationPolicy::default())
        .await
        .unwrap();
    let manager = ManifestManager::new(Arc::clone(&store), Arc::new(InMemoryManifestRepository::new()));

    let mut built = manager.build_manifest(&[document.id.clone()]).await.unwrap();
    let mut entries: BTreeMap<_, _> = std::mem::take(&mut built.entries);
    for entry in entries.values_mut() {
        for hash in entry.passages.values_mut() {
            *hash = "0".repeat(64);
        }
    }
    let tampered = Manifest::new(entries, Utc::now());
    let validated = manager.validate(tampered).await.unwrap();
    assert!(validated.is_fresh());

    let bound = EvidenceBinder::new(store).bind(&claim(&["P1"]), &validated).await;
    assert_eq!(bound.rejection_reason(), Some(RejectionReason::HashMismatch));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let policy = SegmentationPolicy::default();
    let version = {
        let store = Arc::new(FileReferenceStore::open(tmp.path().join("documents")).unwrap());
        let repository = Arc::new(FileManifestRepository::open(tmp.path().join("manifests")).unwrap());
        store.ingest(METRO2.as_bytes(), "metro2.md", &policy).await.unwrap();

        let manager = ManifestManager::new(store, repository);
        let manifest = manager
            .build_manifest(&[DocumentId::new("metro2.md").unwrap()])
            .await
            .unwrap();
        manager.save("soul", &manifest).await.unwrap();
        manifest.manifest_version
    };

    let store = Arc::new(FileReferenceStore::open(tmp.path().join("documents")).unwrap());
    let repository = Arc::new(FileManifestRepository::open(tmp.path().join("manifests")).unwrap());
    let manager = ManifestManager::new(store, repository);
    let validated = manager.load_validated("soul").await.unwrap();
    assert!(validated.is_fresh());
    assert_eq!(validated.manifest_version(), version);
}

// ─────────────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────────────

fn passage_text() -> impl Strategy<Value = String> {
    "[a-z]{1,8}( [a-z]{1,8}){0,6}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_reingest_is_idempotent(text in passage_text()) {
        block_on(async {
            let store = InMemoryReferenceStore::new();
            let policy = SegmentationPolicy::default();
            let first = store.ingest(text.as_bytes(), "doc.md", &policy).await.unwrap();
            let second = store.ingest(text.as_bytes(), "doc.md", &policy).await.unwrap();
            assert_eq!(first, second);
            assert_eq!(second.revision, 1);
            assert_eq!(store.num_revisions(), 1);
        });
    }

    #[test]
    fn prop_changed_content_marks_entry_stale(old in passage_text(), new in passage_text()) {
        prop_assume!(old != new);
        block_on(async {
            let store = Arc::new(InMemoryReferenceStore::new());
            let policy = SegmentationPolicy::default();
            store.ingest(old.as_bytes(), "doc.md", &policy).await.unwrap();
            let manager = ManifestManager::new(Arc::clone(&store), Arc::new(InMemoryManifestRepository::new()));
            let manifest = manager
                .build_manifest(&[DocumentId::new("doc.md").unwrap()])
                .await
                .unwrap();

            store.ingest(new.as_bytes(), "doc.md", &policy).await.unwrap();
            let validated = manager.validate(manifest).await.unwrap();
            assert!(!validated.is_fresh());
            assert_eq!(validated.freshness().stale_entries().len(), 1);
        });
    }

    #[test]
    fn prop_uncited_claim_is_unverifiable(text in passage_text(), statement in ".{0,40}") {
        block_on(async {
            let store = Arc::new(InMemoryReferenceStore::new());
            store.ingest(text.as_bytes(), "doc.md", &SegmentationPolicy::default()).await.unwrap();
            let manager = ManifestManager::new(Arc::clone(&store), Arc::new(InMemoryManifestRepository::new()));
            let manifest = manager
                .build_manifest(&[DocumentId::new("doc.md").unwrap()])
                .await
                .unwrap();
            let validated = manager.validate(manifest).await.unwrap();

            let mut uncited = claim(&[]);
            uncited.statement_text = statement;
            let bound = EvidenceBinder::new(store).bind(&uncited, &validated).await;
            assert_eq!(bound.status(), ClaimStatus::Unverifiable);
            assert_eq!(bound.rejection_reason(), Some(RejectionReason::NoCitation));
        });
    }

    #[test]
    fn prop_stale_checks_are_inconclusive(new in passage_text(), cites in prop::collection::vec("P[0-9]", 0..3)) {
        block_on(async {
            let cites: Vec<&str> = cites.iter().map(String::as_str).collect();
            let (kernel, store) = setup(vec![reply("CONFORMANT", &cites)]).await;
            store.ingest(new.as_bytes(), "metro2.md", &SegmentationPolicy::default()).await.unwrap();

            let verdict = kernel.check(check_request()).await;
            assert_eq!(verdict.overall_status(), OverallStatus::Inconclusive);
        });
    }
}

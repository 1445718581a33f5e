//! The evidence-bound verdict: the only artifact a check emits.
//!
//! ## Fail-closed
//!
//! `Verdict` has no public constructor. The kernel builds it through
//! [`Verdict::emitted`], which derives `overall_status` from the bound claims,
//! or [`Verdict::aborted`], which is always `INCONCLUSIVE`. A `PASS` can
//! therefore only exist when every bound claim is `VERIFIED`.
//!
//! Deserialized verdicts are untrusted input. They are accepted only when
//! their stored status matches the status derived from their claims and
//! their terminal state agrees with the abort record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::claim::{BoundClaim, ClaimStatus};
use crate::bureau::Bureau;
use crate::{KERNEL_VERSION, SCOPE_NOTE};

/// Overall outcome of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    /// Every claim verified, none asserts non-conformance.
    Pass,
    /// A verified claim asserts non-conformance.
    Fail,
    /// Evidence was missing, unverifiable, or the check aborted.
    Inconclusive,
}

impl OverallStatus {
    /// Derive the overall status from bound claims.
    ///
    /// A verified non-conformance is a finding and yields `FAIL` even when
    /// other claims are unverifiable. Otherwise any unverifiable claim, or no
    /// claims at all, yields `INCONCLUSIVE`.
    pub fn from_bound_claims(bound_claims: &[BoundClaim]) -> Self {
        if bound_claims.is_empty() {
            return Self::Inconclusive;
        }
        let verified_finding = bound_claims
            .iter()
            .any(|b| b.is_verified() && b.claim().asserts_non_conformance());
        if verified_finding {
            return Self::Fail;
        }
        if bound_claims.iter().any(|b| b.status() == ClaimStatus::Unverifiable) {
            return Self::Inconclusive;
        }
        Self::Pass
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Inconclusive => write!(f, "INCONCLUSIVE"),
        }
    }
}

/// States of a single check invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckState {
    /// Nothing done yet.
    Init,
    /// Manifest loaded and validated fresh.
    ManifestLoaded,
    /// Bounded request assembled.
    PromptBuilt,
    /// Reasoning response parsed into claims.
    ResponseReceived,
    /// Every claim passed through the evidence binder.
    ClaimsBound,
    /// Terminal: verdict derived from bound claims.
    VerdictEmitted,
    /// Terminal: check aborted, verdict is INCONCLUSIVE.
    Aborted,
}

impl CheckState {
    /// Whether this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::VerdictEmitted | Self::Aborted)
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::ManifestLoaded => "MANIFEST_LOADED",
            Self::PromptBuilt => "PROMPT_BUILT",
            Self::ResponseReceived => "RESPONSE_RECEIVED",
            Self::ClaimsBound => "CLAIMS_BOUND",
            Self::VerdictEmitted => "VERDICT_EMITTED",
            Self::Aborted => "ABORTED",
        };
        write!(f, "{}", s)
    }
}

/// Why a check aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbortCode {
    /// No manifest under the requested ref.
    ManifestNotFound,
    /// Manifest could not be read or failed its integrity check.
    ManifestUnavailable,
    /// Manifest drifted from the reference store.
    ManifestStale,
    /// Reference store failed while assembling the request.
    StoreUnavailable,
    /// The request does not fit the configured budget.
    PromptBudgetExceeded,
    /// Transport failures exhausted the retry budget.
    ReasoningTransport,
    /// The reasoning call timed out.
    ReasoningTimeout,
    /// The response did not match the claim schema.
    ReasoningSchema,
    /// Response confidence below the gate.
    ConfidenceGate,
    /// The response contained no claims.
    EmptyResponse,
    /// The caller cancelled the check.
    Cancelled,
}

impl fmt::Display for AbortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ManifestNotFound => "MANIFEST_NOT_FOUND",
            Self::ManifestUnavailable => "MANIFEST_UNAVAILABLE",
            Self::ManifestStale => "MANIFEST_STALE",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::PromptBudgetExceeded => "PROMPT_BUDGET_EXCEEDED",
            Self::ReasoningTransport => "REASONING_TRANSPORT",
            Self::ReasoningTimeout => "REASONING_TIMEOUT",
            Self::ReasoningSchema => "REASONING_SCHEMA",
            Self::ConfidenceGate => "CONFIDENCE_GATE",
            Self::EmptyResponse => "EMPTY_RESPONSE",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Structured abort reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortRecord {
    /// State the check was in when it aborted.
    pub state: CheckState,
    /// Abort code.
    pub code: AbortCode,
    /// Human-readable detail.
    pub detail: String,
}

/// Identity of a check, fixed at INIT.
#[derive(Debug, Clone)]
pub(crate) struct VerdictContext {
    pub check_id: Uuid,
    pub target_document_ref: String,
    pub manifest_version: Option<String>,
    pub config_fingerprint: String,
    pub bureau: Bureau,
}

/// Evidence-bound verdict for one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VerdictRecord")]
pub struct Verdict {
    check_id: Uuid,
    target_document_ref: String,
    manifest_version_used: Option<String>,
    overall_status: OverallStatus,
    bound_claims: Vec<BoundClaim>,
    generated_at: DateTime<Utc>,
    kernel_version: String,
    scope: String,
    config_fingerprint: String,
    bureau: Bureau,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    terminal_state: CheckState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    abort: Option<AbortRecord>,
}

/// A deserialized verdict the kernel could not have emitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid verdict: {0}")]
pub struct InvalidVerdict(String);

#[derive(Deserialize)]
struct VerdictRecord {
    check_id: Uuid,
    target_document_ref: String,
    manifest_version_used: Option<String>,
    overall_status: OverallStatus,
    bound_claims: Vec<BoundClaim>,
    generated_at: DateTime<Utc>,
    kernel_version: String,
    scope: String,
    config_fingerprint: String,
    bureau: Bureau,
    #[serde(default)]
    confidence: Option<f64>,
    terminal_state: CheckState,
    #[serde(default)]
    abort: Option<AbortRecord>,
}

impl TryFrom<VerdictRecord> for Verdict {
    type Error = InvalidVerdict;

    fn try_from(record: VerdictRecord) -> Result<Self, Self::Error> {
        match (record.terminal_state, &record.abort) {
            (CheckState::Aborted, Some(_)) => {
                if record.overall_status != OverallStatus::Inconclusive || !record.bound_claims.is_empty() {
                    return Err(InvalidVerdict(
                        "aborted verdicts are INCONCLUSIVE and carry no claims".to_string(),
                    ));
                }
            }
            (CheckState::VerdictEmitted, None) => {
                let derived = OverallStatus::from_bound_claims(&record.bound_claims);
                if record.overall_status != derived {
                    return Err(InvalidVerdict(format!(
                        "status {} does not match {} derived from claims",
                        record.overall_status, derived
                    )));
                }
            }
            (state, _) => {
                return Err(InvalidVerdict(format!(
                    "terminal state {} does not agree with abort record",
                    state
                )));
            }
        }

        Ok(Self {
            check_id: record.check_id,
            target_document_ref: record.target_document_ref,
            manifest_version_used: record.manifest_version_used,
            overall_status: record.overall_status,
            bound_claims: record.bound_claims,
            generated_at: record.generated_at,
            kernel_version: record.kernel_version,
            scope: record.scope,
            config_fingerprint: record.config_fingerprint,
            bureau: record.bureau,
            confidence: record.confidence,
            terminal_state: record.terminal_state,
            abort: record.abort,
        })
    }
}

impl Verdict {
    /// Verdict at VERDICT_EMITTED; status is derived, never supplied.
    pub(crate) fn emitted(
        context: VerdictContext,
        bound_claims: Vec<BoundClaim>,
        confidence: f64,
    ) -> Self {
        let overall_status = OverallStatus::from_bound_claims(&bound_claims);
        Self::build(context, overall_status, bound_claims, Some(confidence), CheckState::VerdictEmitted, None)
    }

    /// Verdict at ABORTED; always INCONCLUSIVE and carries no claims.
    pub(crate) fn aborted(context: VerdictContext, abort: AbortRecord, confidence: Option<f64>) -> Self {
        Self::build(
            context,
            OverallStatus::Inconclusive,
            Vec::new(),
            confidence,
            CheckState::Aborted,
            Some(abort),
        )
    }

    fn build(
        context: VerdictContext,
        overall_status: OverallStatus,
        bound_claims: Vec<BoundClaim>,
        confidence: Option<f64>,
        terminal_state: CheckState,
        abort: Option<AbortRecord>,
    ) -> Self {
        Self {
            check_id: context.check_id,
            target_document_ref: context.target_document_ref,
            manifest_version_used: context.manifest_version,
            overall_status,
            bound_claims,
            generated_at: Utc::now(),
            kernel_version: KERNEL_VERSION.to_string(),
            scope: SCOPE_NOTE.to_string(),
            config_fingerprint: context.config_fingerprint,
            bureau: context.bureau,
            confidence,
            terminal_state,
            abort,
        }
    }

    /// Check id (for log correlation).
    pub fn check_id(&self) -> Uuid {
        self.check_id
    }

    /// Caller-supplied reference to the target document.
    pub fn target_document_ref(&self) -> &str {
        &self.target_document_ref
    }

    /// Version of the manifest used, if one was loaded.
    pub fn manifest_version_used(&self) -> Option<&str> {
        self.manifest_version_used.as_deref()
    }

    /// Overall status.
    pub fn overall_status(&self) -> OverallStatus {
        self.overall_status
    }

    /// Bound claims in response order.
    pub fn bound_claims(&self) -> &[BoundClaim] {
        &self.bound_claims
    }

    /// Construction time.
    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Kernel version that produced the verdict.
    pub fn kernel_version(&self) -> &str {
        &self.kernel_version
    }

    /// Scope note.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Fingerprint of the kernel configuration.
    pub fn config_fingerprint(&self) -> &str {
        &self.config_fingerprint
    }

    /// Bureau detected in the target document.
    pub fn bureau(&self) -> Bureau {
        self.bureau
    }

    /// Reported confidence, if a response was parsed.
    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    /// Terminal state.
    pub fn terminal_state(&self) -> CheckState {
        self.terminal_state
    }

    /// Abort details, if aborted.
    pub fn abort(&self) -> Option<&AbortRecord> {
        self.abort.as_ref()
    }

    /// Whether the check aborted.
    pub fn is_aborted(&self) -> bool {
        self.terminal_state == CheckState::Aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::claim::{Claim, ClaimAssertion, EvidenceCitation, Rejection, RejectionReason};
    use crate::types::document::{DocumentId, PassageId};
    use proptest::prelude::*;

    fn claim(id: &str, assertion: ClaimAssertion) -> Claim {
        Claim {
            claim_id: id.to_string(),
            statement_text: format!("statement {}", id),
            assertion,
            cited_passage_ids: vec!["P1".to_string()],
        }
    }

    fn verified(id: &str, assertion: ClaimAssertion) -> BoundClaim {
        BoundClaim::verified(
            claim(id, assertion),
            vec![EvidenceCitation {
                cited_as: "P1".to_string(),
                document_id: DocumentId::new("crrg.md").unwrap(),
                passage_id: PassageId::from_ordinal(1),
                text_hash: "ab".repeat(32),
            }],
        )
    }

    fn unverifiable(id: &str, assertion: ClaimAssertion) -> BoundClaim {
        BoundClaim::unverifiable(
            claim(id, assertion),
            Rejection {
                reason: RejectionReason::PassageNotFound,
                citation: Some("P99".to_string()),
                detail: "not found".to_string(),
            },
        )
    }

    fn context() -> VerdictContext {
        VerdictContext {
            check_id: Uuid::new_v4(),
            target_document_ref: "report.txt".to_string(),
            manifest_version: Some("0123456789abcdef".to_string()),
            config_fingerprint: "fedcba9876543210".to_string(),
            bureau: Bureau::Unknown,
        }
    }

    #[test]
    fn test_all_verified_conformant_passes() {
        let claims = vec![
            verified("C1", ClaimAssertion::Conformant),
            verified("C2", ClaimAssertion::Conformant),
        ];
        assert_eq!(OverallStatus::from_bound_claims(&claims), OverallStatus::Pass);
    }

    #[test]
    fn test_unverifiable_forces_inconclusive() {
        let claims = vec![
            verified("C1", ClaimAssertion::Conformant),
            unverifiable("C2", ClaimAssertion::Conformant),
        ];
        assert_eq!(
            OverallStatus::from_bound_claims(&claims),
            OverallStatus::Inconclusive
        );
    }

    #[test]
    fn test_verified_non_conformance_fails() {
        let claims = vec![
            verified("C1", ClaimAssertion::NonConformant),
            unverifiable("C2", ClaimAssertion::Conformant),
        ];
        assert_eq!(OverallStatus::from_bound_claims(&claims), OverallStatus::Fail);
    }

    #[test]
    fn test_unverified_non_conformance_is_not_a_finding() {
        let claims = vec![unverifiable("C1", ClaimAssertion::NonConformant)];
        assert_eq!(
            OverallStatus::from_bound_claims(&claims),
            OverallStatus::Inconclusive
        );
    }

    #[test]
    fn test_no_claims_is_inconclusive() {
        assert_eq!(
            OverallStatus::from_bound_claims(&[]),
            OverallStatus::Inconclusive
        );
    }

    #[test]
    fn test_aborted_verdict_shape() {
        let verdict = Verdict::aborted(
            context(),
            AbortRecord {
                state: CheckState::PromptBuilt,
                code: AbortCode::ReasoningSchema,
                detail: "not json".to_string(),
            },
            None,
        );
        assert_eq!(verdict.overall_status(), OverallStatus::Inconclusive);
        assert!(verdict.is_aborted());
        assert!(verdict.bound_claims().is_empty());
        assert_eq!(verdict.scope(), SCOPE_NOTE);

        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["overall_status"], "INCONCLUSIVE");
        assert_eq!(json["terminal_state"], "ABORTED");
        assert_eq!(json["abort"]["code"], "REASONING_SCHEMA");
        assert_eq!(json["abort"]["state"], "PROMPT_BUILT");
    }

    #[test]
    fn test_verdict_json_round_trip() {
        let verdict = Verdict::emitted(
            context(),
            vec![verified("C1", ClaimAssertion::Conformant)],
            0.93,
        );
        let json = serde_json::to_string(&verdict).unwrap();
        let back: Verdict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, verdict);
        assert_eq!(back.overall_status(), OverallStatus::Pass);
        assert_eq!(back.terminal_state(), CheckState::VerdictEmitted);
    }

    #[test]
    fn test_forged_pass_is_rejected() {
        let verdict = Verdict::emitted(
            context(),
            vec![unverifiable("C1", ClaimAssertion::Conformant)],
            0.9,
        );
        let mut json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["overall_status"], "INCONCLUSIVE");

        json["overall_status"] = "PASS".into();
        let err = serde_json::from_value::<Verdict>(json).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_aborted_verdict_with_claims_is_rejected() {
        let verdict = Verdict::aborted(
            context(),
            AbortRecord {
                state: CheckState::ManifestLoaded,
                code: AbortCode::ManifestStale,
                detail: "stale".to_string(),
            },
            None,
        );
        let mut json = serde_json::to_value(&verdict).unwrap();
        let claim = serde_json::to_value(verified("C1", ClaimAssertion::Conformant)).unwrap();
        json["bound_claims"] = serde_json::Value::Array(vec![claim]);
        assert!(serde_json::from_value::<Verdict>(json).is_err());
    }

    #[test]
    fn test_verified_claim_without_evidence_is_rejected() {
        let mut json = serde_json::to_value(verified("C1", ClaimAssertion::Conformant)).unwrap();
        json.as_object_mut().unwrap().remove("evidence");
        let err = serde_json::from_value::<BoundClaim>(json).unwrap_err();
        assert!(err.to_string().contains("verified claims carry evidence"));
    }

    proptest! {
        #[test]
        fn prop_pass_implies_all_verified(spec in proptest::collection::vec((any::<bool>(), any::<bool>()), 0..12)) {
            let claims: Vec<BoundClaim> = spec
                .iter()
                .enumerate()
                .map(|(i, (is_verified, conformant))| {
                    let assertion = if *conformant { ClaimAssertion::Conformant } else { ClaimAssertion::NonConformant };
                    let id = format!("C{}", i);
                    if *is_verified { verified(&id, assertion) } else { unverifiable(&id, assertion) }
                })
                .collect();

            let verdict = Verdict::emitted(context(), claims, 0.9);
            if verdict.overall_status() == OverallStatus::Pass {
                prop_assert!(!verdict.bound_claims().is_empty());
                prop_assert!(verdict.bound_claims().iter().all(|b| b.is_verified()));
            }
        }
    }
}

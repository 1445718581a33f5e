//! The consistency-check kernel.
//!
//! Drives one check through
//! `INIT → MANIFEST_LOADED → PROMPT_BUILT → RESPONSE_RECEIVED → CLAIMS_BOUND → VERDICT_EMITTED`,
//! with `ABORTED` reachable from every non-terminal state.
//!
//! ## Fail-closed
//!
//! [`ConsistencyKernel::check`] always returns a [`Verdict`]. Every expected
//! failure (missing or stale manifest, budget overflow, transport error,
//! timeout, schema failure, low confidence, cancellation) becomes an
//! `ABORTED` verdict with status `INCONCLUSIVE`. Only configuration errors,
//! caught at construction, are surfaced as [`KernelError`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::binder::{AuditReport, EvidenceBinder};
use crate::bureau::detect_bureau;
use crate::config::{ConfigError, KernelConfig};
use crate::manifest::{ManifestError, ManifestManager, ManifestRepository};
use crate::prompt::{self, PromptError};
use crate::reasoning::{parse_response, ParsedResponse, ReasoningClient};
use crate::store::{LookupError, ReferenceStore};
use crate::translation::instruction_for;
use crate::types::verdict::VerdictContext;
use crate::types::{AbortCode, AbortRecord, BoundClaim, CheckState, Verdict};

/// Tracing target for check lifecycle events.
pub const AUDIT_TARGET: &str = "consistency_kernel::audit";

/// Hard failures that are not a verdict.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Input to a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Caller's reference for the target document.
    pub target_document_ref: String,
    /// Full text of the target document.
    pub target_text: String,
    /// Manifest to check against.
    pub manifest_ref: String,
}

/// Cooperative cancellation for a running check.
///
/// Honored before the reasoning call is made and again when it returns. An
/// in-flight remote call is not interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Create an un-cancelled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State of one check invocation.
struct CheckRun {
    context: VerdictContext,
    state: CheckState,
}

impl CheckRun {
    fn advance(&mut self, next: CheckState) {
        tracing::debug!(
            target: AUDIT_TARGET,
            check_id = %self.context.check_id,
            from = %self.state,
            to = %next,
            "State transition"
        );
        self.state = next;
    }

    fn abort(self, code: AbortCode, detail: impl Into<String>, confidence: Option<f64>) -> Verdict {
        let detail = detail.into();
        tracing::warn!(
            target: AUDIT_TARGET,
            check_id = %self.context.check_id,
            state = %self.state,
            code = %code,
            detail = %detail,
            "Check aborted"
        );
        let abort = AbortRecord {
            state: self.state,
            code,
            detail,
        };
        Verdict::aborted(self.context, abort, confidence)
    }

    fn emit(mut self, bound_claims: Vec<BoundClaim>, confidence: f64) -> Verdict {
        self.advance(CheckState::VerdictEmitted);
        let verdict = Verdict::emitted(self.context, bound_claims, confidence);
        tracing::info!(
            target: AUDIT_TARGET,
            check_id = %verdict.check_id(),
            overall_status = %verdict.overall_status(),
            claims = verdict.bound_claims().len(),
            verified = verdict.bound_claims().iter().filter(|b| b.is_verified()).count(),
            "Verdict emitted"
        );
        verdict
    }
}

/// Evidence-bound consistency checker.
pub struct ConsistencyKernel<S, R, C> {
    store: Arc<S>,
    manifests: ManifestManager<S, R>,
    binder: EvidenceBinder<S>,
    client: Arc<C>,
    config: KernelConfig,
    fingerprint: String,
}

impl<S, R, C> ConsistencyKernel<S, R, C>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
    C: ReasoningClient + 'static,
{
    /// Create a kernel. Fails only on invalid configuration.
    pub fn new(
        store: Arc<S>,
        repository: Arc<R>,
        client: Arc<C>,
        config: KernelConfig,
    ) -> Result<Self, KernelError> {
        config.validate()?;
        let fingerprint = config.fingerprint();
        tracing::info!(
            config_fingerprint = %fingerprint,
            client = client.name(),
            "Consistency kernel initialized"
        );
        Ok(Self {
            manifests: ManifestManager::new(Arc::clone(&store), repository),
            binder: EvidenceBinder::new(Arc::clone(&store)),
            store,
            client,
            config,
            fingerprint,
        })
    }

    /// Kernel configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The manifest manager the kernel loads through.
    pub fn manifests(&self) -> &ManifestManager<S, R> {
        &self.manifests
    }

    /// The reference store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run a check to completion.
    pub async fn check(&self, request: CheckRequest) -> Verdict {
        self.check_with_cancel(request, &CancellationFlag::new()).await
    }

    /// Run a check, honoring `cancel`.
    pub async fn check_with_cancel(&self, request: CheckRequest, cancel: &CancellationFlag) -> Verdict {
        let bureau = detect_bureau(&request.target_text);
        let mut run = CheckRun {
            context: VerdictContext {
                check_id: Uuid::new_v4(),
                target_document_ref: request.target_document_ref.clone(),
                manifest_version: None,
                config_fingerprint: self.fingerprint.clone(),
                bureau,
            },
            state: CheckState::Init,
        };
        let check_id = run.context.check_id;

        tracing::info!(
            target: AUDIT_TARGET,
            %check_id,
            target_document_ref = %request.target_document_ref,
            manifest_ref = %request.manifest_ref,
            bureau = %bureau,
            "Check started"
        );

        // INIT -> MANIFEST_LOADED
        let manifest = match self.manifests.load(&request.manifest_ref).await {
            Ok(m) => m,
            Err(e @ (ManifestError::NotFound(_) | ManifestError::InvalidRef(_))) => {
                return run.abort(AbortCode::ManifestNotFound, e.to_string(), None);
            }
            Err(e) => return run.abort(AbortCode::ManifestUnavailable, e.to_string(), None),
        };
        run.context.manifest_version = Some(manifest.manifest_version.clone());

        let validated = match self.manifests.validate(manifest).await {
            Ok(v) => v,
            Err(e) => return run.abort(AbortCode::StoreUnavailable, e.to_string(), None),
        };
        if let Err(stale) = validated.require_fresh() {
            return run.abort(AbortCode::ManifestStale, stale.to_string(), None);
        }
        run.advance(CheckState::ManifestLoaded);

        // MANIFEST_LOADED -> PROMPT_BUILT
        let passages = match prompt::collect_passages(self.store.as_ref(), validated.manifest()).await {
            Ok(p) => p,
            Err(e) => return run.abort(AbortCode::StoreUnavailable, e.to_string(), None),
        };
        let instructions = prompt::instructions(&instruction_for(self.config.soul_dir.as_deref(), bureau));
        let reasoning_request = match prompt::build_request(
            check_id,
            instructions,
            &request.target_document_ref,
            &request.target_text,
            validated.manifest_version(),
            passages,
            &self.config,
        ) {
            Ok(r) => r,
            Err(e @ PromptError::BudgetExceeded { .. }) => {
                return run.abort(AbortCode::PromptBudgetExceeded, e.to_string(), None);
            }
            Err(e) => return run.abort(AbortCode::StoreUnavailable, e.to_string(), None),
        };
        run.advance(CheckState::PromptBuilt);

        // PROMPT_BUILT -> RESPONSE_RECEIVED
        let timeout = self.config.reasoning_timeout();
        let max_attempts = self.config.max_transport_retries.saturating_add(1);
        let mut attempt = 0;
        let raw = loop {
            if cancel.is_cancelled() {
                return run.abort(AbortCode::Cancelled, "cancelled before reasoning call", None);
            }
            attempt += 1;

            match tokio::time::timeout(timeout, self.client.complete(&reasoning_request)).await {
                Err(_) => {
                    let detail = format!("no response within {} ms (attempt {})", timeout.as_millis(), attempt);
                    return run.abort(AbortCode::ReasoningTimeout, detail, None);
                }
                Ok(Ok(raw)) => break raw,
                Ok(Err(e)) if attempt < max_attempts => {
                    tracing::warn!(
                        target: AUDIT_TARGET,
                        %check_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Reasoning transport error, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff()).await;
                }
                Ok(Err(e)) => {
                    let detail = format!("{} (after {} attempts)", e, attempt);
                    return run.abort(AbortCode::ReasoningTransport, detail, None);
                }
            }
        };

        if cancel.is_cancelled() {
            return run.abort(AbortCode::Cancelled, "cancelled while reasoning call was in flight", None);
        }

        let (confidence, claims) = match parse_response(&raw) {
            ParsedResponse::Claims { confidence, claims } => (confidence, claims),
            ParsedResponse::SchemaFailure { raw, violation } => {
                tracing::debug!(target: AUDIT_TARGET, %check_id, raw_len = raw.len(), "Schema failure");
                return run.abort(AbortCode::ReasoningSchema, violation.to_string(), None);
            }
        };
        if confidence < self.config.confidence_gate {
            let detail = format!("confidence {} below gate {}", confidence, self.config.confidence_gate);
            return run.abort(AbortCode::ConfidenceGate, detail, Some(confidence));
        }
        if claims.is_empty() {
            return run.abort(AbortCode::EmptyResponse, "response contains no claims", Some(confidence));
        }
        run.advance(CheckState::ResponseReceived);

        // RESPONSE_RECEIVED -> CLAIMS_BOUND
        let bound_claims = self.binder.bind_all(&claims, &validated).await;
        run.advance(CheckState::ClaimsBound);

        // CLAIMS_BOUND -> VERDICT_EMITTED
        run.emit(bound_claims, confidence)
    }

    /// Re-verify a verdict's evidence against the current store.
    pub async fn audit_verdict(&self, verdict: &Verdict) -> Result<AuditReport, LookupError> {
        self.binder.audit_verdict(verdict).await
    }
}

//! Axum routes for the consistency kernel service.

use std::time::Instant;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::binder::AuditReport;
use crate::kernel::CheckRequest;
use crate::manifest::{ManifestError, ManifestRepository};
use crate::reasoning::ReasoningClient;
use crate::store::{IngestError, ReferenceStore};
use crate::types::{DocumentId, Manifest, ReferenceDocument, StaleEntry, Verdict};
use crate::KERNEL_VERSION;

use super::middleware::{record_check_metrics, record_ingest_metrics};
use super::state::ServiceState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to ingest a reference document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Source id; becomes the document id.
    pub source_id: String,
    /// Full document text.
    pub text: String,
}

/// Summary of an ingested revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub revision: u32,
    pub content_hash: String,
    pub passage_count: usize,
    pub ingested_at: DateTime<Utc>,
}

impl From<&ReferenceDocument> for DocumentSummary {
    fn from(document: &ReferenceDocument) -> Self {
        Self {
            document_id: document.id.to_string(),
            revision: document.revision,
            content_hash: document.content_hash.clone(),
            passage_count: document.num_passages(),
            ingested_at: document.ingested_at,
        }
    }
}

/// Document ids in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentListResponse {
    pub documents: Vec<String>,
}

/// Request to build and save a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildManifestRequest {
    /// Ref to save the manifest under.
    pub manifest_ref: String,
    /// Documents whose current revisions are approved.
    pub document_ids: Vec<String>,
}

/// Summary of a saved manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub manifest_ref: String,
    pub manifest_version: String,
    pub document_count: usize,
    pub passage_count: usize,
}

/// Saved manifest refs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestListResponse {
    pub manifests: Vec<String>,
}

/// Result of validating a manifest against the live store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub manifest_ref: String,
    pub manifest_version: String,
    pub fresh: bool,
    pub stale_entries: Vec<StaleEntry>,
    pub validated_at: DateTime<Utc>,
}

/// Service health response (detailed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub kernel_version: String,
    pub config_fingerprint: String,
    pub store_healthy: bool,
    pub started_at: DateTime<Utc>,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub store: bool,
    pub details: Option<String>,
}

/// Structured error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    let body = ErrorResponse::new(code, error);
    tracing::warn!(status = status.as_u16(), code = %body.code, error = %body.error, "Request error");
    (status, Json(body))
}

fn ingest_error(e: IngestError) -> ApiError {
    match e {
        IngestError::Store(_) => api_error(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", e.to_string()),
        _ => api_error(StatusCode::BAD_REQUEST, "INGEST_REJECTED", e.to_string()),
    }
}

fn manifest_error(e: ManifestError) -> ApiError {
    let (status, code) = match &e {
        ManifestError::Empty => (StatusCode::BAD_REQUEST, "EMPTY_MANIFEST"),
        ManifestError::InvalidRef(_) => (StatusCode::BAD_REQUEST, "INVALID_MANIFEST_REF"),
        ManifestError::DocumentNotFound(_) => (StatusCode::NOT_FOUND, "DOCUMENT_NOT_FOUND"),
        ManifestError::NotFound(_) => (StatusCode::NOT_FOUND, "MANIFEST_NOT_FOUND"),
        ManifestError::Conflict(_) => (StatusCode::CONFLICT, "MANIFEST_CONFLICT"),
        ManifestError::Integrity { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "MANIFEST_INTEGRITY"),
        ManifestError::Repository(_) | ManifestError::Store(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
        }
    };
    api_error(status, code, e.to_string())
}

fn parse_document_id(raw: &str) -> Result<DocumentId, ApiError> {
    DocumentId::new(raw).map_err(|e| {
        let (status, Json(body)) = api_error(StatusCode::BAD_REQUEST, "INVALID_DOCUMENT_ID", e.to_string());
        (status, Json(body.with_details(raw.to_string())))
    })
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Ingest a reference document.
async fn ingest_handler<S, R, C>(
    State(state): State<ServiceState<S, R, C>>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<DocumentSummary>), ApiError>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
    C: ReasoningClient + 'static,
{
    let start = Instant::now();
    let policy = state.config().segmentation_policy();
    let document = state
        .store()
        .ingest(request.text.as_bytes(), &request.source_id, &policy)
        .await
        .map_err(ingest_error)?;

    record_ingest_metrics(document.num_passages(), document.revision, start.elapsed().as_millis() as u64);
    Ok((StatusCode::CREATED, Json(DocumentSummary::from(&document))))
}

/// List document ids.
async fn list_documents_handler<S, R, C>(
    State(state): State<ServiceState<S, R, C>>,
) -> Result<Json<DocumentListResponse>, ApiError>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
    C: ReasoningClient + 'static,
{
    let ids = state
        .store()
        .list_documents()
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", e.to_string()))?;
    Ok(Json(DocumentListResponse {
        documents: ids.into_iter().map(|id| id.to_string()).collect(),
    }))
}

/// Fetch the current revision of a document, passages included.
async fn get_document_handler<S, R, C>(
    State(state): State<ServiceState<S, R, C>>,
    Path(document_id): Path<String>,
) -> Result<Json<ReferenceDocument>, ApiError>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
    C: ReasoningClient + 'static,
{
    let id = parse_document_id(&document_id)?;
    state
        .store()
        .get_document(&id)
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", e.to_string()))?
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "DOCUMENT_NOT_FOUND", format!("Document not found: {}", id)))
}

/// Build a manifest from current revisions and save it.
async fn build_manifest_handler<S, R, C>(
    State(state): State<ServiceState<S, R, C>>,
    Json(request): Json<BuildManifestRequest>,
) -> Result<(StatusCode, Json<ManifestSummary>), ApiError>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
    C: ReasoningClient + 'static,
{
    let ids = request
        .document_ids
        .iter()
        .map(|raw| parse_document_id(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let manifests = state.manifests();
    let manifest = manifests.build_manifest(&ids).await.map_err(manifest_error)?;
    manifests
        .save(&request.manifest_ref, &manifest)
        .await
        .map_err(manifest_error)?;

    Ok((
        StatusCode::CREATED,
        Json(ManifestSummary {
            manifest_ref: request.manifest_ref,
            manifest_version: manifest.manifest_version.clone(),
            document_count: manifest.entries.len(),
            passage_count: manifest.num_passages(),
        }),
    ))
}

/// List saved manifest refs.
async fn list_manifests_handler<S, R, C>(
    State(state): State<ServiceState<S, R, C>>,
) -> Result<Json<ManifestListResponse>, ApiError>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
    C: ReasoningClient + 'static,
{
    let manifests = state.manifests().list().await.map_err(manifest_error)?;
    Ok(Json(ManifestListResponse { manifests }))
}

/// Fetch a saved manifest.
async fn get_manifest_handler<S, R, C>(
    State(state): State<ServiceState<S, R, C>>,
    Path(manifest_ref): Path<String>,
) -> Result<Json<Manifest>, ApiError>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
    C: ReasoningClient + 'static,
{
    state
        .manifests()
        .load(&manifest_ref)
        .await
        .map(Json)
        .map_err(manifest_error)
}

/// Validate a saved manifest against the live store.
async fn validate_manifest_handler<S, R, C>(
    State(state): State<ServiceState<S, R, C>>,
    Path(manifest_ref): Path<String>,
) -> Result<Json<ValidationResponse>, ApiError>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
    C: ReasoningClient + 'static,
{
    let validated = state
        .manifests()
        .load_validated(&manifest_ref)
        .await
        .map_err(manifest_error)?;

    Ok(Json(ValidationResponse {
        manifest_version: validated.manifest_version().to_string(),
        fresh: validated.is_fresh(),
        stale_entries: validated.freshness().stale_entries().to_vec(),
        validated_at: validated.validated_at(),
        manifest_ref,
    }))
}

/// Run a consistency check. Always answers with a verdict.
async fn check_handler<S, R, C>(
    State(state): State<ServiceState<S, R, C>>,
    Json(request): Json<CheckRequest>,
) -> Json<Verdict>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
    C: ReasoningClient + 'static,
{
    let start = Instant::now();
    let verdict = state.kernel().check(request).await;
    record_check_metrics(&verdict, start.elapsed().as_millis() as u64);
    Json(verdict)
}

/// Re-verify a previously emitted verdict against the current store.
async fn audit_handler<S, R, C>(
    State(state): State<ServiceState<S, R, C>>,
    Json(verdict): Json<Verdict>,
) -> Result<Json<AuditReport>, ApiError>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
    C: ReasoningClient + 'static,
{
    state
        .kernel()
        .audit_verdict(&verdict)
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", e.to_string()))
}

/// Health check endpoint (detailed).
async fn health_handler<S, R, C>(
    State(state): State<ServiceState<S, R, C>>,
) -> Json<HealthResponse>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
    C: ReasoningClient + 'static,
{
    let store_healthy = state.store().is_healthy().await;
    Json(HealthResponse {
        status: if store_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        kernel_version: KERNEL_VERSION.to_string(),
        config_fingerprint: state.config().fingerprint(),
        store_healthy,
        started_at: state.started_at(),
    })
}

/// Liveness probe. Does not check dependencies.
async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe. 200 when the store can serve reads, 503 otherwise.
async fn readiness_handler<S, R, C>(
    State(state): State<ServiceState<S, R, C>>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
    C: ReasoningClient + 'static,
{
    if state.store().is_healthy().await {
        Ok(Json(ReadinessResponse {
            ready: true,
            store: true,
            details: None,
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                store: false,
                details: Some("Reference store unavailable".to_string()),
            }),
        ))
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the consistency kernel service.
pub fn create_router<S, R, C>(state: ServiceState<S, R, C>) -> Router
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
    C: ReasoningClient + 'static,
{
    Router::new()
        // Reference corpus
        .route("/api/documents", get(list_documents_handler::<S, R, C>).post(ingest_handler::<S, R, C>))
        .route("/api/documents/:document_id", get(get_document_handler::<S, R, C>))
        // Manifests
        .route("/api/manifests", get(list_manifests_handler::<S, R, C>).post(build_manifest_handler::<S, R, C>))
        .route("/api/manifests/:manifest_ref", get(get_manifest_handler::<S, R, C>))
        .route("/api/manifests/:manifest_ref/validate", get(validate_manifest_handler::<S, R, C>))
        // Checks
        .route("/api/check", post(check_handler::<S, R, C>))
        .route("/api/audit", post(audit_handler::<S, R, C>))
        // Health checks
        .route("/health", get(health_handler::<S, R, C>))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler::<S, R, C>))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    use crate::config::KernelConfig;
    use crate::kernel::ConsistencyKernel;
    use crate::manifest::InMemoryManifestRepository;
    use crate::reasoning::scripted::{ScriptedReasoningClient, ScriptedReply};
    use crate::store::InMemoryReferenceStore;
    use crate::types::OverallStatus;

    type TestState = ServiceState<InMemoryReferenceStore, InMemoryManifestRepository, ScriptedReasoningClient>;

    fn state_with(replies: Vec<ScriptedReply>) -> TestState {
        let kernel = ConsistencyKernel::new(
            std::sync::Arc::new(InMemoryReferenceStore::new()),
            std::sync::Arc::new(InMemoryManifestRepository::new()),
            std::sync::Arc::new(ScriptedReasoningClient::new(replies)),
            KernelConfig::default(),
        )
        .unwrap();
        ServiceState::new(kernel)
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).unwrap()
    }

    async fn seed(router: &Router) {
        let (status, _) = send(
            router,
            "POST",
            "/api/documents",
            Some(serde_json::json!({"source_id": "crrg.md", "text": "Report the DOFD.\n\nStatus 13 is paid."})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(
            router,
            "POST",
            "/api/manifests",
            Some(serde_json::json!({"manifest_ref": "soul", "document_ids": ["crrg.md"]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_ingest_then_fetch_document() {
        let router = create_router(state_with(vec![]));
        seed(&router).await;

        let (status, body) = send(&router, "GET", "/api/documents/crrg.md", None).await;
        assert_eq!(status, StatusCode::OK);
        let document: ReferenceDocument = decode(&body);
        assert_eq!(document.num_passages(), 2);

        let (status, _) = send(&router, "GET", "/api/documents/absent.md", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_ingest_is_rejected() {
        let router = create_router(state_with(vec![]));
        let (status, body) = send(
            &router,
            "POST",
            "/api/documents",
            Some(serde_json::json!({"source_id": "empty.md", "text": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorResponse = decode(&body);
        assert_eq!(error.code, "INGEST_REJECTED");
    }

    #[tokio::test]
    async fn test_manifest_ref_is_write_once() {
        let router = create_router(state_with(vec![]));
        seed(&router).await;

        send(
            &router,
            "POST",
            "/api/documents",
            Some(serde_json::json!({"source_id": "fcra.md", "text": "Section 623."})),
        )
        .await;
        let (status, body) = send(
            &router,
            "POST",
            "/api/manifests",
            Some(serde_json::json!({"manifest_ref": "soul", "document_ids": ["crrg.md", "fcra.md"]})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(decode::<ErrorResponse>(&body).code, "MANIFEST_CONFLICT");
    }

    #[tokio::test]
    async fn test_validate_reports_staleness() {
        let router = create_router(state_with(vec![]));
        seed(&router).await;

        let (_, body) = send(&router, "GET", "/api/manifests/soul/validate", None).await;
        let report: ValidationResponse = decode(&body);
        assert!(report.fresh);

        send(
            &router,
            "POST",
            "/api/documents",
            Some(serde_json::json!({"source_id": "crrg.md", "text": "Report the DOFD.\n\nStatus 13 is closed."})),
        )
        .await;
        let (status, body) = send(&router, "GET", "/api/manifests/soul/validate", None).await;
        assert_eq!(status, StatusCode::OK);
        let report: ValidationResponse = decode(&body);
        assert!(!report.fresh);
        assert_eq!(report.stale_entries.len(), 1);
    }

    #[tokio::test]
    async fn test_check_returns_verdict() {
        let reply = serde_json::json!({
            "confidence": 0.9,
            "claims": [{
                "claim_id": "C1",
                "statement": "DOFD is reported",
                "assertion": "CONFORMANT",
                "cited_passage_ids": ["crrg.md#P1"],
            }]
        });
        let router = create_router(state_with(vec![ScriptedReply::Respond(reply.to_string())]));
        seed(&router).await;

        let (status, body) = send(
            &router,
            "POST",
            "/api/check",
            Some(serde_json::json!({
                "target_document_ref": "report.txt",
                "target_text": "DOFD 2021-03-01",
                "manifest_ref": "soul",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let verdict: Verdict = decode(&body);
        assert_eq!(verdict.overall_status(), OverallStatus::Pass);

        let (status, body) = send(&router, "POST", "/api/audit", Some(serde_json::to_value(&verdict).unwrap())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(decode::<AuditReport>(&body).is_intact());

        let mut forged = serde_json::to_value(&verdict).unwrap();
        forged["overall_status"] = "FAIL".into();
        let (status, _) = send(&router, "POST", "/api/audit", Some(forged)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_check_against_unknown_manifest_is_inconclusive() {
        let router = create_router(state_with(vec![]));
        let (status, body) = send(
            &router,
            "POST",
            "/api/check",
            Some(serde_json::json!({
                "target_document_ref": "report.txt",
                "target_text": "DOFD 2021-03-01",
                "manifest_ref": "missing",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let verdict: Verdict = decode(&body);
        assert_eq!(verdict.overall_status(), OverallStatus::Inconclusive);
        assert!(verdict.is_aborted());
    }

    #[tokio::test]
    async fn test_health_probes() {
        let router = create_router(state_with(vec![]));
        let (status, _) = send(&router, "GET", "/health/live", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&router, "GET", "/health/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(decode::<ReadinessResponse>(&body).ready);

        let (_, body) = send(&router, "GET", "/health", None).await;
        let health: HealthResponse = decode(&body);
        assert_eq!(health.kernel_version, KERNEL_VERSION);
    }
}

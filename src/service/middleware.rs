//! Service middleware and metric records.
//!
//! Metrics are emitted as structured `tracing` events under
//! [`METRICS_TARGET`] so they can be aggregated from logs.

use std::sync::OnceLock;
use std::time::Instant;

use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
};
use regex_lite::Regex;
use tracing::info;

use crate::types::Verdict;

/// Tracing target for metric events.
pub const METRICS_TARGET: &str = "consistency_kernel::metrics";

/// Records request count, status and latency for every request.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    info!(
        target: METRICS_TARGET,
        metric_type = "request",
        path = %path,
        method = %method,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "request_metric"
    );

    response
}

/// Collapse document ids and manifest refs so paths have low cardinality.
fn normalize_path(path: &str) -> String {
    static RESOURCE: OnceLock<Regex> = OnceLock::new();
    let resource = RESOURCE.get_or_init(|| {
        Regex::new(r"^/api/(documents|manifests)/[^/]+").expect("static regex")
    });
    resource.replace(path, "/api/$1/:id").to_string()
}

/// Record the outcome of one check.
pub fn record_check_metrics(verdict: &Verdict, latency_ms: u64) {
    let verified = verdict.bound_claims().iter().filter(|b| b.is_verified()).count();
    info!(
        target: METRICS_TARGET,
        metric_type = "check",
        overall_status = %verdict.overall_status(),
        terminal_state = %verdict.terminal_state(),
        abort_code = %verdict.abort().map(|a| a.code.to_string()).unwrap_or_default(),
        claims = verdict.bound_claims().len(),
        verified = verified,
        latency_ms = latency_ms,
        "check_metric"
    );
}

/// Record one document ingestion.
pub fn record_ingest_metrics(passages: usize, revision: u32, latency_ms: u64) {
    info!(
        target: METRICS_TARGET,
        metric_type = "ingest",
        passages = passages,
        revision = revision,
        latency_ms = latency_ms,
        "ingest_metric"
    );
}

//! Consistency Kernel REST Service
//!
//! Exposes reference ingestion, manifest management and consistency checks
//! over HTTP.
//!
//! ## Endpoints
//!
//! - `GET /api/documents` - List reference document ids
//! - `POST /api/documents` - Ingest a reference document
//! - `GET /api/documents/:document_id` - Current revision with passages
//! - `GET /api/manifests` - List saved manifest refs
//! - `POST /api/manifests` - Build a manifest from current revisions and save it
//! - `GET /api/manifests/:manifest_ref` - Fetch a saved manifest
//! - `GET /api/manifests/:manifest_ref/validate` - Freshness against the live store
//! - `POST /api/check` - Run a check; always answers with a verdict
//! - `POST /api/audit` - Re-verify a verdict's evidence
//! - `GET /health` - Detailed service health check
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{metrics_middleware, record_check_metrics, record_ingest_metrics, METRICS_TARGET};
pub use routes::{create_router, ErrorResponse};
pub use state::ServiceState;

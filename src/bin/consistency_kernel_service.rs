//! Consistency Kernel Service Binary
//!
//! Runs the consistency kernel as a REST API service:
//! - Structured JSON logging
//! - Request tracing with correlation IDs
//! - Graceful shutdown handling
//! - Health check endpoints
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string. When unset, documents and
//!   manifests are kept in files under `DATA_DIR`
//! - `DATA_DIR`: file store directory (default: ./data)
//! - `REASONING_ENDPOINT`, `REASONING_API_KEY`: reasoning capability (required)
//! - `SOUL_DIR`: reference corpus to ingest at startup (optional)
//! - `SOUL_MANIFEST_REF`: save a manifest of the startup corpus under this ref (optional)
//! - `SOUL_*`: kernel tuning, see `KernelConfig::from_env`
//! - `PORT`: Service port (default: 8002)
//! - `HOST`: Service host (default: 0.0.0.0)
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! REASONING_ENDPOINT=https://... REASONING_API_KEY=... SOUL_DIR=./SOUL \
//!     cargo run --bin consistency_kernel_service --features service
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use consistency_kernel::service::{create_router, metrics_middleware, ServiceState};
use consistency_kernel::{
    ingest_directory, ConsistencyKernel, DocumentId, FileManifestRepository, FileReferenceStore,
    HttpReasoningClient, KernelConfig, ManifestError, ManifestRepository, PostgresReferenceStore,
    ReferenceStore,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "consistency_kernel_service=info,consistency_kernel=info,tower_http=info,sqlx=warn".into()
    });

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true)
            )
            .init();
    }
}

/// Request logging middleware that adds correlation ID and timing
async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let trace_id = request
        .headers()
        .get("X-Request-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let method = request.method().clone();
    let uri = request.uri().path().to_string();

    let span = info_span!(
        "request",
        trace_id = %trace_id,
        method = %method,
        path = %uri,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let response = next.run(request).instrument(span.clone()).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    span.record("status", status);
    span.record("latency_ms", latency.as_millis() as u64);

    info!(
        target: "consistency_kernel_service::access",
        trace_id = %trace_id,
        method = %method,
        path = %uri,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request completed"
    );

    response
}

/// Ingest `SOUL_DIR` and optionally snapshot it under `SOUL_MANIFEST_REF`.
async fn load_corpus<S, R>(
    kernel: &ConsistencyKernel<S, R, HttpReasoningClient>,
) -> Result<(), BoxError>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
{
    let Some(soul_dir) = kernel.config().soul_dir.clone() else {
        info!("SOUL_DIR not set, skipping corpus ingest");
        return Ok(());
    };

    let policy = kernel.config().segmentation_policy();
    let documents = ingest_directory(kernel.store().as_ref(), &soul_dir, &policy).await?;

    let manifest_ref = match std::env::var("SOUL_MANIFEST_REF") {
        Ok(r) if !r.trim().is_empty() => r,
        _ => return Ok(()),
    };
    let ids: Vec<DocumentId> = documents.iter().map(|d| d.id.clone()).collect();
    let manifest = kernel.manifests().build_manifest(&ids).await?;
    match kernel.manifests().save(&manifest_ref, &manifest).await {
        Ok(()) => {
            info!(
                manifest_ref = %manifest_ref,
                manifest_version = %manifest.manifest_version,
                documents = ids.len(),
                "Startup manifest saved"
            );
            Ok(())
        }
        Err(ManifestError::Conflict(_)) => {
            warn!(
                manifest_ref = %manifest_ref,
                "Manifest ref already holds a different snapshot; keeping the saved one"
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

async fn serve<S, R>(
    store: Arc<S>,
    repository: Arc<R>,
    client: HttpReasoningClient,
    config: KernelConfig,
    addr: SocketAddr,
) -> Result<(), BoxError>
where
    S: ReferenceStore + 'static,
    R: ManifestRepository + 'static,
{
    let kernel = ConsistencyKernel::new(store, repository, Arc::new(client), config)?;
    load_corpus(&kernel).await?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(ServiceState::new(kernel))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "Consistency Kernel Service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_tracing();

    let version = env!("CARGO_PKG_VERSION");
    let build_sha = option_env!("BUILD_SHA").unwrap_or("dev");
    info!(
        version = version,
        build_sha = build_sha,
        kernel_version = consistency_kernel::KERNEL_VERSION,
        "Starting Consistency Kernel Service"
    );

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8002);
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    let config = KernelConfig::from_env();
    let client = HttpReasoningClient::from_env()?;
    info!(endpoint = %client.endpoint(), "Reasoning client configured");

    if std::env::var("DATABASE_URL").is_ok() {
        info!("Connecting to PostgreSQL...");
        let connect_start = Instant::now();
        let store = match tokio::time::timeout(Duration::from_secs(30), PostgresReferenceStore::from_env()).await {
            Ok(Ok(store)) => store,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                return Err(e.into());
            }
            Err(_) => {
                tracing::error!("PostgreSQL connection timeout after 30s");
                return Err("Database connection timeout".into());
            }
        };
        store.migrate().await?;
        info!(
            latency_ms = connect_start.elapsed().as_millis() as u64,
            "PostgreSQL connection established"
        );

        let store = Arc::new(store);
        serve(Arc::clone(&store), store, client, config, addr).await?;
    } else {
        let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()));
        let store = FileReferenceStore::open(data_dir.join("documents"))?;
        let repository = FileManifestRepository::open(data_dir.join("manifests"))?;
        info!(data_dir = %data_dir.display(), "Using file stores");

        serve(Arc::new(store), Arc::new(repository), client, config, addr).await?;
    }

    info!("Consistency Kernel Service shutdown complete");
    Ok(())
}

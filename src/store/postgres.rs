//! PostgreSQL reference store and manifest repository for production use.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//!
//! ## Schema
//!
//! Revisions are rows keyed by `(document_id, revision)`; nothing is ever
//! updated or deleted. Manifests are stored whole as JSONB under their ref.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;

use crate::manifest::ManifestRepository;
use crate::types::{DocumentId, Manifest, OffsetRange, Passage, PassageId, ReferenceDocument};
use super::ReferenceStore;

/// Schema statements, applied in order by [`PostgresReferenceStore::migrate`].
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS reference_documents (
        document_id   TEXT        NOT NULL,
        revision      INTEGER     NOT NULL,
        source        TEXT        NOT NULL,
        content_hash  TEXT        NOT NULL,
        ingested_at   TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (document_id, revision)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reference_passages (
        document_id     TEXT    NOT NULL,
        revision        INTEGER NOT NULL,
        ordinal         INTEGER NOT NULL,
        passage_id      TEXT    NOT NULL,
        start_offset    BIGINT  NOT NULL,
        end_offset      BIGINT  NOT NULL,
        normalized_text TEXT    NOT NULL,
        text_hash       TEXT    NOT NULL,
        PRIMARY KEY (document_id, revision, ordinal),
        FOREIGN KEY (document_id, revision) REFERENCES reference_documents (document_id, revision)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS manifests (
        manifest_ref     TEXT        PRIMARY KEY,
        manifest_version TEXT        NOT NULL,
        generated_at     TIMESTAMPTZ NOT NULL,
        body             JSONB       NOT NULL,
        saved_at         TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

/// Configuration for PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/soul".to_string()),
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            max_lifetime_secs: std::env::var("DB_MAX_LIFETIME_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

/// Error type for PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A stored row does not decode into a valid value.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    /// Appended revision is not the next one.
    #[error("Revision conflict for {document_id}: expected {expected}, got {got}")]
    RevisionConflict {
        /// Document being appended to.
        document_id: DocumentId,
        /// The revision the store expected.
        expected: u32,
        /// The revision supplied.
        got: u32,
    },
    /// Ref already holds a different manifest.
    #[error("Manifest ref already holds a different manifest: {0}")]
    ManifestConflict(String),
}

/// PostgreSQL-backed reference store and manifest repository.
///
/// Uses connection pooling with production-tuned settings.
#[derive(Clone)]
pub struct PostgresReferenceStore {
    pool: PgPool,
}

impl PostgresReferenceStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Create tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!(statements = SCHEMA.len(), "Schema applied");
        Ok(())
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    async fn load_revision(&self, header: &PgRow) -> Result<ReferenceDocument, PostgresError> {
        let document_id: String = header.try_get("document_id")?;
        let revision: i32 = header.try_get("revision")?;
        let id = DocumentId::new(document_id).map_err(|e| PostgresError::Corrupt(e.to_string()))?;

        let rows = sqlx::query(
            r#"
            SELECT passage_id, start_offset, end_offset, normalized_text, text_hash
            FROM reference_passages
            WHERE document_id = $1 AND revision = $2
            ORDER BY ordinal
            "#
        )
        .bind(id.as_str())
        .bind(revision)
        .fetch_all(&self.pool)
        .await?;

        let passages = rows
            .iter()
            .map(|r| Self::parse_passage_row(&id, r))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ReferenceDocument {
            id,
            source: header.try_get("source")?,
            content_hash: header.try_get("content_hash")?,
            revision: u32::try_from(revision).map_err(|e| PostgresError::Corrupt(e.to_string()))?,
            ingested_at: header.try_get("ingested_at")?,
            passages,
        })
    }

    /// Parse a passage row. The stored hash is kept as-is so the binder can
    /// detect tampering.
    fn parse_passage_row(document_id: &DocumentId, row: &PgRow) -> Result<Passage, PostgresError> {
        let passage_id: String = row.try_get("passage_id")?;
        let start: i64 = row.try_get("start_offset")?;
        let end: i64 = row.try_get("end_offset")?;
        let to_offset = |v: i64| usize::try_from(v).map_err(|e| PostgresError::Corrupt(e.to_string()));

        Ok(Passage {
            passage_id: PassageId::new(passage_id).map_err(|e| PostgresError::Corrupt(e.to_string()))?,
            document_id: document_id.clone(),
            offset_range: OffsetRange::new(to_offset(start)?, to_offset(end)?),
            normalized_text: row.try_get("normalized_text")?,
            text_hash: row.try_get("text_hash")?,
        })
    }
}

#[async_trait]
impl ReferenceStore for PostgresReferenceStore {
    type Error = PostgresError;

    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    async fn get_document(&self, id: &DocumentId) -> Result<Option<ReferenceDocument>, Self::Error> {
        let header = sqlx::query(
            r#"
            SELECT document_id, revision, source, content_hash, ingested_at
            FROM reference_documents
            WHERE document_id = $1
            ORDER BY revision DESC
            LIMIT 1
            "#
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match header {
            Some(ref h) => Ok(Some(self.load_revision(h).await?)),
            None => Ok(None),
        }
    }

    async fn document_history(&self, id: &DocumentId) -> Result<Vec<ReferenceDocument>, Self::Error> {
        let headers = sqlx::query(
            r#"
            SELECT document_id, revision, source, content_hash, ingested_at
            FROM reference_documents
            WHERE document_id = $1
            ORDER BY revision
            "#
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut history = Vec::with_capacity(headers.len());
        for header in &headers {
            history.push(self.load_revision(header).await?);
        }
        Ok(history)
    }

    async fn list_documents(&self) -> Result<Vec<DocumentId>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT document_id
            FROM reference_documents
            ORDER BY document_id
            "#
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("document_id")?;
                DocumentId::new(id).map_err(|e| PostgresError::Corrupt(e.to_string()))
            })
            .collect()
    }

    async fn append_document(&self, document: ReferenceDocument) -> Result<(), Self::Error> {
        let mut tx = self.pool.begin().await?;

        let current: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(revision) FROM reference_documents WHERE document_id = $1"
        )
        .bind(document.id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let expected = current.map(|r| r as u32 + 1).unwrap_or(1);
        if document.revision != expected {
            return Err(PostgresError::RevisionConflict {
                document_id: document.id,
                expected,
                got: document.revision,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO reference_documents (document_id, revision, source, content_hash, ingested_at)
            VALUES ($1, $2, $3, $4, $5)
            "#
        )
        .bind(document.id.as_str())
        .bind(document.revision as i32)
        .bind(&document.source)
        .bind(&document.content_hash)
        .bind(document.ingested_at)
        .execute(&mut *tx)
        .await?;

        for (ordinal, passage) in document.passages.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO reference_passages
                    (document_id, revision, ordinal, passage_id, start_offset, end_offset, normalized_text, text_hash)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#
            )
            .bind(document.id.as_str())
            .bind(document.revision as i32)
            .bind(ordinal as i32)
            .bind(passage.passage_id.as_str())
            .bind(passage.offset_range.start as i64)
            .bind(passage.offset_range.end as i64)
            .bind(&passage.normalized_text)
            .bind(&passage.text_hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ManifestRepository for PostgresReferenceStore {
    type Error = PostgresError;

    async fn save(&self, manifest_ref: &str, manifest: &Manifest) -> Result<(), Self::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO manifests (manifest_ref, manifest_version, generated_at, body)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (manifest_ref) DO NOTHING
            "#
        )
        .bind(manifest_ref)
        .bind(&manifest.manifest_version)
        .bind(manifest.generated_at)
        .bind(Json(manifest))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            match self.load(manifest_ref).await? {
                Some(existing) if &existing == manifest => {}
                _ => return Err(PostgresError::ManifestConflict(manifest_ref.to_string())),
            }
        }
        Ok(())
    }

    async fn load(&self, manifest_ref: &str) -> Result<Option<Manifest>, Self::Error> {
        let row = sqlx::query("SELECT body FROM manifests WHERE manifest_ref = $1")
            .bind(manifest_ref)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let Json(manifest): Json<Manifest> = r.try_get("body")?;
                Ok(Some(manifest))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<String>, Self::Error> {
        let rows = sqlx::query("SELECT manifest_ref FROM manifests ORDER BY manifest_ref")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get("manifest_ref").map_err(PostgresError::from))
            .collect()
    }
}

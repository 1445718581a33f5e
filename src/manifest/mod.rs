//! Manifest management: snapshot, persist, load, validate.
//!
//! A manifest is usable for a check only in its validated form. A
//! [`ValidatedManifest`] can only be produced by [`ManifestManager::validate`],
//! which compares every entry's recorded content hash against the current
//! revision in the reference store. Downstream code takes `&ValidatedManifest`
//! and therefore cannot be handed a manifest that skipped validation.

pub mod repository;

use std::collections::BTreeMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::canonical_content::hashes_equal;
use crate::store::{LookupError, ReferenceStore};
use crate::types::{DocumentId, Freshness, Manifest, ManifestEntry, StaleEntry, StaleReason};

pub use repository::{
    FileManifestRepository, InMemoryManifestRepository, ManifestRepository, RepositoryError,
};

/// Whether a string can be used as a manifest ref.
///
/// Refs are 1..=128 chars of ASCII alphanumerics, `.`, `_` or `-`, and may
/// not start with `.`.
pub fn is_valid_manifest_ref(manifest_ref: &str) -> bool {
    !manifest_ref.is_empty()
        && manifest_ref.len() <= 128
        && !manifest_ref.starts_with('.')
        && manifest_ref
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Error type for manifest operations.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// A manifest needs at least one document.
    #[error("Manifest must reference at least one document")]
    Empty,
    /// A document named in the manifest is not in the store.
    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),
    /// No manifest stored under the ref.
    #[error("Manifest not found: {0}")]
    NotFound(String),
    /// Ref is not usable as a key.
    #[error("Invalid manifest ref: {0:?}")]
    InvalidRef(String),
    /// Stored manifest's version does not match its entries.
    #[error("Manifest {manifest_ref} failed integrity check: recorded version {recorded}, computed {computed}")]
    Integrity {
        /// Ref that was loaded.
        manifest_ref: String,
        /// Version stored with the manifest.
        recorded: String,
        /// Version computed from the stored entries.
        computed: String,
    },
    /// Ref already holds a different manifest.
    #[error("Manifest ref already holds a different manifest: {0}")]
    Conflict(String),
    /// Repository backend failed.
    #[error("Manifest repository error: {0}")]
    Repository(String),
    /// Reference store failed.
    #[error("Reference store error: {0}")]
    Store(String),
}

/// Raised when a stale manifest is used where a fresh one is required.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Manifest {manifest_version} is stale ({} stale entries)", stale_entries.len())]
pub struct ManifestStaleError {
    /// Version of the stale manifest.
    pub manifest_version: String,
    /// Entries that drifted.
    pub stale_entries: Vec<StaleEntry>,
}

/// A manifest that has been checked against the live reference store.
///
/// No public constructor: the only way to obtain one is
/// [`ManifestManager::validate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedManifest {
    manifest: Manifest,
    freshness: Freshness,
    validated_at: DateTime<Utc>,
}

impl ValidatedManifest {
    /// The underlying manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Version of the underlying manifest.
    pub fn manifest_version(&self) -> &str {
        &self.manifest.manifest_version
    }

    /// Freshness at validation time.
    pub fn freshness(&self) -> &Freshness {
        &self.freshness
    }

    /// Whether the manifest was fresh at validation time.
    pub fn is_fresh(&self) -> bool {
        self.freshness.is_fresh()
    }

    /// When validation ran.
    pub fn validated_at(&self) -> DateTime<Utc> {
        self.validated_at
    }

    /// The manifest, or a [`ManifestStaleError`] if it was stale.
    pub fn require_fresh(&self) -> Result<&Manifest, ManifestStaleError> {
        match &self.freshness {
            Freshness::Fresh => Ok(&self.manifest),
            Freshness::Stale { stale_entries } => Err(ManifestStaleError {
                manifest_version: self.manifest.manifest_version.clone(),
                stale_entries: stale_entries.clone(),
            }),
        }
    }
}

/// Builds, persists and validates manifests over a reference store.
pub struct ManifestManager<S, R> {
    store: Arc<S>,
    repository: Arc<R>,
}

impl<S, R> Clone for ManifestManager<S, R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<S: ReferenceStore, R: ManifestRepository> ManifestManager<S, R> {
    /// Create a manager.
    pub fn new(store: Arc<S>, repository: Arc<R>) -> Self {
        Self { store, repository }
    }

    /// The reference store this manager validates against.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Snapshot the current revision of each document.
    ///
    /// Entries are keyed by document id. Duplicate ids collapse to one entry.
    pub async fn build_manifest(&self, document_ids: &[DocumentId]) -> Result<Manifest, ManifestError> {
        if document_ids.is_empty() {
            return Err(ManifestError::Empty);
        }

        let mut entries = BTreeMap::new();
        for id in document_ids {
            let document = self.store.lookup(id).await.map_err(|e| match e {
                LookupError::DocumentNotFound(id) => ManifestError::DocumentNotFound(id),
                other => ManifestError::Store(other.to_string()),
            })?;
            entries.insert(id.as_str().to_string(), ManifestEntry::from_document(&document));
        }

        let manifest = Manifest::new(entries, Utc::now());
        tracing::info!(
            manifest_version = %manifest.manifest_version,
            documents = manifest.entries.len(),
            passages = manifest.num_passages(),
            "Manifest built"
        );
        Ok(manifest)
    }

    /// Persist a manifest under `manifest_ref`. Refs are write-once.
    pub async fn save(&self, manifest_ref: &str, manifest: &Manifest) -> Result<(), ManifestError> {
        if !is_valid_manifest_ref(manifest_ref) {
            return Err(ManifestError::InvalidRef(manifest_ref.to_string()));
        }
        let existing = self
            .repository
            .load(manifest_ref)
            .await
            .map_err(|e| ManifestError::Repository(e.to_string()))?;
        match existing {
            Some(existing) if &existing == manifest => return Ok(()),
            Some(_) => return Err(ManifestError::Conflict(manifest_ref.to_string())),
            None => {}
        }

        self.repository
            .save(manifest_ref, manifest)
            .await
            .map_err(|e| ManifestError::Repository(e.to_string()))?;

        tracing::info!(
            manifest_ref,
            manifest_version = %manifest.manifest_version,
            "Manifest saved"
        );
        Ok(())
    }

    /// Load a manifest and check its version against its entries.
    pub async fn load(&self, manifest_ref: &str) -> Result<Manifest, ManifestError> {
        if !is_valid_manifest_ref(manifest_ref) {
            return Err(ManifestError::InvalidRef(manifest_ref.to_string()));
        }
        let manifest = self
            .repository
            .load(manifest_ref)
            .await
            .map_err(|e| ManifestError::Repository(e.to_string()))?
            .ok_or_else(|| ManifestError::NotFound(manifest_ref.to_string()))?;

        if !manifest.version_matches() {
            let computed = Manifest::compute_version(&manifest.entries);
            tracing::error!(
                manifest_ref,
                recorded = %manifest.manifest_version,
                computed = %computed,
                "Manifest failed integrity check"
            );
            return Err(ManifestError::Integrity {
                manifest_ref: manifest_ref.to_string(),
                recorded: manifest.manifest_version,
                computed,
            });
        }
        Ok(manifest)
    }

    /// Validate a manifest against the current state of the store.
    ///
    /// An entry is stale when its document is gone or its current content
    /// hash differs from the recorded one. Store failures are errors, never
    /// silently treated as fresh.
    pub async fn validate(&self, manifest: Manifest) -> Result<ValidatedManifest, ManifestError> {
        let mut stale_entries = Vec::new();

        for (logical_ref, entry) in &manifest.entries {
            let current = self
                .store
                .get_document(&entry.document_id)
                .await
                .map_err(|e| ManifestError::Store(e.to_string()))?;

            let reason = match current {
                None => Some(StaleReason::Missing),
                Some(doc) if !hashes_equal(&doc.content_hash, &entry.content_hash) => {
                    Some(StaleReason::ContentChanged {
                        recorded: entry.content_hash.clone(),
                        current: doc.content_hash,
                    })
                }
                Some(_) => None,
            };

            if let Some(reason) = reason {
                stale_entries.push(StaleEntry {
                    logical_ref: logical_ref.clone(),
                    document_id: entry.document_id.clone(),
                    reason,
                });
            }
        }

        let freshness = if stale_entries.is_empty() {
            Freshness::Fresh
        } else {
            tracing::warn!(
                manifest_version = %manifest.manifest_version,
                stale = stale_entries.len(),
                "Manifest is stale"
            );
            Freshness::Stale { stale_entries }
        };

        Ok(ValidatedManifest {
            manifest,
            freshness,
            validated_at: Utc::now(),
        })
    }

    /// Load and validate in one step.
    pub async fn load_validated(&self, manifest_ref: &str) -> Result<ValidatedManifest, ManifestError> {
        let manifest = self.load(manifest_ref).await?;
        self.validate(manifest).await
    }

    /// List stored manifest refs.
    pub async fn list(&self) -> Result<Vec<String>, ManifestError> {
        self.repository
            .list()
            .await
            .map_err(|e| ManifestError::Repository(e.to_string()))
    }
}

//! Manifest persistence.
//!
//! Manifest refs are write-once: saving the identical manifest again is a
//! no-op, saving a different manifest under an existing ref is a conflict.
//! An approved snapshot can therefore never be swapped out from under an
//! auditor.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::Manifest;
use super::is_valid_manifest_ref;

/// Error type for the built-in repositories.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// A different manifest is already stored under this ref.
    #[error("Manifest ref already holds a different manifest: {0}")]
    Conflict(String),
    /// Ref is not usable as a key.
    #[error("Invalid manifest ref: {0:?}")]
    InvalidRef(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// (De)serialization failed.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Trait for manifest persistence backends.
#[async_trait]
pub trait ManifestRepository: Send + Sync {
    /// Error type for repository operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Store a manifest under `manifest_ref`.
    async fn save(&self, manifest_ref: &str, manifest: &Manifest) -> Result<(), Self::Error>;

    /// Load the manifest stored under `manifest_ref`.
    async fn load(&self, manifest_ref: &str) -> Result<Option<Manifest>, Self::Error>;

    /// List stored refs in order.
    async fn list(&self) -> Result<Vec<String>, Self::Error>;
}

/// In-memory manifest repository for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryManifestRepository {
    manifests: std::sync::Arc<RwLock<BTreeMap<String, Manifest>>>,
}

impl InMemoryManifestRepository {
    /// Create a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored manifest, bypassing write-once rules.
    ///
    /// Test hook for simulating edits at rest.
    #[cfg(test)]
    pub(crate) fn overwrite(&self, manifest_ref: &str, manifest: Manifest) {
        self.manifests.write().insert(manifest_ref.to_string(), manifest);
    }
}

#[async_trait]
impl ManifestRepository for InMemoryManifestRepository {
    type Error = RepositoryError;

    async fn save(&self, manifest_ref: &str, manifest: &Manifest) -> Result<(), Self::Error> {
        if !is_valid_manifest_ref(manifest_ref) {
            return Err(RepositoryError::InvalidRef(manifest_ref.to_string()));
        }
        let mut manifests = self.manifests.write();
        match manifests.get(manifest_ref) {
            Some(existing) if existing == manifest => Ok(()),
            Some(_) => Err(RepositoryError::Conflict(manifest_ref.to_string())),
            None => {
                manifests.insert(manifest_ref.to_string(), manifest.clone());
                Ok(())
            }
        }
    }

    async fn load(&self, manifest_ref: &str) -> Result<Option<Manifest>, Self::Error> {
        Ok(self.manifests.read().get(manifest_ref).cloned())
    }

    async fn list(&self) -> Result<Vec<String>, Self::Error> {
        Ok(self.manifests.read().keys().cloned().collect())
    }
}

/// Manifest repository storing one pretty-printed JSON file per ref.
///
/// Files are written to a temporary name and renamed into place, so a
/// crash never leaves a half-written manifest.
#[derive(Debug, Clone)]
pub struct FileManifestRepository {
    dir: PathBuf,
}

impl FileManifestRepository {
    /// Open (or create) a repository in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, manifest_ref: &str) -> Result<PathBuf, RepositoryError> {
        if !is_valid_manifest_ref(manifest_ref) {
            return Err(RepositoryError::InvalidRef(manifest_ref.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", manifest_ref)))
    }

    fn read(path: &Path) -> Result<Option<Manifest>, RepositoryError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ManifestRepository for FileManifestRepository {
    type Error = RepositoryError;

    async fn save(&self, manifest_ref: &str, manifest: &Manifest) -> Result<(), Self::Error> {
        let path = self.path_for(manifest_ref)?;
        match Self::read(&path)? {
            Some(existing) if &existing == manifest => return Ok(()),
            Some(_) => return Err(RepositoryError::Conflict(manifest_ref.to_string())),
            None => {}
        }

        let tmp = self.dir.join(format!(".{}.json.tmp", manifest_ref));
        std::fs::write(&tmp, serde_json::to_vec_pretty(manifest)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn load(&self, manifest_ref: &str) -> Result<Option<Manifest>, Self::Error> {
        Self::read(&self.path_for(manifest_ref)?)
    }

    async fn list(&self) -> Result<Vec<String>, Self::Error> {
        let mut refs = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_valid_manifest_ref(stem) {
                    refs.push(stem.to_string());
                }
            }
        }
        refs.sort();
        Ok(refs)
    }
}

//! Loading a reference corpus from a directory.

use std::path::Path;

use crate::segment::SegmentationPolicy;
use crate::store::{IngestError, ReferenceStore};
use crate::types::ReferenceDocument;

/// File extensions treated as reference documents.
pub const CORPUS_EXTENSIONS: &[&str] = &["md", "txt"];

fn is_corpus_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| CORPUS_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
            .unwrap_or(false)
}

/// Ingest every `*.md` / `*.txt` file directly under `dir`.
///
/// Files are ingested in file-name order with the file name as source id.
/// Stops at the first failure; documents ingested before it stay ingested.
pub async fn ingest_directory<S: ReferenceStore>(
    store: &S,
    dir: &Path,
    policy: &SegmentationPolicy,
) -> Result<Vec<ReferenceDocument>, IngestError> {
    let io_err = |path: &Path, source: std::io::Error| IngestError::File {
        path: path.display().to_string(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let path = entry.map_err(|e| io_err(dir, e))?.path();
        if is_corpus_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let source_id = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| IngestError::Store(format!("non UTF-8 file name: {}", path.display())))?
            .to_string();
        let raw = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
        let document = store
            .ingest_with_source(&raw, &source_id, &path.display().to_string(), policy)
            .await?;
        documents.push(document);
    }

    tracing::info!(
        dir = %dir.display(),
        documents = documents.len(),
        passages = documents.iter().map(|d| d.num_passages()).sum::<usize>(),
        "Reference corpus loaded"
    );
    Ok(documents)
}

use crate::{ChunkDocument, ChunkManifest, IngestError, ManifestSource};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

pub fn discover_manifest_files(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Parse one manifest file and tag every document with where it came from.
pub fn load_manifest(path: &Path) -> Result<ChunkManifest, IngestError> {
    if path.file_name().is_none() {
        return Err(IngestError::MissingFileName(path.display().to_string()));
    }

    let bytes = fs::read(path)?;
    let mut manifest: ChunkManifest = serde_json::from_slice(&bytes)?;
    let source = ManifestSource {
        path: path.to_path_buf(),
        checksum: digest_bytes(&bytes),
        loaded_at: Utc::now(),
    };

    for document in &mut manifest.files {
        validate_dimensions(document)?;
        document.source = Some(source.clone());
    }

    Ok(manifest)
}

/// Every non-empty embedding within a document must share one length.
pub fn validate_dimensions(document: &ChunkDocument) -> Result<(), IngestError> {
    let mut lengths = document
        .chunks
        .iter()
        .map(|chunk| chunk.embedding.len())
        .filter(|len| *len > 0);

    if let Some(expected) = lengths.next() {
        if let Some(found) = lengths.find(|len| *len != expected) {
            return Err(IngestError::InconsistentDimensions {
                document: document.file_name.clone(),
                expected,
                found,
            });
        }
    }

    Ok(())
}

/// The single embedding length shared by every non-empty vector of the
/// manifest, or `None` when nothing is embedded yet.
pub fn manifest_dimensions(manifest: &ChunkManifest) -> Result<Option<usize>, IngestError> {
    let mut expected: Option<usize> = None;

    for document in &manifest.files {
        for chunk in document.chunks.iter().filter(|chunk| !chunk.embedding.is_empty()) {
            match expected {
                None => expected = Some(chunk.embedding.len()),
                Some(len) if len != chunk.embedding.len() => {
                    return Err(IngestError::InconsistentDimensions {
                        document: document.file_name.clone(),
                        expected: len,
                        found: chunk.embedding.len(),
                    });
                }
                Some(_) => {}
            }
        }
    }

    Ok(expected)
}

pub struct SkippedManifest {
    pub path: PathBuf,
    pub reason: String,
}

pub struct ManifestReport {
    pub manifest: ChunkManifest,
    pub skipped_files: Vec<SkippedManifest>,
}

/// Load a manifest file, or every manifest under a folder, skipping files
/// that fail to load.
pub fn load_manifests_best_effort(path: &Path) -> Result<ManifestReport, IngestError> {
    let files = if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        discover_manifest_files(path)
    };

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no manifest files found in {}",
            path.display()
        )));
    }

    let mut manifest = ChunkManifest::default();
    let mut skipped_files = Vec::new();

    for file in files {
        match load_manifest(&file) {
            Ok(loaded) => manifest.files.extend(loaded.files),
            Err(error) => {
                warn!(path = %file.display(), %error, "skipping manifest");
                skipped_files.push(SkippedManifest {
                    path: file,
                    reason: error.to_string(),
                });
            }
        }
    }

    manifest_dimensions(&manifest)?;

    Ok(ManifestReport {
        manifest,
        skipped_files,
    })
}

//! Checksum manifest shipped alongside every released study.
//!
//! The manifest is written into the staging directory before transfer, in
//! `sha256sum` format, so that the public copy can be verified with stock
//! tools.

use std::fs::File;
use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::SyncError;
use crate::layout::write_bytes_atomic;
use crate::study_index::HARMONISED_MARKER;

pub const MANIFEST_FILE_NAME: &str = "sha256sum.txt";

const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path relative to the study directory, `/`-separated.
    pub path: String,
    pub digest: String,
}

pub fn sha256_file(path: &Utf8Path) -> Result<String, SyncError> {
    let mut file = File::open(path.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("open {path}: {err}")))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|err| SyncError::Filesystem(format!("read {path}: {err}")))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digests of every published file of a study, sorted by path.
/// Hidden files, the harmonised subtree and the manifest itself are skipped.
pub fn build_manifest(study_dir: &Utf8Path) -> Result<Vec<ManifestEntry>, SyncError> {
    let mut entries = Vec::new();
    let walker = WalkDir::new(study_dir.as_std_path())
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !name.starts_with('.') && !(entry.depth() == 1 && name == HARMONISED_MARKER)
        });
    for entry in walker {
        let entry = entry.map_err(|err| SyncError::Filesystem(err.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.depth() == 1 && entry.file_name() == MANIFEST_FILE_NAME {
            continue;
        }
        let path = Utf8PathBuf::from_path_buf(entry.into_path())
            .map_err(|_| SyncError::Filesystem("non-utf8 file path in study".to_string()))?;
        let relative = path
            .strip_prefix(study_dir)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?
            .components()
            .map(|component| component.as_str())
            .collect::<Vec<_>>()
            .join("/");
        entries.push(ManifestEntry {
            digest: sha256_file(&path)?,
            path: relative,
        });
    }
    Ok(entries)
}

pub fn render_manifest(entries: &[ManifestEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("{}  {}\n", entry.digest, entry.path))
        .collect()
}

/// Writes `sha256sum.txt` into the study directory and returns its path.
pub fn write_manifest(study_dir: &Utf8Path) -> Result<Utf8PathBuf, SyncError> {
    let entries = build_manifest(study_dir)?;
    let manifest = study_dir.join(MANIFEST_FILE_NAME);
    write_bytes_atomic(&manifest, render_manifest(&entries).as_bytes())?;
    Ok(manifest)
}

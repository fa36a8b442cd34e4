use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use crate::domain::StudyAccession;
use crate::error::SyncError;

/// Roots of the three areas a study moves through.
#[derive(Debug, Clone)]
pub struct Layout {
    staging_root: Utf8PathBuf,
    mirror_root: Utf8PathBuf,
    harmonisation_root: Option<Utf8PathBuf>,
}

impl Layout {
    pub fn new(staging_root: Utf8PathBuf, mirror_root: Utf8PathBuf) -> Self {
        Self {
            staging_root,
            mirror_root,
            harmonisation_root: None,
        }
    }

    pub fn with_harmonisation_root(mut self, root: Utf8PathBuf) -> Self {
        self.harmonisation_root = Some(root);
        self
    }

    pub fn staging_root(&self) -> &Utf8Path {
        &self.staging_root
    }

    pub fn mirror_root(&self) -> &Utf8Path {
        &self.mirror_root
    }

    pub fn harmonisation_root(&self) -> Result<&Utf8Path, SyncError> {
        self.harmonisation_root
            .as_deref()
            .ok_or(SyncError::MissingSetting("harmonisation_dir"))
    }

    pub fn staging_study_dir(&self, accession: &StudyAccession) -> Utf8PathBuf {
        study_dir(&self.staging_root, accession)
    }

    pub fn mirror_study_dir(&self, accession: &StudyAccession) -> Utf8PathBuf {
        study_dir(&self.mirror_root, accession)
    }

    pub fn harmonisation_study_dir(
        &self,
        accession: &StudyAccession,
    ) -> Result<Utf8PathBuf, SyncError> {
        Ok(self.harmonisation_root()?.join(accession.as_str()))
    }
}

/// `<root>/<bin>/<accession>`
pub fn study_dir(root: &Utf8Path, accession: &StudyAccession) -> Utf8PathBuf {
    root.join(accession.range_bin().name())
        .join(accession.as_str())
}

pub fn ensure_dir(path: &Utf8Path) -> Result<(), SyncError> {
    fs::create_dir_all(path.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("create {path}: {err}")))
}

/// Writes through a uniquely named hidden temp file in the same directory,
/// then renames it over `path`.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), SyncError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    ensure_dir(parent)?;
    let mut temp = tempfile::Builder::new()
        .prefix(".sumstats-sync")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("temp file in {parent}: {err}")))?;
    temp.write_all(content)
        .map_err(|err| SyncError::Filesystem(format!("write {path}: {err}")))?;
    temp.persist(path.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("replace {path}: {}", err.error)))?;
    Ok(())
}

/// Copies the tree under `source` into `dest`, creating `dest` as needed.
pub fn copy_dir_recursive(source: &Utf8Path, dest: &Utf8Path) -> Result<(), SyncError> {
    for entry in WalkDir::new(source.as_std_path()) {
        let entry = entry.map_err(|err| SyncError::Filesystem(format!("walk {source}: {err}")))?;
        let relative = entry
            .path()
            .strip_prefix(source.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let target = dest.as_std_path().join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|err| SyncError::Filesystem(format!("create {}: {err}", target.display())))?;
        } else {
            fs::copy(entry.path(), &target)
                .map_err(|err| SyncError::Filesystem(format!("copy {}: {err}", target.display())))?;
        }
    }
    Ok(())
}

/// Moves a directory, falling back to copy + delete across filesystems.
/// Never replaces an existing destination.
pub fn move_dir(source: &Utf8Path, dest: &Utf8Path) -> Result<(), SyncError> {
    if dest.as_std_path().exists() {
        return Err(SyncError::Filesystem(format!(
            "refusing to overwrite existing directory {dest}"
        )));
    }
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }
    match fs::rename(source.as_std_path(), dest.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            copy_dir_recursive(source, dest)?;
            fs::remove_dir_all(source.as_std_path())
                .map_err(|err| SyncError::Filesystem(err.to_string()))
        }
        Err(err) => Err(SyncError::Filesystem(format!(
            "move {source} -> {dest}: {err}"
        ))),
    }
}

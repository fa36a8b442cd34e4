//! Set-membership view of a binned study tree (staging or FTP mirror).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use walkdir::WalkDir;

use crate::binning::looks_like_bin;
use crate::checksum::MANIFEST_FILE_NAME;
use crate::domain::StudyAccession;
use crate::error::SyncError;
use crate::layout::study_dir;

pub const HARMONISED_MARKER: &str = "harmonised";

/// `root/bin/study/file`
const STUDY_FILE_DEPTH: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct StudyEntry {
    pub accession: StudyAccession,
    pub path: Utf8PathBuf,
    pub harmonised: bool,
    /// Directory withheld from the public (no read access for "other").
    pub withdrawn: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StudyScan {
    pub entries: BTreeMap<StudyAccession, StudyEntry>,
    /// Directory names inside bins that are not valid accessions.
    pub rejected: Vec<String>,
}

impl StudyScan {
    pub fn accessions(&self) -> BTreeSet<StudyAccession> {
        self.entries.keys().cloned().collect()
    }

    pub fn harmonised(&self) -> BTreeSet<StudyAccession> {
        self.select(|entry| entry.harmonised)
    }

    pub fn visible(&self) -> BTreeSet<StudyAccession> {
        self.select(|entry| !entry.withdrawn)
    }

    pub fn withdrawn(&self) -> BTreeSet<StudyAccession> {
        self.select(|entry| entry.withdrawn)
    }

    pub fn get(&self, accession: &StudyAccession) -> Option<&StudyEntry> {
        self.entries.get(accession)
    }

    fn select(&self, keep: impl Fn(&StudyEntry) -> bool) -> BTreeSet<StudyAccession> {
        self.entries
            .values()
            .filter(|entry| keep(entry))
            .map(|entry| entry.accession.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct StudyIndex {
    root: Utf8PathBuf,
}

impl StudyIndex {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Lists every study directory. A missing root is an empty tree.
    pub fn scan(&self) -> Result<StudyScan, SyncError> {
        let mut scan = StudyScan::default();
        let Some(bins) = read_dir_names(&self.root)? else {
            return Ok(scan);
        };
        for bin in bins.into_iter().filter(|name| looks_like_bin(name)) {
            let bin_dir = self.root.join(&bin);
            if !bin_dir.is_dir() {
                continue;
            }
            let Some(children) = read_dir_names(&bin_dir)? else {
                continue;
            };
            for name in children {
                let path = bin_dir.join(&name);
                if !path.is_dir() {
                    continue;
                }
                let accession = match name.parse::<StudyAccession>() {
                    Ok(accession) => accession,
                    Err(_) => {
                        tracing::warn!(path = %path, "skipping malformed study directory");
                        scan.rejected.push(name);
                        continue;
                    }
                };
                if accession.range_bin().name() != bin {
                    tracing::debug!(%accession, bin = %bin, "study stored outside its canonical bin");
                }
                let entry = StudyEntry {
                    harmonised: path.join(HARMONISED_MARKER).exists(),
                    withdrawn: is_withdrawn(&path)?,
                    accession: accession.clone(),
                    path,
                };
                if let Some(previous) = scan.entries.insert(accession, entry) {
                    tracing::warn!(path = %previous.path, "study present in more than one bin");
                }
            }
        }
        Ok(scan)
    }

    pub fn all_studies(&self) -> Result<BTreeSet<StudyAccession>, SyncError> {
        Ok(self.scan()?.accessions())
    }

    pub fn harmonised_studies(&self) -> Result<BTreeSet<StudyAccession>, SyncError> {
        Ok(self.scan()?.harmonised())
    }

    /// Studies owning a file modified after `since`. Failures are logged and
    /// reported as "nothing changed".
    pub fn studies_modified_since(&self, since: DateTime<Utc>) -> BTreeSet<StudyAccession> {
        match self.try_modified_since(since) {
            Ok(studies) => studies,
            Err(err) => {
                tracing::warn!(root = %self.root, error = %err, "modification scan failed");
                BTreeSet::new()
            }
        }
    }

    fn try_modified_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<BTreeSet<StudyAccession>, SyncError> {
        let mut studies = BTreeSet::new();
        let walker = WalkDir::new(self.root.as_std_path())
            .min_depth(STUDY_FILE_DEPTH)
            .max_depth(STUDY_FILE_DEPTH);
        for entry in walker {
            let entry = entry.map_err(|err| SyncError::Filesystem(err.to_string()))?;
            if !entry.file_type().is_file() || entry.file_name() == MANIFEST_FILE_NAME {
                continue;
            }
            let modified = entry
                .metadata()
                .map_err(|err| SyncError::Filesystem(err.to_string()))?
                .modified()
                .map_err(|err| SyncError::Filesystem(err.to_string()))?;
            if DateTime::<Utc>::from(modified) <= since {
                continue;
            }
            let owner = entry
                .path()
                .parent()
                .and_then(|dir| dir.file_name())
                .and_then(|name| name.to_str())
                .and_then(|name| name.parse::<StudyAccession>().ok());
            if let Some(accession) = owner {
                studies.insert(accession);
            }
        }
        Ok(studies)
    }

    /// Existing directory of a study, wherever it is binned.
    pub fn locate(&self, accession: &StudyAccession) -> Result<Option<Utf8PathBuf>, SyncError> {
        let canonical = self.canonical_path(accession);
        if canonical.is_dir() {
            return Ok(Some(canonical));
        }
        Ok(self.scan()?.get(accession).map(|entry| entry.path.clone()))
    }

    pub fn canonical_path(&self, accession: &StudyAccession) -> Utf8PathBuf {
        study_dir(&self.root, accession)
    }
}

fn read_dir_names(dir: &Utf8Path) -> Result<Option<Vec<String>>, SyncError> {
    let entries = match fs::read_dir(dir.as_std_path()) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(SyncError::Filesystem(format!("list {dir}: {err}"))),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| SyncError::Filesystem(format!("list {dir}: {err}")))?;
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => tracing::warn!(dir = %dir, name = ?raw, "skipping non-utf8 entry"),
        }
    }
    names.sort();
    Ok(Some(names))
}

#[cfg(unix)]
fn is_withdrawn(path: &Utf8Path) -> Result<bool, SyncError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("stat {path}: {err}")))?
        .permissions()
        .mode();
    Ok(mode & 0o005 == 0)
}

#[cfg(not(unix))]
fn is_withdrawn(_path: &Utf8Path) -> Result<bool, SyncError> {
    Ok(false)
}

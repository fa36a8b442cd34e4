//! Moves settled deposition directories into their staging bin.

use std::fs;
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;

use crate::domain::StudyAccession;
use crate::error::SyncError;
use crate::layout::{Layout, ensure_dir};
use crate::transfer::{Transfer, TransferRequest};

pub const DEFAULT_MIN_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Serialize)]
pub struct DepositedStudy {
    pub accession: StudyAccession,
    pub source: Utf8PathBuf,
    pub destination: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositFailure {
    pub source: Utf8PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DepositReport {
    pub dry_run: bool,
    pub synced: Vec<DepositedStudy>,
    /// Still being written; left for a later run.
    pub too_recent: Vec<Utf8PathBuf>,
    /// Entries without an accession in their name.
    pub ignored: Vec<Utf8PathBuf>,
    pub failures: Vec<DepositFailure>,
}

pub struct DepositionSync<T: Transfer> {
    source_root: Utf8PathBuf,
    layout: Layout,
    transfer: T,
    min_age: Duration,
    accession_re: Regex,
}

impl<T: Transfer> DepositionSync<T> {
    pub fn new(
        source_root: impl Into<Utf8PathBuf>,
        layout: Layout,
        transfer: T,
        min_age: Duration,
    ) -> Result<Self, SyncError> {
        let accession_re = Regex::new(r"GCST[0-9]+")
            .map_err(|err| SyncError::MalformedAccession(err.to_string()))?;
        Ok(Self {
            source_root: source_root.into(),
            layout,
            transfer,
            min_age,
            accession_re,
        })
    }

    /// Accession embedded in a deposition directory name.
    pub fn accession_in(&self, name: &str) -> Option<StudyAccession> {
        self.accession_re
            .find(name)
            .and_then(|found| found.as_str().parse().ok())
    }

    pub fn run(&self, dry_run: bool) -> Result<DepositReport, SyncError> {
        let mut report = DepositReport {
            dry_run,
            ..DepositReport::default()
        };
        let now = SystemTime::now();
        for path in self.candidates()? {
            let Some(name) = path.file_name() else {
                continue;
            };
            let Some(accession) = self.accession_in(name) else {
                tracing::debug!(%path, "no accession in deposition directory name");
                report.ignored.push(path);
                continue;
            };
            match age_of(&path, now) {
                Ok(age) if age < self.min_age => {
                    tracing::debug!(%path, age_secs = age.as_secs(), "deposition too recent");
                    report.too_recent.push(path);
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    report.failures.push(DepositFailure {
                        source: path,
                        message: err.to_string(),
                    });
                    continue;
                }
            }

            let destination = self.layout.staging_study_dir(&accession);
            if !dry_run {
                if let Err(err) = self.sync_one(&path, &destination) {
                    tracing::error!(source = %path, error = %err, "deposition sync failed");
                    report.failures.push(DepositFailure {
                        source: path,
                        message: err.to_string(),
                    });
                    continue;
                }
            }
            tracing::info!(%accession, source = %path, %destination, dry_run, "deposited");
            report.synced.push(DepositedStudy {
                accession,
                source: path,
                destination,
            });
        }
        Ok(report)
    }

    fn candidates(&self) -> Result<Vec<Utf8PathBuf>, SyncError> {
        let entries = fs::read_dir(self.source_root.as_std_path()).map_err(|err| {
            SyncError::Filesystem(format!("list {}: {err}", self.source_root))
        })?;
        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| SyncError::Filesystem(err.to_string()))?;
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
            if is_dir && path.file_name().is_some_and(|name| name.starts_with("GCST")) {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn sync_one(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), SyncError> {
        ensure_dir(destination)?;
        self.transfer
            .transfer(&TransferRequest::deposition(source, destination))?;
        fs::remove_dir_all(source.as_std_path())
            .map_err(|err| SyncError::Filesystem(format!("remove {source}: {err}")))
    }
}

fn age_of(path: &Utf8Path, now: SystemTime) -> Result<Duration, SyncError> {
    let modified = fs::metadata(path.as_std_path())
        .and_then(|meta| meta.modified())
        .map_err(|err| SyncError::Filesystem(format!("stat {path}: {err}")))?;
    Ok(now.duration_since(modified).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoTransfer;

    impl Transfer for NoTransfer {
        fn transfer(&self, _request: &TransferRequest) -> Result<(), SyncError> {
            Err(SyncError::Transfer("unexpected".to_string()))
        }
    }

    fn sync(root: &Utf8Path) -> DepositionSync<NoTransfer> {
        DepositionSync::new(
            root,
            Layout::new(root.join("staging"), root.join("ftp")),
            NoTransfer,
            DEFAULT_MIN_AGE,
        )
        .unwrap()
    }

    #[test]
    fn accession_is_taken_from_the_directory_name() {
        let sync = sync(Utf8Path::new("/deposit"));
        assert_eq!(
            sync.accession_in("GCST90012345_upload").unwrap().as_str(),
            "GCST90012345"
        );
        assert!(sync.accession_in("GCSTabc").is_none());
    }

    #[test]
    fn fresh_depositions_are_left_alone() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("GCST000123")).unwrap();
        let report = sync(&root).run(false).unwrap();
        assert!(report.synced.is_empty());
        assert_eq!(report.too_recent, vec![root.join("GCST000123")]);
        assert!(root.join("GCST000123").exists());
    }
}

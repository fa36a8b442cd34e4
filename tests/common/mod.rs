#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use sumstats_sync::catalog::CatalogClient;
use sumstats_sync::domain::StudyAccession;
use sumstats_sync::error::SyncError;
use sumstats_sync::layout::{Layout, study_dir};
use sumstats_sync::transfer::{Transfer, TransferRequest};

/// Copies on the local filesystem, honouring include/exclude patterns on
/// top-level names. Requests whose source directory is named in `fail_for`
/// fail.
#[derive(Default)]
pub struct LocalTransfer {
    pub fail_for: BTreeSet<String>,
    pub requests: Mutex<Vec<TransferRequest>>,
}

impl LocalTransfer {
    pub fn failing_for(studies: &[&str]) -> Self {
        Self {
            fail_for: studies.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transfer for LocalTransfer {
    fn transfer(&self, request: &TransferRequest) -> Result<(), SyncError> {
        self.requests.lock().unwrap().push(request.clone());
        let name = request.source.file_name().unwrap_or_default();
        if self.fail_for.contains(name) {
            return Err(SyncError::Transfer(format!("simulated failure for {name}")));
        }
        fs::create_dir_all(&request.destination).unwrap();
        for entry in fs::read_dir(&request.source).unwrap() {
            let entry = entry.unwrap();
            let file_name = entry.file_name().into_string().unwrap();
            if !selected(request, &file_name) {
                continue;
            }
            let source = Utf8PathBuf::from_path_buf(entry.path()).unwrap();
            let target = request.destination.join(&file_name);
            if source.is_dir() {
                sumstats_sync::layout::copy_dir_recursive(&source, &target)?;
            } else {
                fs::copy(&source, &target).unwrap();
            }
        }
        Ok(())
    }
}

fn matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

fn selected(request: &TransferRequest, name: &str) -> bool {
    if request.include.iter().any(|p| matches(p, name)) {
        return true;
    }
    !request.exclude.iter().any(|p| matches(p, name))
}

#[derive(Default)]
pub struct MockCatalog {
    pub published: Vec<String>,
    pub embargoed: Vec<String>,
    pub unreachable: bool,
}

impl MockCatalog {
    pub fn published(ids: &[&str]) -> Self {
        Self {
            published: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl CatalogClient for MockCatalog {
    fn list_published_accessions(&self) -> Result<Vec<String>, SyncError> {
        if self.unreachable {
            return Err(SyncError::CatalogHttp("connection refused".to_string()));
        }
        Ok(self.published.clone())
    }

    fn list_embargoed_releasable_accessions(&self) -> Result<Vec<String>, SyncError> {
        if self.unreachable {
            return Err(SyncError::CatalogHttp("connection refused".to_string()));
        }
        Ok(self.embargoed.clone())
    }
}

/// Staging, mirror and harmonisation roots under one temp dir.
pub struct Areas {
    _temp: tempfile::TempDir,
    pub root: Utf8PathBuf,
    pub staging: Utf8PathBuf,
    pub ftp: Utf8PathBuf,
    pub harmonisation: Utf8PathBuf,
}

impl Areas {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let areas = Self {
            staging: root.join("staging"),
            ftp: root.join("ftp"),
            harmonisation: root.join("harmonisation"),
            root,
            _temp: temp,
        };
        fs::create_dir_all(&areas.staging).unwrap();
        fs::create_dir_all(&areas.ftp).unwrap();
        fs::create_dir_all(&areas.harmonisation).unwrap();
        areas
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.staging.clone(), self.ftp.clone())
            .with_harmonisation_root(self.harmonisation.clone())
    }
}

pub fn acc(id: &str) -> StudyAccession {
    id.parse().unwrap()
}

/// Creates `<root>/<bin>/<id>/` with a summary statistics file and metadata.
pub fn add_study(root: &Utf8Path, id: &str, file_type: &str) -> Utf8PathBuf {
    let dir = study_dir(root, &acc(id));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{id}.tsv.gz")), format!("{id} data")).unwrap();
    fs::write(
        dir.join(format!("{id}.tsv.gz-meta.yaml")),
        format!("file_type: {file_type}\n"),
    )
    .unwrap();
    dir
}

pub fn mark_harmonised(root: &Utf8Path, id: &str) {
    let dir = study_dir(root, &acc(id)).join("harmonised");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{id}.h.tsv.gz")), "harmonised").unwrap();
}

pub fn ids(list: &[String]) -> Vec<&str> {
    list.iter().map(String::as_str).collect()
}

mod common;

use std::fs;

use chrono::{Duration, Utc};

use common::{acc, add_study, mark_harmonised};
use sumstats_sync::checksum::MANIFEST_FILE_NAME;
use sumstats_sync::study_index::StudyIndex;

#[test]
fn missing_root_is_an_empty_tree() {
    let temp = tempfile::tempdir().unwrap();
    let root = camino::Utf8PathBuf::from_path_buf(temp.path().join("absent")).unwrap();
    let scan = StudyIndex::new(root).scan().unwrap();
    assert!(scan.entries.is_empty());
    assert!(scan.rejected.is_empty());
}

#[test]
fn scan_lists_studies_and_rejects_junk() {
    let areas = common::Areas::new();
    add_study(&areas.staging, "GCST000001", "GWAS-SSF v1.0");
    add_study(&areas.staging, "GCST010500", "GWAS-SSF v1.0");
    mark_harmonised(&areas.staging, "GCST010500");

    let bin = acc("GCST000001").range_bin().name();
    fs::create_dir_all(areas.staging.join(&bin).join("scratch")).unwrap();
    fs::create_dir_all(areas.staging.join("not-a-bin").join("GCST000002")).unwrap();
    fs::write(areas.staging.join(&bin).join("README"), "notes").unwrap();

    let index = StudyIndex::new(areas.staging.clone());
    let scan = index.scan().unwrap();
    let ids: Vec<&str> = scan.entries.keys().map(|a| a.as_str()).collect();
    assert_eq!(ids, vec!["GCST000001", "GCST010500"]);
    assert_eq!(scan.rejected, vec!["scratch".to_string()]);
    assert_eq!(
        index.harmonised_studies().unwrap().into_iter().collect::<Vec<_>>(),
        vec![acc("GCST010500")]
    );
}

#[test]
fn locate_finds_studies_outside_their_bin() {
    let areas = common::Areas::new();
    let stray_bin = acc("GCST000001").range_bin().name();
    let stray = areas.ftp.join(&stray_bin).join("GCST90000999");
    fs::create_dir_all(&stray).unwrap();
    add_study(&areas.ftp, "GCST000001", "GWAS-SSF v1.0");

    let index = StudyIndex::new(areas.ftp.clone());
    let study = acc("GCST90000999");
    assert_ne!(index.canonical_path(&study), stray);
    assert_eq!(index.locate(&study).unwrap(), Some(stray));
    assert_eq!(
        index.locate(&acc("GCST000001")).unwrap(),
        Some(index.canonical_path(&acc("GCST000001")))
    );
    assert_eq!(index.locate(&acc("GCST000002")).unwrap(), None);
}

#[test]
fn modification_scan_ignores_checksum_manifest() {
    let areas = common::Areas::new();
    add_study(&areas.staging, "GCST000001", "GWAS-SSF v1.0");
    let manifest_only = acc("GCST000002");
    let dir = areas.staging.join(manifest_only.range_bin().name()).join("GCST000002");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(MANIFEST_FILE_NAME), "abc  GCST000002.tsv.gz\n").unwrap();

    let index = StudyIndex::new(areas.staging.clone());
    let hour_ago = Utc::now() - Duration::hours(1);
    let modified = index.studies_modified_since(hour_ago);
    assert_eq!(modified.into_iter().collect::<Vec<_>>(), vec![acc("GCST000001")]);

    let later = Utc::now() + Duration::hours(1);
    assert!(index.studies_modified_since(later).is_empty());
}

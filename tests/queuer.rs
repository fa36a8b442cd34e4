mod common;

use std::fs;

use chrono::{Duration, Utc};

use sumstats_sync::domain::{HarmonisationType, Priority, QueueRecord, QueueState};
use sumstats_sync::queue_store::{QueueFilter, QueueStore};
use sumstats_sync::queuer::{AddOptions, HarmonisationQueuer};

use common::{Areas, LocalTransfer, acc, add_study, mark_harmonised};

fn queuer<'a>(areas: &Areas, transfer: &'a LocalTransfer) -> HarmonisationQueuer<&'a LocalTransfer> {
    HarmonisationQueuer::new(QueueStore::open_in_memory().unwrap(), areas.layout(), transfer)
}

#[test]
fn rebuild_records_every_mirrored_study() {
    let areas = Areas::new();
    add_study(&areas.ftp, "GCST000001", "GWAS-SSF v1.0");
    mark_harmonised(&areas.ftp, "GCST000001");
    add_study(&areas.ftp, "GCST000002", "pre-GWAS-SSF");

    let transfer = LocalTransfer::default();
    let mut queuer = queuer(&areas, &transfer);
    let report = queuer.rebuild().unwrap();
    assert_eq!(report.scanned, 2);

    let records = queuer.list(&QueueFilter::default()).unwrap();
    assert_eq!(records.len(), 2);
    let s1 = queuer.store().get(&acc("GCST000001")).unwrap().unwrap();
    let s2 = queuer.store().get(&acc("GCST000002")).unwrap().unwrap();
    assert!(s1.is_harmonised);
    assert!(!s2.is_harmonised);
    assert_eq!(s2.harmonisation_type, HarmonisationType::V0);
    assert_eq!(s2.priority, Priority::Medium);
    assert!(queuer.store().last_run().unwrap().is_some());
}

#[test]
fn refresh_without_history_rebuilds() {
    let areas = Areas::new();
    add_study(&areas.ftp, "GCST000003", "GWAS-SSF v1.0");

    let transfer = LocalTransfer::default();
    let mut queuer = queuer(&areas, &transfer);
    queuer.refresh().unwrap();

    let record = queuer.store().get(&acc("GCST000003")).unwrap().unwrap();
    assert_eq!(record.state(), QueueState::Queued);
}

#[test]
fn refresh_picks_up_new_studies_and_harmonised_markers() {
    let areas = Areas::new();
    add_study(&areas.ftp, "GCST000001", "GWAS-SSF v1.0");

    let store = QueueStore::open_in_memory().unwrap();
    let mut in_progress = QueueRecord::queued(acc("GCST000001"), HarmonisationType::V1);
    in_progress.in_progress = true;
    store.upsert(&in_progress).unwrap();
    store.record_run(Utc::now() - Duration::hours(1)).unwrap();

    let transfer = LocalTransfer::default();
    let mut queuer = HarmonisationQueuer::new(store, areas.layout(), &transfer);

    add_study(&areas.ftp, "GCST000002", "GWAS-SSF v1.0");
    mark_harmonised(&areas.ftp, "GCST000001");

    let report = queuer.refresh().unwrap();
    assert_eq!(report.harmonised, vec![acc("GCST000001")]);
    assert!(report.upserted.contains(&acc("GCST000002")));

    let s1 = queuer.store().get(&acc("GCST000001")).unwrap().unwrap();
    assert!(s1.is_harmonised);
    assert!(!s1.in_progress);
    let s2 = queuer.store().get(&acc("GCST000002")).unwrap().unwrap();
    assert_eq!(s2.state(), QueueState::Queued);
    assert!(queuer.store().last_run().unwrap().unwrap() > Utc::now() - Duration::minutes(5));
}

#[test]
fn harmonised_flag_never_reverts() {
    let areas = Areas::new();
    add_study(&areas.ftp, "GCST000001", "GWAS-SSF v1.0");
    mark_harmonised(&areas.ftp, "GCST000001");

    let transfer = LocalTransfer::default();
    let mut queuer = queuer(&areas, &transfer);
    queuer.rebuild().unwrap();

    // Marker disappears and the study's files change.
    fs::remove_dir_all(areas.ftp.join("GCST000001-GCST001000/GCST000001/harmonised")).unwrap();
    fs::write(
        areas.ftp.join("GCST000001-GCST001000/GCST000001/GCST000001.tsv.gz"),
        "rewritten",
    )
    .unwrap();

    queuer.refresh().unwrap();
    queuer.rebuild().unwrap();
    let record = queuer.store().get(&acc("GCST000001")).unwrap().unwrap();
    assert!(record.is_harmonised);
}

#[test]
fn release_marks_only_successful_transfers() {
    let areas = Areas::new();
    for id in ["GCST000001", "GCST000002", "GCST000003"] {
        add_study(&areas.ftp, id, "GWAS-SSF v1.0");
        add_study(&areas.staging, id, "GWAS-SSF v1.0");
    }
    fs::write(
        areas.staging.join("GCST000001-GCST001000/GCST000001/unrelated.txt"),
        "not a sumstats file",
    )
    .unwrap();
    add_study(&areas.ftp, "GCST000004", "something else");

    let transfer = LocalTransfer::failing_for(&["GCST000002"]);
    let mut queuer = queuer(&areas, &transfer);
    queuer.rebuild().unwrap();

    let report = queuer.release(&QueueFilter::pending(), None).unwrap();
    assert_eq!(report.released, vec![acc("GCST000001"), acc("GCST000003")]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].study, acc("GCST000002"));

    let store = queuer.store();
    assert!(store.get(&acc("GCST000001")).unwrap().unwrap().in_progress);
    assert!(!store.get(&acc("GCST000002")).unwrap().unwrap().in_progress);
    assert!(!store.get(&acc("GCST000004")).unwrap().unwrap().in_progress);

    let copied = areas.harmonisation.join("GCST000001");
    assert!(copied.join("GCST000001.tsv.gz").is_file());
    assert!(!copied.join("unrelated.txt").exists());

    // Failed study is still eligible next time.
    let retry = queuer.release(&QueueFilter::pending(), None).unwrap();
    assert_eq!(retry.scanned, 1);
}

#[test]
fn release_takes_highest_priority_first() {
    let areas = Areas::new();
    for id in ["GCST000001", "GCST000002"] {
        add_study(&areas.ftp, id, "GWAS-SSF v1.0");
        add_study(&areas.staging, id, "GWAS-SSF v1.0");
    }
    let transfer = LocalTransfer::default();
    let mut queuer = queuer(&areas, &transfer);
    queuer.rebuild().unwrap();
    queuer
        .add(
            &[acc("GCST000002")],
            &AddOptions {
                priority: Some(Priority::High),
                ..AddOptions::default()
            },
        )
        .unwrap();

    let report = queuer.release(&QueueFilter::pending(), Some(1)).unwrap();
    assert_eq!(report.released, vec![acc("GCST000002")]);
}

#[test]
fn add_overrides_type_and_requeue_recovers() {
    let areas = Areas::new();
    add_study(&areas.ftp, "GCST000001", "GWAS-SSF v1.0");
    let transfer = LocalTransfer::default();
    let mut queuer = queuer(&areas, &transfer);
    queuer.rebuild().unwrap();

    queuer
        .add(
            &[acc("GCST000001")],
            &AddOptions {
                harmonisation_type: Some(HarmonisationType::NotToHarmonise),
                ..AddOptions::default()
            },
        )
        .unwrap();
    let record = queuer.store().get(&acc("GCST000001")).unwrap().unwrap();
    assert_eq!(record.state(), QueueState::Skipped);

    let unknown = queuer.add(&[acc("GCST000777")], &AddOptions::default()).unwrap();
    assert_eq!(unknown.failures.len(), 1);

    queuer.store().set_in_progress(&acc("GCST000001"), true).unwrap();
    let report = queuer.requeue(&[acc("GCST000001"), acc("GCST000777")]).unwrap();
    assert_eq!(report.requeued, vec![acc("GCST000001")]);
    assert_eq!(report.failures.len(), 1);
    assert!(!queuer.store().get(&acc("GCST000001")).unwrap().unwrap().in_progress);
}

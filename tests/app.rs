mod common;

use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;

use common::{LocalTransfer, MockCatalog, acc, add_study, ids};
use sumstats_sync::app::{App, Area, ReleaseRunOptions, SubmitOptions, TracingSink};
use sumstats_sync::config::{Config, ConfigLoader, Overrides, ResolvedConfig};
use sumstats_sync::domain::{HarmonisationType, QueueRecord};
use sumstats_sync::error::SyncError;
use sumstats_sync::marker::MarkerFile;
use sumstats_sync::notify::{Message, Notifier};
use sumstats_sync::queue_store::{QueueFilter, QueueStore};
use sumstats_sync::report::REPORT_SUBJECT;
use sumstats_sync::scheduler::{JobId, JobScheduler, JobSpec, JobStatus, PollOutcome, PollPolicy};

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Message>>,
}

impl Notifier for RecordingNotifier {
    fn send(&self, message: &Message) -> Result<(), SyncError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
struct DoneScheduler {
    submitted: Mutex<Vec<JobSpec>>,
}

impl JobScheduler for DoneScheduler {
    fn submit(&self, spec: &JobSpec) -> Result<JobId, SyncError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(spec.clone());
        Ok(JobId(submitted.len().to_string()))
    }

    fn status(&self, _id: &JobId) -> Result<JobStatus, SyncError> {
        Ok(JobStatus::Done)
    }

    fn kill(&self, _id: &JobId) -> Result<(), SyncError> {
        Ok(())
    }
}

fn config_for(areas: &common::Areas) -> ResolvedConfig {
    let config = Config {
        staging_dir: Some(areas.staging.clone()),
        ftp_dir: Some(areas.ftp.clone()),
        harmonisation_dir: Some(areas.harmonisation.clone()),
        queue_db: Some(areas.root.join("state").join("queue.sqlite")),
        release_marker: Some(areas.root.join("state").join("marker.json")),
        email_recipient: Some("sumstats@example.org".to_string()),
        ..Config::default()
    };
    ConfigLoader::resolve_config(config, Overrides::default()).unwrap()
}

#[test]
fn release_advances_marker_and_mails_report() {
    let areas = common::Areas::new();
    add_study(&areas.staging, "GCST000001", "GWAS-SSF v1.0");
    add_study(&areas.staging, "GCST000002", "GWAS-SSF v1.0");
    let config = config_for(&areas);
    let marker = MarkerFile::new(config.release_marker.clone());
    let app = App::new(
        config,
        MockCatalog::published(&["GCST000001", "GCST000002"]),
        LocalTransfer::default(),
        RecordingNotifier::default(),
    );

    let dry = app
        .release(
            &ReleaseRunOptions {
                dry_run: true,
                ..ReleaseRunOptions::default()
            },
            &TracingSink,
        )
        .unwrap();
    assert_eq!(ids(&dry.released), vec!["GCST000001", "GCST000002"]);
    assert!(marker.load().unwrap().is_none());

    let first = app
        .release(&ReleaseRunOptions::default(), &TracingSink)
        .unwrap();
    assert_eq!(first.action_count(), 2);
    assert_eq!(
        marker.load().unwrap().unwrap().last_release,
        first.started_at
    );

    let second = app
        .release(&ReleaseRunOptions::default(), &TracingSink)
        .unwrap();
    assert_eq!(second.action_count(), 0);

    let sent = app_notifications(&app);
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].subject, format!("[dry run] {REPORT_SUBJECT}"));
    assert_eq!(sent[1].subject, REPORT_SUBJECT);
    assert_eq!(sent[1].recipient, "sumstats@example.org");
    assert!(sent[1].body.contains("GCST000002"));
}

#[test]
fn failed_release_keeps_marker_and_no_email_is_silent() {
    let areas = common::Areas::new();
    add_study(&areas.staging, "GCST000001", "GWAS-SSF v1.0");
    let config = config_for(&areas);
    let marker = MarkerFile::new(config.release_marker.clone());
    let app = App::new(
        config,
        MockCatalog::published(&["GCST000001"]),
        LocalTransfer::failing_for(&["GCST000001"]),
        RecordingNotifier::default(),
    );

    let report = app
        .release(
            &ReleaseRunOptions {
                no_email: true,
                ..ReleaseRunOptions::default()
            },
            &TracingSink,
        )
        .unwrap();
    assert!(report.has_failures());
    assert!(marker.load().unwrap().is_none());
    assert!(app_notifications(&app).is_empty());
}

#[test]
fn queue_release_submits_one_job_per_study() {
    let areas = common::Areas::new();
    add_study(&areas.staging, "GCST000001", "GWAS-SSF v1.0");
    add_study(&areas.staging, "GCST000002", "GWAS-SSF v1.0");
    let config = config_for(&areas);
    {
        let mut store = QueueStore::open(&config.queue_db).unwrap();
        store
            .upsert_many(&[
                QueueRecord::queued(acc("GCST000001"), HarmonisationType::V1),
                QueueRecord::queued(acc("GCST000002"), HarmonisationType::V1),
            ])
            .unwrap();
    }
    let app = App::new(
        config,
        MockCatalog::default(),
        LocalTransfer::default(),
        RecordingNotifier::default(),
    );
    let scheduler = DoneScheduler::default();
    let result = app
        .queue_release(
            &QueueFilter::pending(),
            None,
            Some((
                &scheduler,
                SubmitOptions {
                    command: "harmonise --study {study}".to_string(),
                    wait: Some(PollPolicy {
                        interval: Duration::from_millis(1),
                        max_interval: Duration::from_millis(1),
                        ..PollPolicy::default()
                    }),
                    max_resubmissions: 1,
                },
            )),
            &TracingSink,
        )
        .unwrap();

    assert_eq!(result.queue.released.len(), 2);
    assert_eq!(result.jobs.len(), 2);
    assert_eq!(result.poll, Some(PollOutcome::Finished { attempts: 1 }));
    let submitted = scheduler.submitted.lock().unwrap();
    assert_eq!(submitted[0].command, "harmonise --study GCST000001");
    assert_eq!(submitted[1].name, "harm_GCST000002");
    assert!(areas.harmonisation.join("GCST000001").join("GCST000001.tsv.gz").exists());
}

#[test]
fn locate_reports_canonical_and_actual_paths() {
    let areas = common::Areas::new();
    let dir = add_study(&areas.ftp, "GCST000042", "GWAS-SSF v1.0");
    let app = App::new(
        config_for(&areas),
        MockCatalog::default(),
        LocalTransfer::default(),
        RecordingNotifier::default(),
    );
    let found = app.locate(&acc("GCST000042"), Area::Ftp).unwrap();
    assert_eq!(found.bin, "GCST000001-GCST001000");
    assert_eq!(found.found_at, Some(dir));

    let staging = app.locate(&acc("GCST000042"), Area::Staging).unwrap();
    assert!(staging.found_at.is_none());
}

#[test]
fn deposit_requires_a_source_directory() {
    let areas = common::Areas::new();
    let app = App::new(
        config_for(&areas),
        MockCatalog::default(),
        LocalTransfer::default(),
        RecordingNotifier::default(),
    );
    assert_matches!(
        app.deposit(true, &TracingSink),
        Err(SyncError::MissingSetting("deposition_dir"))
    );
}

fn app_notifications(
    app: &App<MockCatalog, LocalTransfer, RecordingNotifier>,
) -> Vec<Message> {
    app.notifier().sent.lock().unwrap().clone()
}

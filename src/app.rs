use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::CatalogClient;
use crate::config::ResolvedConfig;
use crate::deposit::{DepositReport, DepositionSync};
use crate::domain::StudyAccession;
use crate::error::SyncError;
use crate::marker::MarkerFile;
use crate::notify::{Message, Notifier, send_best_effort};
use crate::queue_store::{QueueFilter, QueueStore};
use crate::queuer::{HarmonisationQueuer, QueueFailure, QueueReport};
use crate::reconcile::{ReleaseOptions, Reconciler};
use crate::report::{REPORT_SUBJECT, ReleaseReport};
use crate::scheduler::{JobScheduler, JobSpec, JobTracker, PollOutcome, PollPolicy, TrackedJob};
use crate::study_index::StudyIndex;
use crate::transfer::Transfer;

/// Placeholder replaced by the accession in `--submit` commands.
pub const STUDY_PLACEHOLDER: &str = "{study}";

#[derive(Debug, Clone, Default)]
pub struct ReleaseRunOptions {
    pub dry_run: bool,
    pub no_email: bool,
    /// Treat every staging file as modified.
    pub full: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Area {
    Staging,
    Ftp,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocateResult {
    pub study: StudyAccession,
    pub area: Area,
    pub bin: String,
    pub canonical_path: Utf8PathBuf,
    pub found_at: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Command line; `{study}` is replaced by the accession, otherwise the
    /// accession is appended.
    pub command: String,
    pub wait: Option<PollPolicy>,
    pub max_resubmissions: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueReleaseResult {
    pub queue: QueueReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<TrackedJob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll: Option<PollOutcome>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Logs progress through `tracing`.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::info!("{}", event.message),
        }
    }
}

/// Catalog stand-in for commands that never consult it.
pub struct NoCatalog;

impl CatalogClient for NoCatalog {
    fn list_published_accessions(&self) -> Result<Vec<String>, SyncError> {
        Err(SyncError::MissingSetting("catalog_api_url"))
    }

    fn list_embargoed_releasable_accessions(&self) -> Result<Vec<String>, SyncError> {
        Err(SyncError::MissingSetting("catalog_api_url"))
    }
}

pub struct App<C: CatalogClient, T: Transfer, N: Notifier> {
    config: ResolvedConfig,
    catalog: C,
    transfer: T,
    notifier: N,
}

impl<C: CatalogClient, T: Transfer, N: Notifier> App<C, T, N> {
    pub fn new(config: ResolvedConfig, catalog: C, transfer: T, notifier: N) -> Self {
        Self {
            config,
            catalog,
            transfer,
            notifier,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// One reconciliation run. The marker advances only after a clean,
    /// non dry-run pass; the report is mailed whatever the outcome.
    pub fn release(
        &self,
        options: &ReleaseRunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ReleaseReport, SyncError> {
        let started = Instant::now();
        let marker = MarkerFile::new(self.config.release_marker.clone());
        let modified_since = if options.full {
            Some(DateTime::<Utc>::UNIX_EPOCH)
        } else {
            marker.load()?.map(|marker| marker.last_release)
        };
        sink.event(ProgressEvent {
            message: format!(
                "phase=Reconcile; modified_since={}",
                modified_since
                    .map(|ts| ts.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            ),
            elapsed: None,
        });

        let reconciler = Reconciler::new(&self.catalog, &self.transfer, self.config.layout());
        let report = reconciler.run(&ReleaseOptions {
            dry_run: options.dry_run,
            modified_since,
        })?;

        if !options.dry_run {
            if report.has_failures() {
                tracing::warn!(
                    failures = report.failures.len(),
                    "release marker kept; failed studies are retried next run"
                );
            } else {
                marker.advance(report.started_at)?;
            }
        }

        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; actions={} failures={}",
                report.action_count(),
                report.failures.len()
            ),
            elapsed: Some(started.elapsed()),
        });

        if !options.no_email {
            if let Some(recipient) = &self.config.email_recipient {
                let subject = if options.dry_run {
                    format!("[dry run] {REPORT_SUBJECT}")
                } else {
                    REPORT_SUBJECT.to_string()
                };
                send_best_effort(
                    &self.notifier,
                    &Message {
                        recipient: recipient.clone(),
                        subject,
                        body: report.render_text(),
                    },
                );
            }
        }
        Ok(report)
    }

    pub fn deposit(&self, dry_run: bool, sink: &dyn ProgressSink) -> Result<DepositReport, SyncError> {
        let source = self.config.deposition_dir()?;
        sink.event(ProgressEvent {
            message: format!("phase=Deposit; source={source}"),
            elapsed: None,
        });
        DepositionSync::new(
            source.clone(),
            self.config.layout(),
            &self.transfer,
            self.config.deposition_min_age,
        )?
        .run(dry_run)
    }

    pub fn queuer(&self) -> Result<HarmonisationQueuer<&T>, SyncError> {
        let store = QueueStore::open(&self.config.queue_db)?;
        Ok(HarmonisationQueuer::new(
            store,
            self.config.layout(),
            &self.transfer,
        ))
    }

    /// Releases queued studies and optionally submits one job per study.
    pub fn queue_release<S: JobScheduler>(
        &self,
        filter: &QueueFilter,
        limit: Option<usize>,
        submit: Option<(S, SubmitOptions)>,
        sink: &dyn ProgressSink,
    ) -> Result<QueueReleaseResult, SyncError> {
        let mut queuer = self.queuer()?;
        sink.event(ProgressEvent {
            message: "phase=Release; copying studies to the harmonisation area".to_string(),
            elapsed: None,
        });
        let mut queue = queuer.release(filter, limit)?;

        let Some((scheduler, options)) = submit else {
            return Ok(QueueReleaseResult {
                queue,
                jobs: Vec::new(),
                poll: None,
            });
        };

        let mut tracker = JobTracker::new(scheduler, options.max_resubmissions);
        for study in queue.released.clone() {
            let spec = JobSpec {
                name: format!("harm_{study}"),
                command: job_command(&options.command, &study),
                working_dir: self.config.layout().harmonisation_study_dir(&study).ok(),
            };
            if let Err(err) = tracker.submit(spec) {
                tracing::error!(%study, error = %err, "job submission failed");
                queue.failures.push(QueueFailure {
                    study: study.clone(),
                    message: err.to_string(),
                });
            }
        }

        let poll = match &options.wait {
            Some(policy) if !tracker.jobs().is_empty() => {
                sink.event(ProgressEvent {
                    message: format!("phase=Wait; jobs={}", tracker.jobs().len()),
                    elapsed: None,
                });
                Some(tracker.wait(policy)?)
            }
            _ => None,
        };

        Ok(QueueReleaseResult {
            queue,
            jobs: tracker.jobs().to_vec(),
            poll,
        })
    }

    pub fn locate(&self, study: &StudyAccession, area: Area) -> Result<LocateResult, SyncError> {
        let root = match area {
            Area::Staging => self.config.staging_dir.clone(),
            Area::Ftp => self.config.ftp_dir.clone(),
        };
        let index = StudyIndex::new(root);
        Ok(LocateResult {
            study: study.clone(),
            area,
            bin: study.range_bin().name(),
            canonical_path: index.canonical_path(study),
            found_at: index.locate(study)?,
        })
    }
}

pub fn job_command(template: &str, study: &StudyAccession) -> String {
    if template.contains(STUDY_PLACEHOLDER) {
        template.replace(STUDY_PLACEHOLDER, study.as_str())
    } else {
        format!("{template} {study}")
    }
}

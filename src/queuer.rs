//! Keeps the harmonisation queue in step with the mirror and hands queued
//! studies to the harmonisation working area.
//!
//! Per-study state moves QUEUED -> IN_PROGRESS on a confirmed copy and
//! IN_PROGRESS -> HARMONISED once a `harmonised` marker shows up on the
//! mirror. `requeue` is the manual way back from IN_PROGRESS to QUEUED.

use chrono::Utc;
use serde::Serialize;

use crate::domain::{HarmonisationType, Priority, QueueRecord, StudyAccession};
use crate::error::SyncError;
use crate::layout::{Layout, ensure_dir};
use crate::metadata::detect_harmonisation_type;
use crate::queue_store::{QueueFilter, QueueStore, QueueSummary, SelectOrder};
use crate::study_index::StudyIndex;
use crate::transfer::{Transfer, TransferRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueFailure {
    pub study: StudyAccession,
    pub message: String,
}

/// Outcome of one queue operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueReport {
    /// Studies examined.
    pub scanned: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub upserted: Vec<StudyAccession>,
    /// Studies whose harmonised marker was observed by this operation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub harmonised: Vec<StudyAccession>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub released: Vec<StudyAccession>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requeued: Vec<StudyAccession>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<QueueFailure>,
}

impl QueueReport {
    fn fail(&mut self, study: &StudyAccession, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%study, %message, "queue operation failed for study");
        self.failures.push(QueueFailure {
            study: study.clone(),
            message,
        });
    }
}

/// Manual override applied by [`HarmonisationQueuer::add`].
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub priority: Option<Priority>,
    /// Overrides the type read from the study's metadata.
    pub harmonisation_type: Option<HarmonisationType>,
    pub harmonised: Option<bool>,
}

pub struct HarmonisationQueuer<T: Transfer> {
    store: QueueStore,
    layout: Layout,
    transfer: T,
}

impl<T: Transfer> HarmonisationQueuer<T> {
    pub fn new(store: QueueStore, layout: Layout, transfer: T) -> Self {
        Self {
            store,
            layout,
            transfer,
        }
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    /// Re-derives a record for every mirrored study and resets `last_run`.
    pub fn rebuild(&mut self) -> Result<QueueReport, SyncError> {
        let started_at = Utc::now();
        let scan = StudyIndex::new(self.layout.mirror_root()).scan()?;
        let mut report = QueueReport {
            scanned: scan.entries.len(),
            ..QueueReport::default()
        };

        let mut records = Vec::with_capacity(scan.entries.len());
        for entry in scan.entries.values() {
            let previous = self.store.get(&entry.accession)?;
            let harmonised =
                entry.harmonised || previous.as_ref().is_some_and(|record| record.is_harmonised);
            let record = if harmonised {
                let kind = previous
                    .as_ref()
                    .map(|record| record.harmonisation_type)
                    .unwrap_or_else(|| detect_harmonisation_type(&entry.path));
                QueueRecord::harmonised(entry.accession.clone(), kind)
            } else {
                let mut record =
                    QueueRecord::queued(entry.accession.clone(), detect_harmonisation_type(&entry.path));
                if let Some(previous) = &previous {
                    record.in_progress = previous.in_progress;
                    record.priority = previous.priority;
                }
                record
            };
            if entry.harmonised {
                report.harmonised.push(entry.accession.clone());
            }
            report.upserted.push(entry.accession.clone());
            records.push(record);
        }
        self.store.upsert_many(&records)?;
        self.store.record_run(started_at)?;
        tracing::info!(
            studies = report.scanned,
            harmonised = report.harmonised.len(),
            "queue rebuilt from mirror"
        );
        Ok(report)
    }

    /// Picks up studies that changed on the mirror since the last run and
    /// marks newly harmonised ones. Without a previous run this is a rebuild.
    pub fn refresh(&mut self) -> Result<QueueReport, SyncError> {
        let Some(since) = self.store.last_run()? else {
            tracing::info!("no previous queue run recorded, rebuilding");
            return self.rebuild();
        };
        let started_at = Utc::now();
        let outcome = self.refresh_since(since);
        // Recorded even when the refresh itself failed.
        self.store.record_run(started_at)?;
        outcome
    }

    fn refresh_since(&mut self, since: chrono::DateTime<Utc>) -> Result<QueueReport, SyncError> {
        let index = StudyIndex::new(self.layout.mirror_root());
        let scan = index.scan()?;
        let modified = index.studies_modified_since(since);
        let mut report = QueueReport {
            scanned: modified.len(),
            ..QueueReport::default()
        };

        for accession in &modified {
            let Some(entry) = scan.get(accession) else {
                report.fail(accession, "modified study no longer on the mirror");
                continue;
            };
            let detected = detect_harmonisation_type(&entry.path);
            let record = match self.store.get(accession)? {
                Some(existing) if existing.is_harmonised => continue,
                Some(existing) if existing.harmonisation_type == detected => continue,
                Some(existing) => QueueRecord {
                    harmonisation_type: detected,
                    ..existing
                },
                None => QueueRecord::queued(accession.clone(), detected),
            };
            self.store.upsert(&record)?;
            report.upserted.push(accession.clone());
        }

        for accession in scan.harmonised() {
            match self.store.get(&accession)? {
                Some(existing) if existing.is_harmonised => {}
                Some(_) => {
                    self.store.set_harmonised(&accession, true)?;
                    self.store.set_in_progress(&accession, false)?;
                    report.harmonised.push(accession);
                }
                None => {
                    let path = &scan.entries[&accession].path;
                    self.store.upsert(&QueueRecord::harmonised(
                        accession.clone(),
                        detect_harmonisation_type(path),
                    ))?;
                    report.harmonised.push(accession);
                }
            }
        }

        tracing::info!(
            %since,
            modified = report.upserted.len(),
            harmonised = report.harmonised.len(),
            "queue refreshed"
        );
        Ok(report)
    }

    /// Copies up to `limit` matching studies from staging into the
    /// harmonisation area, highest priority first.
    pub fn release(
        &mut self,
        filter: &QueueFilter,
        limit: Option<usize>,
    ) -> Result<QueueReport, SyncError> {
        let harmonisation_root = self.layout.harmonisation_root()?.to_owned();
        let filter = QueueFilter {
            limit: limit.or(filter.limit),
            order: SelectOrder::Priority,
            ..filter.clone()
        };
        let candidates = self.store.select_by(&filter)?;
        let staging = StudyIndex::new(self.layout.staging_root());
        let mut report = QueueReport {
            scanned: candidates.len(),
            ..QueueReport::default()
        };

        for record in candidates {
            let study = &record.study_id;
            if !record.harmonisation_type.is_harmonisable() {
                tracing::debug!(%study, "not to be harmonised, skipping");
                continue;
            }
            let source = match staging.locate(study) {
                Ok(Some(path)) => path,
                Ok(None) => {
                    report.fail(study, "study is not in the staging area");
                    continue;
                }
                Err(err) => {
                    report.fail(study, err.to_string());
                    continue;
                }
            };
            let destination = harmonisation_root.join(study.as_str());
            let copied = ensure_dir(&destination).and_then(|()| {
                self.transfer
                    .transfer(&TransferRequest::harmonisation(&source, &destination, study))
            });
            match copied {
                Ok(()) => {
                    self.store.set_in_progress(study, true)?;
                    tracing::info!(%study, priority = %record.priority, kind = %record.harmonisation_type, "released for harmonisation");
                    report.released.push(study.clone());
                }
                Err(err) => report.fail(study, err.to_string()),
            }
        }
        Ok(report)
    }

    /// Manual upsert. Existing flags survive unless overridden.
    pub fn add(
        &mut self,
        studies: &[StudyAccession],
        options: &AddOptions,
    ) -> Result<QueueReport, SyncError> {
        let mut report = QueueReport {
            scanned: studies.len(),
            ..QueueReport::default()
        };
        let mirror = StudyIndex::new(self.layout.mirror_root());
        let staging = StudyIndex::new(self.layout.staging_root());
        for study in studies {
            let existing = self.store.get(study)?;
            let harmonisation_type = match (options.harmonisation_type, &existing) {
                (Some(kind), _) => kind,
                (None, Some(record)) => record.harmonisation_type,
                (None, None) => match self.find_study_dir(&mirror, &staging, study) {
                    Some(dir) => detect_harmonisation_type(&dir),
                    None => {
                        report.fail(study, "study not found; pass a harmonisation type");
                        continue;
                    }
                },
            };
            let record = QueueRecord {
                study_id: study.clone(),
                harmonisation_type,
                is_harmonised: options
                    .harmonised
                    .or(existing.as_ref().map(|record| record.is_harmonised))
                    .unwrap_or(false),
                in_progress: existing
                    .as_ref()
                    .map(|record| record.in_progress)
                    .unwrap_or(false),
                priority: options
                    .priority
                    .or(existing.as_ref().map(|record| record.priority))
                    .unwrap_or_default(),
            };
            self.store.upsert(&record)?;
            report.upserted.push(study.clone());
        }
        Ok(report)
    }

    fn find_study_dir(
        &self,
        mirror: &StudyIndex,
        staging: &StudyIndex,
        study: &StudyAccession,
    ) -> Option<camino::Utf8PathBuf> {
        [mirror, staging]
            .into_iter()
            .find_map(|index| index.locate(study).ok().flatten())
    }

    /// Puts in-progress studies back in the queue.
    pub fn requeue(&mut self, studies: &[StudyAccession]) -> Result<QueueReport, SyncError> {
        let mut report = QueueReport {
            scanned: studies.len(),
            ..QueueReport::default()
        };
        for study in studies {
            match self.store.get(study)? {
                None => report.fail(study, "study is not in the queue"),
                Some(record) if record.is_harmonised => {
                    report.fail(study, "study is already harmonised")
                }
                Some(record) if !record.in_progress => {
                    tracing::debug!(%study, "already queued");
                }
                Some(_) => {
                    self.store.set_in_progress(study, false)?;
                    report.requeued.push(study.clone());
                }
            }
        }
        Ok(report)
    }

    pub fn list(&self, filter: &QueueFilter) -> Result<Vec<QueueRecord>, SyncError> {
        self.store.select_by(filter)
    }

    pub fn summary(&self) -> Result<QueueSummary, SyncError> {
        self.store.summary()
    }
}

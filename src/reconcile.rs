//! Three-way reconciliation of the catalog, the staging area and the public
//! FTP mirror.
//!
//! A run first reads everything (catalog listing, both trees, the recently
//! modified staging studies), classifies, and only then touches the
//! filesystem. Per-study failures are collected into the report; only an
//! unreachable catalog or unreadable tree aborts the run, before any change.

use std::collections::BTreeSet;
use std::fs;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::CatalogClient;
use crate::checksum::write_manifest;
use crate::domain::StudyAccession;
use crate::error::SyncError;
use crate::layout::{Layout, ensure_dir, move_dir};
use crate::report::{ActionFailure, ReleaseAction, ReleaseReport};
use crate::study_index::{StudyIndex, StudyScan};
use crate::transfer::{Transfer, TransferRequest};

pub type AccessionSet = BTreeSet<StudyAccession>;

/// Pairwise-disjoint buckets of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub to_release: AccessionSet,
    pub to_remove: AccessionSet,
    pub missing_from_staging: AccessionSet,
    pub unexpected_on_staging: AccessionSet,
    /// Withheld mirror copies the catalog still does not authorise and
    /// staging still holds.
    pub held_back: AccessionSet,
}

/// The views a run compares.
#[derive(Debug, Clone, Default)]
pub struct Views {
    pub catalog: AccessionSet,
    pub staging: AccessionSet,
    /// Mirror studies readable by the public.
    pub mirror_visible: AccessionSet,
    /// Mirror studies soft-removed by an earlier run.
    pub mirror_withdrawn: AccessionSet,
    pub recently_modified: AccessionSet,
}

pub fn classify(views: &Views) -> Classification {
    let releasable: AccessionSet = views
        .catalog
        .intersection(&views.staging)
        .cloned()
        .collect();
    let mirror_all: AccessionSet = views
        .mirror_visible
        .union(&views.mirror_withdrawn)
        .cloned()
        .collect();

    let mut to_release: AccessionSet = releasable
        .difference(&views.mirror_visible)
        .cloned()
        .collect();
    to_release.extend(releasable.intersection(&views.recently_modified).cloned());

    // A withdrawn copy without a staging copy is the last one left.
    let orphaned_withdrawn = views
        .mirror_withdrawn
        .difference(&views.catalog)
        .filter(|acc| !views.staging.contains(*acc));
    let mut to_remove: AccessionSet = views
        .mirror_visible
        .difference(&views.catalog)
        .cloned()
        .collect();
    to_remove.extend(orphaned_withdrawn.cloned());

    Classification {
        to_release,
        to_remove,
        missing_from_staging: views.catalog.difference(&views.staging).cloned().collect(),
        unexpected_on_staging: views
            .staging
            .difference(&views.catalog)
            .filter(|acc| !mirror_all.contains(*acc))
            .cloned()
            .collect(),
        held_back: views
            .mirror_withdrawn
            .intersection(&views.staging)
            .filter(|acc| !views.catalog.contains(*acc))
            .cloned()
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    Release,
    /// Revoke public read access, keep the files.
    Withdraw,
    /// Mirror holds the only copy; move it back to staging.
    RestoreToStaging,
}

pub fn plan_actions(
    classification: &Classification,
    staging: &AccessionSet,
) -> Vec<(StudyAccession, PlannedAction)> {
    let mut plan = classification
        .to_release
        .iter()
        .map(|acc| (acc.clone(), PlannedAction::Release))
        .collect::<Vec<_>>();
    for acc in &classification.to_remove {
        let action = if staging.contains(acc) {
            PlannedAction::Withdraw
        } else {
            PlannedAction::RestoreToStaging
        };
        plan.push((acc.clone(), action));
    }
    plan
}

#[derive(Debug, Clone, Default)]
pub struct ReleaseOptions {
    pub dry_run: bool,
    /// Re-release studies whose staging files changed after this instant.
    pub modified_since: Option<DateTime<Utc>>,
}

pub struct Reconciler<C: CatalogClient, T: Transfer> {
    catalog: C,
    transfer: T,
    layout: Layout,
}

impl<C: CatalogClient, T: Transfer> Reconciler<C, T> {
    pub fn new(catalog: C, transfer: T, layout: Layout) -> Self {
        Self {
            catalog,
            transfer,
            layout,
        }
    }

    pub fn run(&self, options: &ReleaseOptions) -> Result<ReleaseReport, SyncError> {
        let started_at = Utc::now();
        let mut malformed = Vec::new();

        let mut raw_catalog = self.catalog.list_published_accessions()?;
        raw_catalog.extend(self.catalog.list_embargoed_releasable_accessions()?);
        let mut catalog = AccessionSet::new();
        for raw in raw_catalog {
            match raw.parse::<StudyAccession>() {
                Ok(acc) => {
                    catalog.insert(acc);
                }
                Err(_) => malformed.push(format!("catalog: {raw}")),
            }
        }

        let staging_index = StudyIndex::new(self.layout.staging_root());
        let mirror_index = StudyIndex::new(self.layout.mirror_root());
        let staging = staging_index.scan()?;
        let mirror = mirror_index.scan()?;
        malformed.extend(staging.rejected.iter().map(|name| format!("staging: {name}")));
        malformed.extend(mirror.rejected.iter().map(|name| format!("ftp: {name}")));

        let recently_modified = options
            .modified_since
            .map(|since| staging_index.studies_modified_since(since))
            .unwrap_or_default();

        let views = Views {
            catalog,
            staging: staging.accessions(),
            mirror_visible: mirror.visible(),
            mirror_withdrawn: mirror.withdrawn(),
            recently_modified,
        };
        let classification = classify(&views);
        tracing::info!(
            catalog = views.catalog.len(),
            staging = views.staging.len(),
            mirror = views.mirror_visible.len() + views.mirror_withdrawn.len(),
            to_release = classification.to_release.len(),
            to_remove = classification.to_remove.len(),
            missing = classification.missing_from_staging.len(),
            unexpected = classification.unexpected_on_staging.len(),
            "classified studies"
        );

        let mut report = ReleaseReport {
            started_at,
            dry_run: options.dry_run,
            staging_dir: self.layout.staging_root().to_string(),
            ftp_dir: self.layout.mirror_root().to_string(),
            catalog_total: views.catalog.len(),
            released: Vec::new(),
            withdrawn: Vec::new(),
            restored_to_staging: Vec::new(),
            missing_from_staging: names(&classification.missing_from_staging),
            unexpected_on_staging: names(&classification.unexpected_on_staging),
            held_back: names(&classification.held_back),
            malformed,
            failures: Vec::new(),
        };

        for (acc, action) in plan_actions(&classification, &views.staging) {
            let outcome = if options.dry_run {
                Ok(())
            } else {
                match action {
                    PlannedAction::Release => self.release(&acc, &staging, &mirror),
                    PlannedAction::Withdraw => self.withdraw(&acc, &mirror),
                    PlannedAction::RestoreToStaging => self.restore(&acc, &mirror),
                }
            };
            let (bucket, kind) = match action {
                PlannedAction::Release => (&mut report.released, ReleaseAction::Release),
                PlannedAction::Withdraw => (&mut report.withdrawn, ReleaseAction::Withdraw),
                PlannedAction::RestoreToStaging => (
                    &mut report.restored_to_staging,
                    ReleaseAction::RestoreToStaging,
                ),
            };
            match outcome {
                Ok(()) => bucket.push(acc.to_string()),
                Err(err) => {
                    tracing::error!(study = %acc, action = kind.as_str(), error = %err, "action failed");
                    report.failures.push(ActionFailure {
                        accession: acc.to_string(),
                        action: kind,
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    fn release(
        &self,
        acc: &StudyAccession,
        staging: &StudyScan,
        mirror: &StudyScan,
    ) -> Result<(), SyncError> {
        let source = staging
            .get(acc)
            .map(|entry| entry.path.clone())
            .ok_or_else(|| SyncError::Filesystem(format!("{acc} vanished from staging")))?;
        write_manifest(&source)?;
        let destination = self.layout.mirror_study_dir(acc);
        if let Some(bin) = destination.parent() {
            ensure_dir(bin)?;
        }
        tracing::info!(study = %acc, from = %source, to = %destination, "releasing");
        self.transfer
            .transfer(&TransferRequest::mirror_release(&source, &destination))?;
        if let Some(entry) = mirror.get(acc) {
            if entry.withdrawn {
                set_public_access(&entry.path, true)?;
            }
        }
        Ok(())
    }

    fn withdraw(&self, acc: &StudyAccession, mirror: &StudyScan) -> Result<(), SyncError> {
        let entry = mirror
            .get(acc)
            .ok_or_else(|| SyncError::Filesystem(format!("{acc} vanished from the ftp area")))?;
        tracing::info!(study = %acc, path = %entry.path, "withdrawing from public access");
        set_public_access(&entry.path, false)
    }

    fn restore(&self, acc: &StudyAccession, mirror: &StudyScan) -> Result<(), SyncError> {
        let entry = mirror
            .get(acc)
            .ok_or_else(|| SyncError::Filesystem(format!("{acc} vanished from the ftp area")))?;
        let destination = self.layout.staging_study_dir(acc);
        tracing::warn!(study = %acc, from = %entry.path, to = %destination, "moving only copy back to staging");
        move_dir(&entry.path, &destination)?;
        if entry.withdrawn {
            set_public_access(&destination, true)?;
        }
        Ok(())
    }
}

fn names(set: &AccessionSet) -> Vec<String> {
    set.iter().map(|acc| acc.to_string()).collect()
}

/// Grants or revokes read/execute for "other" on a study directory.
#[cfg(unix)]
pub fn set_public_access(path: &Utf8Path, public: bool) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("stat {path}: {err}")))?
        .permissions();
    let mode = permissions.mode();
    let mode = if public { mode | 0o005 } else { mode & !0o007 };
    permissions.set_mode(mode);
    fs::set_permissions(path.as_std_path(), permissions)
        .map_err(|err| SyncError::Filesystem(format!("chmod {path}: {err}")))
}

#[cfg(not(unix))]
pub fn set_public_access(path: &Utf8Path, _public: bool) -> Result<(), SyncError> {
    Err(SyncError::Filesystem(format!(
        "cannot change public access of {path} on this platform"
    )))
}

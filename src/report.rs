use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const REPORT_SUBJECT: &str = "Summary Stats release report";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseAction {
    Release,
    Withdraw,
    RestoreToStaging,
}

impl ReleaseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseAction::Release => "release",
            ReleaseAction::Withdraw => "withdraw",
            ReleaseAction::RestoreToStaging => "restore-to-staging",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionFailure {
    pub accession: String,
    pub action: ReleaseAction,
    pub message: String,
}

/// Everything a release run decided and did.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseReport {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub staging_dir: String,
    pub ftp_dir: String,
    pub catalog_total: usize,
    pub released: Vec<String>,
    pub withdrawn: Vec<String>,
    pub restored_to_staging: Vec<String>,
    pub missing_from_staging: Vec<String>,
    pub unexpected_on_staging: Vec<String>,
    /// Mirror copies already withheld from earlier runs.
    pub held_back: Vec<String>,
    /// Entries that are not valid accessions, with their origin.
    pub malformed: Vec<String>,
    pub failures: Vec<ActionFailure>,
}

impl ReleaseReport {
    pub fn action_count(&self) -> usize {
        self.released.len() + self.withdrawn.len() + self.restored_to_staging.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn render_text(&self) -> String {
        let verb = if self.dry_run { "would be" } else { "were" };
        let mut out = String::new();
        let _ = writeln!(out, "This is a report on summary statistics data release\n");
        let _ = writeln!(out, "[Info] Date of run: {}", self.started_at.format("%d %b %Y %H:%M UTC"));
        if self.dry_run {
            let _ = writeln!(out, "[Info] Dry run: no files were changed");
        }
        let _ = writeln!(out, "[Info] Staging area: {}", self.staging_dir);
        let _ = writeln!(out, "[Info] Ftp area: {}", self.ftp_dir);
        let _ = writeln!(
            out,
            "[Info] Catalog lists {} studies eligible for release",
            self.catalog_total
        );

        section(
            &mut out,
            &format!("Summary statistics of {} studies {verb} released", self.released.len()),
            &self.released,
        );
        section(
            &mut out,
            &format!("{} studies {verb} withdrawn from the ftp area", self.withdrawn.len()),
            &self.withdrawn,
        );
        section(
            &mut out,
            &format!(
                "{} studies {verb} moved back from the ftp area to staging",
                self.restored_to_staging.len()
            ),
            &self.restored_to_staging,
        );
        section(
            &mut out,
            &format!(
                "{} studies are missing from the staging area",
                self.missing_from_staging.len()
            ),
            &self.missing_from_staging,
        );
        section(
            &mut out,
            &format!(
                "{} folders in the staging area are unexpected",
                self.unexpected_on_staging.len()
            ),
            &self.unexpected_on_staging,
        );
        section(
            &mut out,
            &format!("{} studies remain withheld on the ftp area", self.held_back.len()),
            &self.held_back,
        );
        section(
            &mut out,
            &format!("{} entries are not valid accessions", self.malformed.len()),
            &self.malformed,
        );

        let _ = writeln!(out, "\n[Info] {} actions failed:", self.failures.len());
        for failure in &self.failures {
            let _ = writeln!(
                out,
                "\t{} ({}): {}",
                failure.accession,
                failure.action.as_str(),
                failure.message
            );
        }
        out
    }
}

fn section(out: &mut String, title: &str, items: &[String]) {
    let _ = writeln!(out, "\n[Info] {title}:");
    for item in items {
        let _ = writeln!(out, "\t{item}");
    }
}

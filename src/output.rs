use std::io::{self, Write};

use serde::Serialize;

use crate::app::{LocateResult, ProgressEvent, ProgressSink, QueueReleaseResult};
use crate::deposit::DepositReport;
use crate::domain::QueueRecord;
use crate::queue_store::QueueSummary;
use crate::queuer::QueueReport;
use crate::report::ReleaseReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_release(report: &ReleaseReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_deposit(report: &DepositReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_queue(report: &QueueReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_queue_release(result: &QueueReleaseResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_records(records: &[QueueRecord]) -> io::Result<()> {
        Self::print_json(&records)
    }

    pub fn print_summary(summary: &QueueSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_locate(result: &LocateResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Keeps stdout clean for JSON consumers.
impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// One line per queue operation outcome.
pub fn queue_report_line(report: &QueueReport) -> String {
    format!(
        "scanned={} upserted={} harmonised={} released={} requeued={} failed={}",
        report.scanned,
        report.upserted.len(),
        report.harmonised.len(),
        report.released.len(),
        report.requeued.len(),
        report.failures.len()
    )
}

pub fn record_line(record: &QueueRecord) -> String {
    format!(
        "{}\t{}\tpriority={}\t{:?}",
        record.study_id,
        record.harmonisation_type,
        record.priority,
        record.state()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HarmonisationType;

    #[test]
    fn record_line_is_tab_separated() {
        let record = QueueRecord::queued("GCST000007".parse().unwrap(), HarmonisationType::V1);
        assert_eq!(record_line(&record), "GCST000007\tv1\tpriority=medium\tQueued");
    }
}

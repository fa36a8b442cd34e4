use std::str::FromStr;

use assert_matches::assert_matches;

use sumstats_sync::binning::{RangeBin, range_bin};
use sumstats_sync::domain::{HarmonisationType, Priority, QueueRecord, QueueState, StudyAccession};
use sumstats_sync::error::SyncError;

#[test]
fn accession_parsing_normalises() {
    let acc = StudyAccession::from_str(" gcst000123 ").unwrap();
    assert_eq!(acc.as_str(), "GCST000123");
    assert_eq!(acc.number(), 123);

    for bad in ["", "GCST", "GCST12a", "ABC000123", "GCST000000", "GCST99999999999999999999999"] {
        assert_matches!(StudyAccession::from_str(bad), Err(SyncError::MalformedAccession(_)), "{bad}");
    }
}

#[test]
fn accessions_order_by_number() {
    let mut ids: Vec<StudyAccession> = ["GCST90000001", "GCST000010", "GCST000002"]
        .iter()
        .map(|id| id.parse().unwrap())
        .collect();
    ids.sort();
    let ordered: Vec<&str> = ids.iter().map(StudyAccession::as_str).collect();
    assert_eq!(ordered, vec!["GCST000002", "GCST000010", "GCST90000001"]);
}

#[test]
fn range_bins_are_total_and_consistent() {
    for n in [1u64, 2, 999, 1000, 1001, 1999, 2000, 2001, 123_456, 90_000_999] {
        let acc: StudyAccession = format!("GCST{n:06}").parse().unwrap();
        let bin = acc.range_bin();
        assert!(bin.contains(&acc));
        assert_eq!((bin.floor() - 1) % 1000, 0);
        assert_eq!(bin.upper(), bin.floor() + 999);
        assert_eq!(bin.name().parse::<RangeBin>().unwrap(), bin);
        assert_eq!(range_bin(acc.as_str()).unwrap(), bin.name());
    }
    let a: StudyAccession = "GCST000001".parse().unwrap();
    let b: StudyAccession = "GCST001000".parse().unwrap();
    assert_eq!(a.range_bin().floor(), b.range_bin().floor());
}

#[test]
fn harmonisation_type_names() {
    assert_eq!(HarmonisationType::from_str("not_harm").unwrap(), HarmonisationType::NotToHarmonise);
    assert_eq!(HarmonisationType::V0.to_string(), "v0");
    assert!(HarmonisationType::from_str("v2").is_err());
    assert_eq!(
        serde_json::to_string(&HarmonisationType::NotToHarmonise).unwrap(),
        "\"not_to_harmonise\""
    );
}

#[test]
fn priority_ranks() {
    assert!(Priority::High < Priority::Low);
    assert_eq!(Priority::from_rank(3).unwrap(), Priority::Low);
    assert_matches!(Priority::from_rank(0), Err(SyncError::InvalidPriority(_)));
}

#[test]
fn record_states() {
    let id: StudyAccession = "GCST000001".parse().unwrap();
    let mut record = QueueRecord::queued(id.clone(), HarmonisationType::V1);
    assert_eq!(record.state(), QueueState::Queued);
    record.in_progress = true;
    assert_eq!(record.state(), QueueState::InProgress);
    assert_eq!(
        QueueRecord::harmonised(id.clone(), HarmonisationType::V1).state(),
        QueueState::Harmonised
    );
    assert_eq!(
        QueueRecord::queued(id, HarmonisationType::NotToHarmonise).state(),
        QueueState::Skipped
    );
}

//! Range sharding of study directories.
//!
//! Studies live under `<area>/<bin>/<accession>/` where every bin holds
//! [`BIN_SIZE`] consecutive accession numbers. Staging, the FTP mirror and the
//! harmonisation tooling all derive bin names from here so the trees agree.

use std::fmt;
use std::str::FromStr;

use crate::domain::{ACCESSION_PREFIX, StudyAccession};
use crate::error::SyncError;

pub const BIN_SIZE: u64 = 1000;
pub const BIN_PAD_WIDTH: usize = 6;
/// Largest accession number whose bin bounds still fit in a `u64`.
pub const MAX_ACCESSION_NUMBER: u64 = u64::MAX - BIN_SIZE + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeBin {
    floor: u64,
    upper: u64,
}

impl RangeBin {
    /// Bin holding accession number `number`. Accession numbers start at 1.
    pub fn containing(number: u64) -> Self {
        let floor = (number.max(1) - 1) / BIN_SIZE * BIN_SIZE + 1;
        Self {
            floor,
            upper: floor.saturating_add(BIN_SIZE - 1),
        }
    }

    pub fn floor(&self) -> u64 {
        self.floor
    }

    pub fn upper(&self) -> u64 {
        self.upper
    }

    pub fn contains(&self, accession: &StudyAccession) -> bool {
        (self.floor..=self.upper).contains(&accession.number())
    }

    pub fn name(&self) -> String {
        format!(
            "{ACCESSION_PREFIX}{:0width$}-{ACCESSION_PREFIX}{:0width$}",
            self.floor,
            self.upper,
            width = BIN_PAD_WIDTH
        )
    }
}

impl fmt::Display for RangeBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for RangeBin {
    type Err = SyncError;

    /// Parses a bin directory name. Only canonical bins are accepted.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (low, high) = value
            .split_once('-')
            .ok_or_else(|| SyncError::InvalidRangeBin(value.to_string()))?;
        let low: StudyAccession = low
            .parse()
            .map_err(|_| SyncError::InvalidRangeBin(value.to_string()))?;
        let high: StudyAccession = high
            .parse()
            .map_err(|_| SyncError::InvalidRangeBin(value.to_string()))?;
        let bin = low.range_bin();
        if bin.floor != low.number() || bin.upper != high.number() {
            return Err(SyncError::InvalidRangeBin(value.to_string()));
        }
        Ok(bin)
    }
}

/// Loose `GCST*-GCST*` match used when scanning; legacy trees may hold
/// unpadded or misaligned bins whose studies still have to be seen.
pub fn looks_like_bin(name: &str) -> bool {
    match name.split_once('-') {
        Some((low, high)) => {
            low.parse::<StudyAccession>().is_ok() && high.parse::<StudyAccession>().is_ok()
        }
        None => false,
    }
}

/// Bin directory name for an accession string.
pub fn range_bin(accession: &str) -> Result<String, SyncError> {
    let accession: StudyAccession = accession.parse()?;
    Ok(accession.range_bin().name())
}

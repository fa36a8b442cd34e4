use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::binning::{MAX_ACCESSION_NUMBER, RangeBin};
use crate::error::SyncError;

pub const ACCESSION_PREFIX: &str = "GCST";

/// Study accession such as `GCST000123`. Ordered by its numeric part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StudyAccession {
    number: u64,
    id: String,
}

impl StudyAccession {
    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn range_bin(&self) -> RangeBin {
        RangeBin::containing(self.number)
    }
}

impl fmt::Display for StudyAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for StudyAccession {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let digits = normalized
            .strip_prefix(ACCESSION_PREFIX)
            .ok_or_else(|| SyncError::MalformedAccession(value.to_string()))?;
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(SyncError::MalformedAccession(value.to_string()));
        }
        let number = digits
            .parse::<u64>()
            .map_err(|_| SyncError::MalformedAccession(value.to_string()))?;
        if number == 0 || number > MAX_ACCESSION_NUMBER {
            return Err(SyncError::MalformedAccession(value.to_string()));
        }
        Ok(Self {
            number,
            id: normalized,
        })
    }
}

impl TryFrom<String> for StudyAccession {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StudyAccession> for String {
    fn from(value: StudyAccession) -> Self {
        value.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum HarmonisationType {
    #[serde(rename = "v1")]
    #[value(name = "v1")]
    V1,
    #[serde(rename = "v0")]
    #[value(name = "v0")]
    V0,
    #[serde(rename = "not_to_harmonise", alias = "not_harm")]
    #[value(name = "not_to_harmonise", alias = "not_harm")]
    NotToHarmonise,
}

impl HarmonisationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HarmonisationType::V1 => "v1",
            HarmonisationType::V0 => "v0",
            HarmonisationType::NotToHarmonise => "not_to_harmonise",
        }
    }

    pub fn is_harmonisable(&self) -> bool {
        match self {
            HarmonisationType::V1 | HarmonisationType::V0 => true,
            HarmonisationType::NotToHarmonise => false,
        }
    }
}

impl fmt::Display for HarmonisationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HarmonisationType {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "v1" => Ok(HarmonisationType::V1),
            "v0" => Ok(HarmonisationType::V0),
            "not_to_harmonise" | "not_harm" => Ok(HarmonisationType::NotToHarmonise),
            _ => Err(SyncError::InvalidHarmonisationType(value.to_string())),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn rank(&self) -> i64 {
        match self {
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    pub fn from_rank(rank: i64) -> Result<Self, SyncError> {
        match rank {
            1 => Ok(Priority::High),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::Low),
            other => Err(SyncError::InvalidPriority(other.to_string())),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Harmonisation bookkeeping for one study.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub study_id: StudyAccession,
    pub harmonisation_type: HarmonisationType,
    pub is_harmonised: bool,
    pub in_progress: bool,
    pub priority: Priority,
}

impl QueueRecord {
    pub fn queued(study_id: StudyAccession, harmonisation_type: HarmonisationType) -> Self {
        Self {
            study_id,
            harmonisation_type,
            is_harmonised: false,
            in_progress: false,
            priority: Priority::default(),
        }
    }

    pub fn harmonised(study_id: StudyAccession, harmonisation_type: HarmonisationType) -> Self {
        Self {
            study_id,
            harmonisation_type,
            is_harmonised: true,
            in_progress: false,
            priority: Priority::default(),
        }
    }

    pub fn state(&self) -> QueueState {
        if self.is_harmonised {
            QueueState::Harmonised
        } else if self.in_progress {
            QueueState::InProgress
        } else if !self.harmonisation_type.is_harmonisable() {
            QueueState::Skipped
        } else {
            QueueState::Queued
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Queued,
    InProgress,
    Harmonised,
    Skipped,
}

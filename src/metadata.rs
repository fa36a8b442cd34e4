use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::domain::HarmonisationType;

const METADATA_SUFFIX: &str = "-meta.yaml";

#[derive(Debug, Deserialize)]
struct StudyMetadata {
    #[serde(default)]
    file_type: Option<String>,
}

/// Metadata file of a study directory, if any.
pub fn find_metadata_file(study_dir: &Utf8Path) -> Option<Utf8PathBuf> {
    let mut candidates = fs::read_dir(study_dir.as_std_path())
        .ok()?
        .flatten()
        .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(".yaml") || name.ends_with(".yml"))
        .collect::<Vec<_>>();
    candidates.sort();
    let chosen = candidates
        .iter()
        .find(|name| name.ends_with(METADATA_SUFFIX))
        .or_else(|| candidates.first())?;
    Some(study_dir.join(chosen))
}

pub fn classify_file_type(file_type: &str) -> HarmonisationType {
    let normalized = file_type.trim().to_lowercase();
    if normalized.starts_with("gwas-ssf") {
        HarmonisationType::V1
    } else if normalized.starts_with("pre-gwas-ssf") || normalized.starts_with("non-gwas-ssf") {
        HarmonisationType::V0
    } else {
        HarmonisationType::NotToHarmonise
    }
}

/// Harmonisation format of a study from its metadata file. Missing or
/// unreadable metadata means the study is not harmonised.
pub fn detect_harmonisation_type(study_dir: &Utf8Path) -> HarmonisationType {
    let Some(path) = find_metadata_file(study_dir) else {
        tracing::debug!(dir = %study_dir, "no metadata file");
        return HarmonisationType::NotToHarmonise;
    };
    let parsed = fs::read_to_string(path.as_std_path())
        .map_err(|err| err.to_string())
        .and_then(|content| {
            serde_yaml::from_str::<StudyMetadata>(&content).map_err(|err| err.to_string())
        });
    match parsed {
        Ok(StudyMetadata {
            file_type: Some(file_type),
        }) => classify_file_type(&file_type),
        Ok(StudyMetadata { file_type: None }) => {
            tracing::debug!(path = %path, "metadata has no file_type");
            HarmonisationType::NotToHarmonise
        }
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "unreadable metadata file");
            HarmonisationType::NotToHarmonise
        }
    }
}

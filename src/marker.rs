use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::layout::write_bytes_atomic;

/// Start time of the last completed (non dry-run) release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMarker {
    pub last_release: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MarkerFile {
    path: Utf8PathBuf,
}

impl MarkerFile {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// `None` when there is no marker yet. An unreadable marker is logged and
    /// treated the same way.
    pub fn load(&self) -> Result<Option<RunMarker>, SyncError> {
        let content = match fs::read_to_string(self.path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(SyncError::Filesystem(format!("read {}: {err}", self.path)));
            }
        };
        match serde_json::from_str(&content) {
            Ok(marker) => Ok(Some(marker)),
            Err(err) => {
                tracing::warn!(path = %self.path, error = %err, "ignoring corrupt release marker");
                Ok(None)
            }
        }
    }

    /// Stores `started_at` unless a later run is already recorded.
    pub fn advance(&self, started_at: DateTime<Utc>) -> Result<RunMarker, SyncError> {
        if let Some(current) = self.load()? {
            if current.last_release >= started_at {
                return Ok(current);
            }
        }
        let marker = RunMarker {
            last_release: started_at,
        };
        let json = serde_json::to_vec_pretty(&marker)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&self.path, &json)?;
        Ok(marker)
    }
}

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("malformed study accession: {0}")]
    MalformedAccession(String),

    #[error("invalid range bin name: {0}")]
    InvalidRangeBin(String),

    #[error("invalid harmonisation type: {0}")]
    InvalidHarmonisationType(String),

    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    #[error("missing config file sumstats-sync.json in current directory")]
    MissingConfig,

    #[error("required setting not provided: {0}")]
    MissingSetting(&'static str),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("unexpected catalog payload: {0}")]
    CatalogPayload(String),

    #[error("queue store unavailable: {0}")]
    Store(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("job scheduler error: {0}")]
    Scheduler(String),

    #[error("notification failed: {0}")]
    Notify(String),
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Store(err.to_string())
    }
}

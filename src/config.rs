use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::catalog::DEFAULT_PAGE_SIZE;
use crate::deposit::DEFAULT_MIN_AGE;
use crate::error::SyncError;
use crate::layout::Layout;
use crate::scheduler::LsfOptions;

pub const DEFAULT_CONFIG_FILE: &str = "sumstats-sync.json";
const DATA_DIR_NAME: &str = "sumstats-sync";

/// On-disk configuration; every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub staging_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub ftp_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub harmonisation_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub deposition_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub queue_db: Option<Utf8PathBuf>,
    #[serde(default)]
    pub release_marker: Option<Utf8PathBuf>,
    #[serde(default)]
    pub catalog_api_url: Option<String>,
    #[serde(default)]
    pub email_recipient: Option<String>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub deposition_min_age_secs: Option<u64>,
    #[serde(default)]
    pub rsync: Option<PathBuf>,
    #[serde(default)]
    pub sendmail: Option<PathBuf>,
    #[serde(default)]
    pub lsf: Option<LsfOptions>,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub staging_dir: Option<Utf8PathBuf>,
    pub ftp_dir: Option<Utf8PathBuf>,
    pub harmonisation_dir: Option<Utf8PathBuf>,
    pub deposition_dir: Option<Utf8PathBuf>,
    pub queue_db: Option<Utf8PathBuf>,
    pub catalog_api_url: Option<String>,
    pub email_recipient: Option<String>,
}

impl Overrides {
    fn is_empty(&self) -> bool {
        self.staging_dir.is_none() && self.ftp_dir.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub staging_dir: Utf8PathBuf,
    pub ftp_dir: Utf8PathBuf,
    pub harmonisation_dir: Option<Utf8PathBuf>,
    pub deposition_dir: Option<Utf8PathBuf>,
    pub queue_db: Utf8PathBuf,
    pub release_marker: Utf8PathBuf,
    pub catalog_api_url: Option<String>,
    pub email_recipient: Option<String>,
    pub page_size: u32,
    pub deposition_min_age: Duration,
    pub rsync: Option<PathBuf>,
    pub sendmail: Option<PathBuf>,
    pub lsf: LsfOptions,
}

impl ResolvedConfig {
    pub fn layout(&self) -> Layout {
        let layout = Layout::new(self.staging_dir.clone(), self.ftp_dir.clone());
        match &self.harmonisation_dir {
            Some(dir) => layout.with_harmonisation_root(dir.clone()),
            None => layout,
        }
    }

    pub fn catalog_api_url(&self) -> Result<&str, SyncError> {
        self.catalog_api_url
            .as_deref()
            .ok_or(SyncError::MissingSetting("catalog_api_url"))
    }

    pub fn deposition_dir(&self) -> Result<&Utf8PathBuf, SyncError> {
        self.deposition_dir
            .as_ref()
            .ok_or(SyncError::MissingSetting("deposition_dir"))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path` (or `sumstats-sync.json` in the working directory) and
    /// applies `overrides`. Without a default file, overrides alone may
    /// supply the settings.
    pub fn resolve(path: Option<&str>, overrides: &Overrides) -> Result<ResolvedConfig, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            if overrides.is_empty() {
                return Err(SyncError::MissingConfig);
            }
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| SyncError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config, overrides.clone())
    }

    pub fn resolve_config(
        config: Config,
        overrides: Overrides,
    ) -> Result<ResolvedConfig, SyncError> {
        let staging_dir = overrides
            .staging_dir
            .or(config.staging_dir)
            .ok_or(SyncError::MissingSetting("staging_dir"))?;
        let ftp_dir = overrides
            .ftp_dir
            .or(config.ftp_dir)
            .ok_or(SyncError::MissingSetting("ftp_dir"))?;
        let queue_db = match overrides.queue_db.or(config.queue_db) {
            Some(path) => path,
            None => default_data_dir()?.join("harmonisation-queue.sqlite"),
        };
        let release_marker = match config.release_marker {
            Some(path) => path,
            None => default_data_dir()?.join("release-marker.json"),
        };

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            staging_dir,
            ftp_dir,
            harmonisation_dir: overrides.harmonisation_dir.or(config.harmonisation_dir),
            deposition_dir: overrides.deposition_dir.or(config.deposition_dir),
            queue_db,
            release_marker,
            catalog_api_url: overrides.catalog_api_url.or(config.catalog_api_url),
            email_recipient: overrides.email_recipient.or(config.email_recipient),
            page_size: config.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            deposition_min_age: config
                .deposition_min_age_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_MIN_AGE),
            rsync: config.rsync,
            sendmail: config.sendmail,
            lsf: config.lsf.unwrap_or_default(),
        })
    }
}

fn default_data_dir() -> Result<Utf8PathBuf, SyncError> {
    BaseDirs::new()
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.data_local_dir().join(DATA_DIR_NAME)).ok())
        .ok_or_else(|| SyncError::Filesystem("unable to resolve local data directory".to_string()))
}

use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use sumstats_sync::config::{Config, ConfigLoader, Overrides};
use sumstats_sync::error::SyncError;

#[test]
fn parse_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("sumstats-sync.json");
    fs::write(
        &path,
        r#"{
            "staging_dir": "/nfs/sumstats/staging",
            "ftp_dir": "/nfs/ftp/summary_statistics",
            "harmonisation_dir": "/nfs/sumstats/harmonisation",
            "queue_db": "/nfs/sumstats/queue.sqlite",
            "release_marker": "/nfs/sumstats/release-marker.json",
            "catalog_api_url": "https://www.ebi.ac.uk/gwas/rest/api",
            "email_recipient": "curators@example.org",
            "page_size": 250,
            "deposition_min_age_secs": 600,
            "lsf": {"queue": "standard", "memory_mb": 8000}
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str(), &Overrides::default()).unwrap();
    assert_eq!(resolved.schema_version, 1);
    assert_eq!(resolved.staging_dir, "/nfs/sumstats/staging");
    assert_eq!(resolved.page_size, 250);
    assert_eq!(resolved.deposition_min_age, Duration::from_secs(600));
    assert_eq!(resolved.lsf.queue.as_deref(), Some("standard"));
    assert_eq!(resolved.lsf.memory_mb, 8000);
    assert_eq!(resolved.lsf.cpus, 1);
    assert_eq!(
        resolved.catalog_api_url().unwrap(),
        "https://www.ebi.ac.uk/gwas/rest/api"
    );
    assert_eq!(
        resolved.layout().harmonisation_root().unwrap(),
        "/nfs/sumstats/harmonisation"
    );
}

#[test]
fn unknown_fields_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.json");
    fs::write(&path, r#"{"staging": "/typo"}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str(), &Overrides::default()),
        Err(SyncError::ConfigParse(_))
    );
}

#[test]
fn missing_required_path_is_named() {
    let config = Config {
        staging_dir: Some("/staging".into()),
        queue_db: Some("/q.sqlite".into()),
        release_marker: Some("/marker.json".into()),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config, Overrides::default()),
        Err(SyncError::MissingSetting("ftp_dir"))
    );
}

#[test]
fn unreadable_explicit_path() {
    assert_matches!(
        ConfigLoader::resolve(Some("/definitely/not/here.json"), &Overrides::default()),
        Err(SyncError::ConfigRead(_))
    );
}

use std::io::Write;

use boquita::error::BoquitaError;
use boquita::scheduler::job::{JobManifest, Trigger, MANIFEST_VERSION_V1};

fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_yaml_manifest() {
    let file = write_temp(
        ".yaml",
        r#"
version: job.manifest/v1
name: nightly-report
image: registry.example.com/reports/builder:2.1
entrypoint: /usr/bin/report
args:
  - --since
  - 24h
env:
  OUTPUT: s3://reports
memory_mb: 512
trigger:
  cron: "0 2 * * *"
"#,
    );

    let manifest = JobManifest::load(file.path()).unwrap();
    assert_eq!(manifest.version, MANIFEST_VERSION_V1);
    assert_eq!(manifest.image, "registry.example.com/reports/builder:2.1");
    assert_eq!(manifest.entrypoint.as_deref(), Some("/usr/bin/report"));
    assert_eq!(manifest.args, vec!["--since", "24h"]);
    assert_eq!(manifest.env.get("OUTPUT").map(String::as_str), Some("s3://reports"));
    assert_eq!(manifest.memory_mb, Some(512));
    assert_eq!(manifest.trigger, Trigger::Cron("0 2 * * *".into()));
    assert_eq!(manifest.job_name(), "nightly-report");
    manifest.validate().unwrap();
}

#[test]
fn test_load_json_manifest() {
    let file = write_temp(
        ".json",
        r#"{"image": "nginx:latest", "trigger": {"schedule": "2099-01-01T00:00:00Z"}}"#,
    );

    let manifest = JobManifest::load(file.path()).unwrap();
    assert_eq!(manifest.version, MANIFEST_VERSION_V1);
    assert_eq!(manifest.trigger, Trigger::Schedule("2099-01-01T00:00:00Z".into()));
    assert_eq!(manifest.job_name(), "nginx");
}

#[test]
fn test_minimal_yaml_defaults_to_immediate() {
    let file = write_temp(".yml", "image: alpine:3\n");
    let manifest = JobManifest::load(file.path()).unwrap();
    assert_eq!(manifest.trigger, Trigger::None);
    assert!(manifest.args.is_empty());
    assert!(manifest.env.is_empty());
    assert!(manifest.memory_mb.is_none());
}

#[test]
fn test_missing_image_is_manifest_error() {
    let file = write_temp(".yaml", "args: [a, b]\n");
    assert!(matches!(
        JobManifest::load(file.path()),
        Err(BoquitaError::Manifest(_))
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        JobManifest::load(&dir.path().join("absent.yaml")),
        Err(BoquitaError::Io(_))
    ));
}

#[test]
fn test_unsupported_version_fails_validation() {
    let file = write_temp(".yaml", "version: job.manifest/v2\nimage: alpine:3\n");
    let manifest = JobManifest::load(file.path()).unwrap();
    assert!(matches!(manifest.validate(), Err(BoquitaError::Validation(_))));
}

#[test]
fn test_yaml_numbers_and_booleans_load_as_strings() {
    let file = write_temp(
        ".yaml",
        r#"
image: nginx:latest
args:
  - --workers
  - 4
  - --verbose
  - true
env:
  PORT: 8080
  DEBUG: false
  RATIO: 0.5
"#,
    );

    let manifest = JobManifest::load(file.path()).unwrap();
    assert_eq!(manifest.args, vec!["--workers", "4", "--verbose", "true"]);
    assert_eq!(manifest.env.get("PORT").map(String::as_str), Some("8080"));
    assert_eq!(manifest.env.get("DEBUG").map(String::as_str), Some("false"));
    assert_eq!(manifest.env.get("RATIO").map(String::as_str), Some("0.5"));
}

#[test]
fn test_nested_env_value_is_still_rejected() {
    let file = write_temp(".yaml", "image: alpine:3\nenv:\n  NESTED:\n    a: b\n");
    assert!(matches!(
        JobManifest::load(file.path()),
        Err(BoquitaError::Manifest(_))
    ));
}

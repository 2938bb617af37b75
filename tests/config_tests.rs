//! Layered configuration: defaults, TOML file, `TSQ__*` environment overrides.

use std::fs;
use tempfile::tempdir;
use tsq::{EngineConfig, KeyWidths, QueryError, Value};

#[test]
fn load_without_file_uses_defaults() {
    let cfg = EngineConfig::load(None).unwrap();
    assert_eq!(cfg.widths, KeyWidths::default());
    assert_eq!(cfg.row_span_secs, 3600);
    assert_eq!(cfg.worker_threads, 4);
}

#[test]
fn load_reads_toml_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tsq.toml");
    fs::write(
        &path,
        r#"
row_span_secs = 1800
worker_threads = 2

[widths]
metric = 4
tag_name = 2
tag_value = 5

[availability]
interval_secs = 300
fallback = 1.0
fallback_is_integer = true
"#,
    )
    .unwrap();

    let cfg = EngineConfig::load(Some(&path)).unwrap();
    assert_eq!(cfg.row_span_secs, 1800);
    assert_eq!(cfg.worker_threads, 2);
    assert_eq!(cfg.widths, KeyWidths::new(4, 2, 5));
    assert_eq!(cfg.availability.fallback_value(), Value::Integer(1));
}

#[test]
fn environment_overrides_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tsq.toml");
    fs::write(&path, "scan_page_size = 16\n[availability]\ninterval_secs = 30\n").unwrap();

    // Only this test touches these variables.
    std::env::set_var("TSQ__SCAN_PAGE_SIZE", "64");
    std::env::set_var("TSQ__AVAILABILITY__INTERVAL_SECS", "120");
    let cfg = EngineConfig::load(Some(&path));
    std::env::remove_var("TSQ__SCAN_PAGE_SIZE");
    std::env::remove_var("TSQ__AVAILABILITY__INTERVAL_SECS");

    let cfg = cfg.unwrap();
    assert_eq!(cfg.scan_page_size, 64);
    assert_eq!(cfg.availability.interval_secs, 120);
}

#[test]
fn invalid_values_are_config_errors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "row_span_secs = 0\n").unwrap();
    assert!(matches!(
        EngineConfig::load(Some(&path)),
        Err(QueryError::Config(_))
    ));

    fs::write(&path, "row_span_secs = \"hourly\"\n").unwrap();
    assert!(matches!(
        EngineConfig::load(Some(&path)),
        Err(QueryError::Config(_))
    ));

    let missing = dir.path().join("missing.toml");
    assert!(EngineConfig::load(Some(&missing)).is_err());
}

use std::fs;

use ddl_engine::logging::{LogConfig, init_logging};
use serial_test::serial;
use tempfile::TempDir;
use tracing::{Level, info};

// The global subscriber can be installed once per process, so everything
// that depends on it lives in one test.
#[test]
#[serial]
fn test_file_sink_and_single_init() {
    // SAFETY: serialised; no other thread reads the environment here.
    unsafe { std::env::remove_var("RUST_LOG") };
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ddl.log");

    let config = LogConfig::new()
        .with_level(Level::INFO)
        .with_console(false)
        .with_file(true)
        .with_file_path(path);
    let guard = init_logging(config.clone()).unwrap();
    assert!(guard.is_some());

    info!(job_id = 42, "schema change finished");
    drop(guard);

    let written: String = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("ddl.log"))
        .map(|entry| fs::read_to_string(entry.path()).unwrap())
        .collect();
    assert!(written.contains("schema change finished"));
    assert!(written.contains("job_id=42"));

    let err = init_logging(LogConfig::new().with_console(true)).unwrap_err();
    assert!(err.to_string().contains("Failed to initialize logging"));
}

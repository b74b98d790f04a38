//! Tests for `src/logging.rs`.

use straylight::logging::LoggingGuard;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_with_files_creates_the_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    // init_with_files installs the global subscriber, which only works once
    // per process, so this test lives in its own binary and only asserts on
    // the filesystem side effect.
    let guard = straylight::logging::init_with_files(&logs_dir);
    assert!(logs_dir.exists(), "logs directory should be created");
    drop(guard);
}

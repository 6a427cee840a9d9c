//! Fatal-diagnostic channel: the stderr report plus the `LOG_FILE` JSONL
//! record, observed from outside the failing process.

use std::process::Command;

/// Helper, not a test of its own: trips an invariant when the parent test
/// below re-runs this binary with the trigger variable set.
#[test]
fn trigger_invariant_in_child() {
    if std::env::var_os("HEARTH_DIAG_TRIGGER").is_none() {
        return;
    }
    let _ = hearth_core::store::reserve_eager(64, 3);
}

#[test]
fn invariant_diagnostics_reach_stderr_and_log_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let log_path = dir.path().join("diagnostics.jsonl");

    let exe = std::env::current_exe().expect("test binary path");
    let output = Command::new(exe)
        .args(["trigger_invariant_in_child", "--exact", "--test-threads=1"])
        .env("HEARTH_DIAG_TRIGGER", "1")
        .env("LOG_FILE", &log_path)
        .output()
        .expect("spawn test binary");

    assert!(!output.status.success(), "the triggered child run must fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("INVARIANT VIOLATION"), "stderr was: {stderr}");
    assert!(stderr.contains("alignment"), "stderr was: {stderr}");

    let contents = std::fs::read_to_string(&log_path).expect("log file written");
    let line = contents.lines().next().expect("one JSONL record");
    let record: serde_json::Value = serde_json::from_str(line).expect("valid json");
    assert_eq!(record["severity"], "fatal");
    assert_eq!(record["domain"], "memory");
    assert!(record["location"].as_str().expect("location").contains("store.rs"));
}

#[test]
fn recoverable_errors_write_nothing() {
    let dir = tempfile::tempdir().expect("temp dir");
    let log_path = dir.path().join("quiet.jsonl");

    let exe = std::env::current_exe().expect("test binary path");
    let output = Command::new(exe)
        .args(["soft_failure_in_child", "--exact", "--test-threads=1"])
        .env("HEARTH_DIAG_TRIGGER", "1")
        .env("LOG_FILE", &log_path)
        .output()
        .expect("spawn test binary");

    assert!(output.status.success(), "soft failures must not fail the child");
    assert!(!log_path.exists(), "recoverable errors are never logged");
}

/// Helper for the test above: provokes only recoverable failures.
#[test]
fn soft_failure_in_child() {
    if std::env::var_os("HEARTH_DIAG_TRIGGER").is_none() {
        return;
    }
    let mut scratch = hearth_core::ScratchAllocator::create(32, 8).expect("create");
    assert!(scratch.alloc(64, 8).is_none(), "soft out-of-memory");
}

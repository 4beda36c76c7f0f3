//! Integration Test: Blocking Discipline
//!
//! **Policy**: Production code in portmux-core MUST NOT block the async
//! runtime. Sessions, pumps, and the runner loop all share cooperative
//! scheduling; one blocking call stalls every port multiplexed on that
//! worker.
//!
//! **Required**: `tokio::time::sleep`, `tokio::select!`, async channel
//! operations, never `std::thread::sleep` or blocking channel recvs.

use std::fs;
use std::path::{Path, PathBuf};

/// Test that production code never blocks the runtime
#[test]
fn test_no_blocking_sleep_in_production_code() {
    let violations = scan_core_sources(&[
        "std::thread::sleep",
        "thread::sleep(",
        ".blocking_recv()",
        ".blocking_send()",
        ".blocking_lock()",
    ]);

    if !violations.is_empty() {
        eprintln!("\nBlocking calls found in production code:");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        panic!(
            "Found {} blocking call(s) in production code. Use the tokio equivalents instead.",
            violations.len()
        );
    }
}

/// Test that the multiplexing layer stays transport-agnostic
///
/// Channels are handed in by the platform bootstrap; the core must not
/// reach for sockets or the filesystem itself.
#[test]
fn test_core_has_no_io_dependencies() {
    let violations = scan_core_sources(&[
        "std::net::",
        "tokio::net::",
        "std::fs::",
        "tokio::fs::",
        "std::process::Command",
    ]);

    if !violations.is_empty() {
        eprintln!("\nDirect I/O found in the transport core:");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        panic!(
            "Found {} I/O call(s) in portmux-core. The core is wired over in-memory channels only.",
            violations.len()
        );
    }
}

fn core_src_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../portmux/core/src")
}

/// Scan production sources for forbidden patterns, skipping test modules
fn scan_core_sources(patterns: &[&str]) -> Vec<String> {
    let mut violations = Vec::new();
    let root = core_src_dir();
    assert!(root.exists(), "expected core sources at {root:?}");

    for entry in walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
            check_file(entry.path(), patterns, &mut violations);
        }
    }

    violations
}

fn check_file(path: &Path, patterns: &[&str], violations: &mut Vec<String>) {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return,
    };

    let mut in_test_module = false;
    for (number, line) in content.lines().enumerate() {
        if line.contains("#[cfg(test)]") {
            // Everything after the unit-test module marker is test code;
            // the convention in this repo is one trailing test module per
            // file.
            in_test_module = true;
        }
        if in_test_module {
            continue;
        }

        let trimmed = line.trim_start();
        if trimmed.starts_with("//") {
            continue;
        }

        for pattern in patterns {
            if trimmed.contains(pattern) {
                violations.push(format!(
                    "{}:{}: {}",
                    path.display(),
                    number + 1,
                    trimmed
                ));
            }
        }
    }
}

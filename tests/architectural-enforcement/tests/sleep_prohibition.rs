//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep. The proxy waits on channels,
//! the CLI waits on channels with a deadline.
//! **Exceptions**: test code

use architectural_enforcement::{report, rust_files, scan};

const SLEEPS: &[&str] = &["thread::sleep", "time::sleep", "sleep_until"];

#[test]
fn test_no_sleep_in_production_code() {
    let mut files = rust_files("conduit/core/src");
    files.extend(rust_files("conduit/loopback/src"));
    assert!(!files.is_empty(), "no sources found to scan");

    let violations = scan(&files, SLEEPS);
    report(
        "Sleep calls found in production code!",
        &violations,
        &[
            "❌ FORBIDDEN: sleeping to wait for the other context",
            "✅ REQUIRED: await a channel, a Notify, or tokio::time::timeout_at",
        ],
    );
}

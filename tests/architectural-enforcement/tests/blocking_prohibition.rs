//! Integration Test: Blocking Prohibition
//!
//! **Policy**: Nothing reachable from `ChannelProxy` may block the caller.
//! Work for the transport context is posted, never awaited synchronously.
//! **Exceptions**: `scheduler.rs`, which owns the I/O thread and is the one
//! place allowed to run a runtime to completion and join its thread.
//!
//! Blocking I/O is additionally forbidden inside async functions anywhere in
//! the workspace's production code.

use std::path::PathBuf;

use architectural_enforcement::{report, rust_files, scan, scan_async};

const BLOCKING_WAITS: &[&str] = &[
    "block_on",
    "blocking_recv",
    "blocking_send",
    "blocking_lock",
    ".join()",
    "Condvar",
    "std::sync::mpsc",
];

const BLOCKING_IO: &[&str] = &["std::fs::", "std::net::", "std::process::Command"];

fn proxy_side_files() -> Vec<PathBuf> {
    rust_files("conduit/core/src")
        .into_iter()
        .filter(|path| path.file_name().and_then(|n| n.to_str()) != Some("scheduler.rs"))
        .collect()
}

#[test]
fn test_no_blocking_waits_in_proxy() {
    let files = proxy_side_files();
    assert!(!files.is_empty(), "no sources found to scan");

    let violations = scan(&files, BLOCKING_WAITS);
    report(
        "Blocking waits found on the proxy side!",
        &violations,
        &[
            "❌ FORBIDDEN: block_on, blocking_recv, thread joins, condvars",
            "✅ REQUIRED: post an IoTask or a ListenerTask and return",
        ],
    );
}

#[test]
fn test_no_blocking_io_in_async_code() {
    let mut files = rust_files("conduit/core/src");
    files.extend(rust_files("conduit/loopback/src"));

    let violations = scan_async(&files, BLOCKING_IO);
    report(
        "Blocking I/O calls found in async code!",
        &violations,
        &[
            "✅ ACCEPTABLE: non-async functions (configuration loading before the runtime)",
            "✅ REQUIRED in async code: tokio::fs, tokio::net, tokio::process",
        ],
    );
}

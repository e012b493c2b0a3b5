//! Architectural Enforcement
//!
//! Source scanners behind the integration tests in `tests/`. They enforce
//! that the channel proxy never blocks the context it is called from:
//! - No sleep() calls in production code
//! - No blocking waits on the owner-facing side of the proxy
//! - No blocking I/O inside async functions
//!
//! Scanning is line based. Everything from the first `#[cfg(test)]` in a
//! file onwards is treated as test code, as are `//` comments.

use std::fs;
use std::path::{Path, PathBuf};

/// A pattern found where it is not allowed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: PathBuf,
    pub line: usize,
    pub pattern: &'static str,
    pub source: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.pattern,
            self.source
        )
    }
}

/// Root of the workspace this crate belongs to
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// All `.rs` files under `dir`, relative to the workspace root
pub fn rust_files(dir: &str) -> Vec<PathBuf> {
    let root = workspace_root().join(dir);
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Strip a trailing `//` comment
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Lines of `content` that belong to production code, 1-based
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, code_part(line)))
        .filter(|(_, code)| !code.trim().is_empty())
        .collect()
}

/// Check if line is inside an async function
pub fn is_in_async_function(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..=current_idx).rev() {
        let line = lines[i].trim();

        if line.contains("async fn ") {
            return true;
        }
        if (line.starts_with("fn ") || line.contains(" fn ")) && !line.contains("async") {
            return false;
        }
        // Stop at module/impl boundaries
        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return false;
        }
    }
    false
}

/// Scan `files` for any of `patterns` in production code
pub fn scan(files: &[PathBuf], patterns: &[&'static str]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for path in files {
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        for (line, code) in production_lines(&content) {
            for pattern in patterns {
                if code.contains(pattern) {
                    violations.push(Violation {
                        path: path.clone(),
                        line,
                        pattern,
                        source: code.trim().to_string(),
                    });
                }
            }
        }
    }
    violations
}

/// Scan `files` for `patterns` used inside async functions
pub fn scan_async(files: &[PathBuf], patterns: &[&'static str]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for path in files {
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        let production = production_lines(&content);
        let lines: Vec<&str> = production.iter().map(|(_, code)| *code).collect();
        for (idx, (line, code)) in production.iter().enumerate() {
            if !is_in_async_function(&lines, idx) {
                continue;
            }
            for pattern in patterns {
                if code.contains(pattern) {
                    violations.push(Violation {
                        path: path.clone(),
                        line: *line,
                        pattern,
                        source: code.trim().to_string(),
                    });
                }
            }
        }
    }
    violations
}

/// Print violations and fail the test
pub fn report(title: &str, violations: &[Violation], guidance: &[&str]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ CRITICAL: {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!();
    for line in guidance {
        eprintln!("  {line}");
    }
    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "fn a() {}\n// std::thread::sleep\n#[cfg(test)]\nmod tests { fn b() {} }\n";
        let lines = production_lines(content);
        assert_eq!(lines, vec![(1, "fn a() {}")]);
    }

    #[test]
    fn test_code_part_strips_comment() {
        assert_eq!(code_part("let x = 1; // block_on"), "let x = 1; ");
    }

    #[test]
    fn test_async_function_detection() {
        let code = vec![
            "async fn bad_function() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
        ];
        assert!(is_in_async_function(&code, 1));

        let code = vec![
            "pub fn load() {",
            "    let contents = std::fs::read_to_string(\"conduit.toml\")?;",
            "}",
        ];
        assert!(!is_in_async_function(&code, 1));
    }

    #[test]
    fn test_workspace_root_has_core_crate() {
        assert!(workspace_root().join("conduit/core/Cargo.toml").exists());
    }
}

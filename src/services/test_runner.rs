//! Test runner wrapper: run the configured test command with a timeout and
//! summarise the result for chat.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

static RESULT_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"test result: \w+\. (\d+) passed; (\d+) failed").ok()
});

#[derive(Debug, Error)]
pub enum TestRunError {
    #[error("test command is empty")]
    EmptyCommand,

    #[error("failed to start test command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("test command timed out after {0}s")]
    Timeout(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub passed: Option<u32>,
    pub failed: Option<u32>,
    /// Last lines of combined output.
    pub summary: String,
}

impl TestReport {
    pub fn headline(&self) -> String {
        let verdict = if self.success { "passed" } else { "FAILED" };
        match (self.passed, self.failed) {
            (Some(p), Some(f)) => format!("tests {verdict}: {p} passed, {f} failed ({} ms)", self.duration_ms),
            _ => format!("tests {verdict} (exit {:?}, {} ms)", self.exit_code, self.duration_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestRunner {
    command: String,
    dir: PathBuf,
    timeout: Duration,
    summary_lines: usize,
}

impl TestRunner {
    pub fn new(command: impl Into<String>, dir: impl Into<PathBuf>, timeout_secs: u64, summary_lines: usize) -> Self {
        Self {
            command: command.into(),
            dir: dir.into(),
            timeout: Duration::from_secs(timeout_secs),
            summary_lines,
        }
    }

    pub async fn run(&self) -> Result<TestReport, TestRunError> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().ok_or(TestRunError::EmptyCommand)?;

        info!(command = %self.command, dir = %self.dir.display(), "running tests");
        let started = Instant::now();
        let child = Command::new(program)
            .args(parts)
            .current_dir(&self.dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(out) => out?,
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "test command timed out");
                return Err(TestRunError::Timeout(self.timeout.as_secs()));
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let (passed, failed) = count_results(&combined);

        let report = TestReport {
            success: output.status.success(),
            exit_code: output.status.code(),
            duration_ms: started.elapsed().as_millis() as u64,
            passed,
            failed,
            summary: tail_lines(&combined, self.summary_lines),
        };
        info!(success = report.success, ?passed, ?failed, duration_ms = report.duration_ms, "tests finished");
        Ok(report)
    }
}

/// Sum every `test result:` line (one per test binary).
fn count_results(output: &str) -> (Option<u32>, Option<u32>) {
    let Some(re) = RESULT_LINE.as_ref() else {
        return (None, None);
    };
    let mut seen = false;
    let (mut passed, mut failed) = (0u32, 0u32);
    for caps in re.captures_iter(output) {
        seen = true;
        // Digits only, so a parse failure means the count overflowed.
        passed = passed.saturating_add(caps[1].parse::<u32>().unwrap_or(u32::MAX));
        failed = failed.saturating_add(caps[2].parse::<u32>().unwrap_or(u32::MAX));
    }
    if seen { (Some(passed), Some(failed)) } else { (None, None) }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

//! Sandboxed execution boundary
//!
//! Candidate code never runs in-process. The pipeline hands code and test
//! cases to an `ExecutionSandbox` and gets back a report; `ProcessSandbox`
//! is the reference implementation, running a time-bounded interpreter
//! subprocess. Tests substitute stub sandboxes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::error::{CrucibleError, Result};
use crate::types::TestCase;

/// One failed assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub input: String,
    pub expected: String,
    pub actual: String,
}

/// Outcome of running a candidate against its test cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Every test case passed and the process exited cleanly
    pub passed: bool,
    /// Raw stdout
    pub output: String,
    /// Runtime error text (stderr, crash, or timeout), if any
    pub error: Option<String>,
    pub failures: Vec<TestFailure>,
}

impl ExecutionReport {
    /// Short human-readable summary of what went wrong
    pub fn error_summary(&self) -> Option<String> {
        if self.passed {
            return None;
        }
        if let Some(err) = &self.error {
            let line = err.lines().last().unwrap_or(err);
            return Some(line.chars().take(150).collect());
        }
        self.failures.first().map(|f| {
            format!(
                "expected {} for input {}, got {}",
                f.expected, f.input, f.actual
            )
        })
    }
}

/// Execution seam between the pipeline and the outside world
#[async_trait]
pub trait ExecutionSandbox: Send + Sync {
    /// Run `code` against the test cases within the time budget
    ///
    /// Failures (crashes, wrong answers, timeouts) come back in the report;
    /// an `Err` means the sandbox itself could not run at all.
    async fn run(
        &self,
        code: &str,
        test_cases: &[TestCase],
        timeout: Duration,
    ) -> Result<ExecutionReport>;
}

/// Subprocess-based sandbox running a Python interpreter
///
/// A harness is appended to the candidate code that prints one line per
/// test case; lines are compared textually against the expected values.
pub struct ProcessSandbox {
    interpreter: String,
    workspace: PathBuf,
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            workspace: std::env::temp_dir(),
        }
    }
}

impl ProcessSandbox {
    pub fn new(interpreter: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            workspace: workspace.into(),
        }
    }

    fn build_script(code: &str, test_cases: &[TestCase]) -> String {
        let mut script = String::from(code);
        script.push_str("\n\n");
        for case in test_cases {
            script.push_str(&format!("print({})\n", case.input));
        }
        script
    }
}

#[async_trait]
impl ExecutionSandbox for ProcessSandbox {
    async fn run(
        &self,
        code: &str,
        test_cases: &[TestCase],
        timeout: Duration,
    ) -> Result<ExecutionReport> {
        let script = Self::build_script(code, test_cases);
        let path = self
            .workspace
            .join(format!("crucible-{}.py", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, &script).await?;

        let child = tokio::process::Command::new(&self.interpreter)
            .arg(&path)
            .current_dir(&self.workspace)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CrucibleError::Sandbox(format!("failed to spawn interpreter: {}", e)))?;

        let outcome = tokio::time::timeout(timeout, child.wait_with_output()).await;
        let _ = tokio::fs::remove_file(&path).await;

        let output = match outcome {
            Err(_) => {
                debug!(timeout_secs = timeout.as_secs(), "execution timed out");
                return Ok(ExecutionReport {
                    passed: false,
                    output: String::new(),
                    error: Some(format!("timeout after {}s", timeout.as_secs())),
                    failures: Vec::new(),
                });
            }
            Ok(result) => result
                .map_err(|e| CrucibleError::Sandbox(format!("wait failed: {}", e)))?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Ok(ExecutionReport {
                passed: false,
                output: stdout,
                error: Some(if stderr.is_empty() {
                    format!("process exited with {}", output.status)
                } else {
                    stderr
                }),
                failures: Vec::new(),
            });
        }

        let lines: Vec<&str> = stdout.lines().collect();
        let mut failures = Vec::new();
        for (i, case) in test_cases.iter().enumerate() {
            let actual = lines.get(i).map(|l| l.trim()).unwrap_or("");
            if actual != case.expected.trim() {
                failures.push(TestFailure {
                    input: case.input.clone(),
                    expected: case.expected.clone(),
                    actual: actual.to_string(),
                });
            }
        }

        Ok(ExecutionReport {
            passed: failures.is_empty(),
            output: stdout,
            error: None,
            failures,
        })
    }
}

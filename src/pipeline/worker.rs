//! Candidate worker: generate, verify, repair, score
//!
//! Each worker owns one temperature. It generates a solution, extracts the
//! code block, runs it against the task's test cases, and spends a bounded
//! number of repair attempts on execution failures. Finally it scores its
//! own candidate with one evaluation call; a failed scoring call yields
//! score 0 rather than failing the worker.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::gateway::{CompletionRequest, InferenceGateway};
use crate::sandbox::ExecutionSandbox;
use crate::types::{Candidate, PipelineConfig, Task, WorkerResult};

use super::{extract_code, extract_score};

const SYSTEM_PROMPT: &str = "You are a careful programmer. Solve the task with a \
single self-contained code block. Use only the standard library.";

const EVALUATION_PROMPT: &str = "Evaluate this solution on a 0-25 rubric \
(correctness 10, completeness 5, robustness 5, clarity 5). \
End with a line 'TOTAL: n/25'.";

pub struct CandidateWorker {
    id: usize,
    temperature: f64,
    gateway: Arc<dyn InferenceGateway>,
    sandbox: Arc<dyn ExecutionSandbox>,
    config: PipelineConfig,
}

impl CandidateWorker {
    pub fn new(
        id: usize,
        temperature: f64,
        gateway: Arc<dyn InferenceGateway>,
        sandbox: Arc<dyn ExecutionSandbox>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            id,
            temperature,
            gateway,
            sandbox,
            config,
        }
    }

    /// Produce one scored candidate for the task
    pub async fn run(&self, task: &Task, memory_prompt: &str) -> Result<WorkerResult> {
        let start = Instant::now();

        let mut system = SYSTEM_PROMPT.to_string();
        if !memory_prompt.is_empty() {
            system.push_str("\n\n");
            system.push_str(memory_prompt);
        }

        let mut solution = self
            .gateway
            .complete(
                &CompletionRequest::new(&task.description, self.temperature)
                    .with_system(&system),
            )
            .await?;
        let mut code = extract_code(&solution);
        let mut attempts: u32 = 1;
        let mut verified = false;
        let mut error_summary = None;

        if task.test_cases.is_empty() {
            debug!(worker_id = self.id, "no test cases, skipping verification");
        } else if code.is_none() {
            error_summary = Some("no code block in solution".to_string());
        } else {
            // Verify, then repair locally while retries remain
            for attempt in 0..=self.config.max_verify_retries {
                let Some(current) = code.as_deref() else {
                    break;
                };
                let report = self
                    .sandbox
                    .run(current, &task.test_cases, self.config.execution_timeout)
                    .await?;

                if report.passed {
                    info!(worker_id = self.id, attempts, "candidate verified");
                    verified = true;
                    error_summary = None;
                    break;
                }

                error_summary = report.error_summary();
                if attempt == self.config.max_verify_retries {
                    warn!(worker_id = self.id, attempts, "verification retries exhausted");
                    break;
                }

                let error = error_summary.as_deref().unwrap_or("tests failed");
                debug!(worker_id = self.id, error, "repairing candidate");
                solution = self.repair(task, current, error).await?;
                code = extract_code(&solution);
                attempts += 1;
                if code.is_none() {
                    error_summary = Some("repair produced no code block".to_string());
                    break;
                }
            }
        }

        let score = self.score(task, &solution).await;

        Ok(WorkerResult {
            worker_id: self.id,
            candidate: Candidate {
                solution,
                code,
                temperature: self.temperature,
                verified,
                score,
                error_summary,
            },
            attempts,
            elapsed: start.elapsed(),
        })
    }

    async fn repair(&self, task: &Task, code: &str, error: &str) -> Result<String> {
        let prompt = format!(
            "The following solution to this task fails when executed.\n\n\
             TASK: {}\n\nCODE:\n```python\n{}\n```\n\nERROR: {}\n\n\
             Fix the code. Reply with a single corrected code block.",
            task.description, code, error
        );
        self.gateway
            .complete(&CompletionRequest::new(prompt, self.temperature).with_system(SYSTEM_PROMPT))
            .await
    }

    /// One evaluation call; failure degrades to score 0
    async fn score(&self, task: &Task, solution: &str) -> u8 {
        let prompt = format!(
            "TASK: {}\n\nSOLUTION:\n{}\n\n{}",
            task.description, solution, EVALUATION_PROMPT
        );
        match self
            .gateway
            .complete(&CompletionRequest::new(prompt, self.config.refine_temperature))
            .await
        {
            Ok(feedback) => extract_score(&feedback),
            Err(e) => {
                warn!(worker_id = self.id, error = %e, "scoring call failed, using 0");
                0
            }
        }
    }
}

//! Self-refine loop
//!
//! Alternates EVALUATE and REFINE on the winning candidate. Evaluation
//! scores the current candidate on the 0-25 rubric; refinement produces a
//! replacement candidate guided by the feedback, the session's reflection
//! buffer, and a short history of earlier iterations. The best candidate
//! ever seen is what comes out, so a regressing refinement can never make
//! the final answer worse.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::gateway::{CompletionRequest, InferenceGateway};
use crate::memory::ReflectionBuffer;
use crate::sandbox::ExecutionSandbox;
use crate::types::{Candidate, IterationRecord, PipelineConfig, Task};

use super::{extract_code, extract_score};

/// What the refine loop produced
#[derive(Debug, Clone)]
pub struct RefineOutcome {
    /// Best candidate observed across all iterations
    pub candidate: Candidate,
    pub score: u8,
    /// REFINE transitions performed
    pub iterations: u32,
    pub history: Vec<IterationRecord>,
}

pub struct SelfRefiner {
    gateway: Arc<dyn InferenceGateway>,
    sandbox: Arc<dyn ExecutionSandbox>,
    config: PipelineConfig,
}

impl SelfRefiner {
    pub fn new(
        gateway: Arc<dyn InferenceGateway>,
        sandbox: Arc<dyn ExecutionSandbox>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            gateway,
            sandbox,
            config,
        }
    }

    /// Run the evaluate/refine loop on the winning candidate
    pub async fn refine(
        &self,
        task: &Task,
        initial: Candidate,
        reflections: &mut ReflectionBuffer,
    ) -> Result<RefineOutcome> {
        let mut current = initial;
        let mut history: Vec<IterationRecord> = Vec::new();
        let mut refine_count: u32 = 0;

        let (mut best, mut best_score) = (current.clone(), 0u8);

        loop {
            let iteration = refine_count + 1;
            let feedback = self.evaluate(task, &current).await?;
            let score = extract_score(&feedback);
            debug!(iteration, score, "candidate evaluated");

            // Keep the best ever: a verified candidate outranks an
            // unverified one at the same score.
            if score > best_score || (score == best_score && current.verified && !best.verified) {
                best = current.clone();
                best_score = score;
            }

            history.push(IterationRecord {
                iteration,
                candidate: current.clone(),
                score,
                feedback: feedback.clone(),
            });

            if score >= self.config.early_stop_threshold {
                info!(iteration, score, "early stop, candidate excellent");
                break;
            }
            if score >= self.config.refine_threshold {
                info!(iteration, score, "candidate acceptable, stopping");
                break;
            }
            if refine_count >= self.config.max_iterations {
                info!(score, "iteration budget exhausted");
                break;
            }

            if let Some(err) = &current.error_summary {
                reflections.add_from_error(iteration, err);
            }

            // A failing refinement's error is reflected at the top of the
            // next pass, just before the retry that needs the lesson.
            current = self.produce_refinement(task, &current, &feedback, reflections, &history).await?;
            refine_count += 1;
        }

        Ok(RefineOutcome {
            candidate: best,
            score: best_score,
            iterations: refine_count,
            history,
        })
    }

    async fn evaluate(&self, task: &Task, candidate: &Candidate) -> Result<String> {
        let mut prompt = format!(
            "TASK: {}\n\nSOLUTION:\n{}\n\n",
            task.description, candidate.solution
        );
        if candidate.verified {
            prompt.push_str("The solution passed all known test cases.\n");
        } else if let Some(err) = &candidate.error_summary {
            prompt.push_str(&format!("Execution failed: {}\n", err));
        }
        prompt.push_str(
            "Evaluate on a 0-25 rubric (correctness 10, completeness 5, \
             robustness 5, clarity 5). List concrete problems, then end \
             with a line 'TOTAL: n/25'.",
        );
        self.gateway
            .complete(&CompletionRequest::new(prompt, self.config.refine_temperature))
            .await
    }

    /// One REFINE transition: new solution, re-extracted and re-verified
    async fn produce_refinement(
        &self,
        task: &Task,
        current: &Candidate,
        feedback: &str,
        reflections: &ReflectionBuffer,
        history: &[IterationRecord],
    ) -> Result<Candidate> {
        let mut prompt = format!(
            "TASK: {}\n\nCURRENT SOLUTION:\n{}\n\nFEEDBACK:\n{}\n",
            task.description, current.solution, feedback
        );
        if !reflections.is_empty() {
            prompt.push('\n');
            prompt.push_str(&reflections.context());
            prompt.push('\n');
        }
        if history.len() > 1 {
            prompt.push_str("\nEARLIER ITERATIONS:\n");
            for record in history.iter().rev().take(2).rev() {
                prompt.push_str(&format!(
                    "- Iteration {} scored {}/25\n",
                    record.iteration, record.score
                ));
            }
        }
        prompt.push_str("\nProduce an improved solution as a single code block.");

        let solution = self
            .gateway
            .complete(&CompletionRequest::new(prompt, self.config.refine_temperature))
            .await?;
        let code = extract_code(&solution);

        let (verified, error_summary) = match (&code, task.test_cases.is_empty()) {
            (Some(code), false) => {
                let report = self
                    .sandbox
                    .run(code, &task.test_cases, self.config.execution_timeout)
                    .await?;
                if !report.passed {
                    warn!("refined candidate failed verification");
                }
                (report.passed, report.error_summary())
            }
            (None, false) => (false, Some("no code block in refinement".to_string())),
            (_, true) => (false, None),
        };

        Ok(Candidate {
            solution,
            code,
            temperature: self.config.refine_temperature,
            verified,
            score: 0,
            error_summary,
        })
    }
}

//! The solve pipeline end to end
//!
//! One `solve` call is one session: snapshot memory retrieval, parallel
//! workers, deterministic aggregation, an optional refine loop, and a
//! background learning pass. Worker failures degrade the candidate set
//! instead of failing the task; only an empty set is fatal.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

use crate::error::Result;
use crate::gateway::InferenceGateway;
use crate::memory::{MemoryOrchestrator, ReflectionBuffer};
use crate::sandbox::ExecutionSandbox;
use crate::types::{PipelineConfig, SessionRecord, Solution, Task, WorkerResult};

use super::aggregator::select_winner;
use super::learner::SessionLearner;
use super::refiner::SelfRefiner;
use super::worker::CandidateWorker;

pub struct SolvePipeline {
    gateway: Arc<dyn InferenceGateway>,
    sandbox: Arc<dyn ExecutionSandbox>,
    memory: Arc<MemoryOrchestrator>,
    config: PipelineConfig,
}

impl SolvePipeline {
    pub fn new(
        gateway: Arc<dyn InferenceGateway>,
        sandbox: Arc<dyn ExecutionSandbox>,
        memory: Arc<MemoryOrchestrator>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            gateway,
            sandbox,
            memory,
            config,
        }
    }

    /// Solve one task through the full pipeline
    pub async fn solve(&self, task: Task) -> Result<Solution> {
        let session_id = uuid::Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("solve", %session_id);

        async move {
            info!(task = %truncate(&task.description, 60), "session started");

            // Phase 1: read-only memory snapshot
            let bundle = self.memory.retrieve(&task.description).await?;
            let memory_prompt = bundle.to_prompt();

            // Phase 2: parallel workers, one per temperature
            let worker_results = self.run_workers(&task, &memory_prompt).await;

            // Phase 3: deterministic selection
            let winner = select_winner(worker_results.clone())?;
            let pre_score = winner.candidate.score;

            // Phase 4: refine, unless the whole pool verified and the winner
            // already clears the confidence bar
            let mut reflections = ReflectionBuffer::new();
            let all_verified = worker_results.iter().all(|r| r.candidate.verified);
            let skip_refiner =
                all_verified && pre_score >= self.config.high_confidence_threshold;

            let (final_candidate, final_score, iterations, history) = if skip_refiner {
                info!(score = pre_score, "verified winner, refiner skipped");
                (winner.candidate.clone(), pre_score, 0, Vec::new())
            } else {
                let refiner = SelfRefiner::new(
                    self.gateway.clone(),
                    self.sandbox.clone(),
                    self.config.clone(),
                );
                let outcome = refiner
                    .refine(&task, winner.candidate.clone(), &mut reflections)
                    .await?;
                (
                    outcome.candidate,
                    outcome.score,
                    outcome.iterations,
                    outcome.history,
                )
            };

            let finished_at = Utc::now();
            let record = SessionRecord {
                session_id,
                task,
                category: bundle.category,
                category_confidence: bundle.confidence,
                memories_used: bundle.memory_ids(),
                worker_results,
                iterations: history,
                final_candidate: final_candidate.clone(),
                final_score,
                started_at,
                finished_at,
            };

            // Phase 5: learn in the background, off the critical path
            let learner =
                SessionLearner::new(self.gateway.clone(), self.memory.writer());
            let reflections = reflections.entries().to_vec();
            tokio::spawn(async move {
                if let Err(e) = learner.learn(&record, &reflections).await {
                    warn!(error = %e, "session learning failed");
                }
            });

            info!(
                score = final_score,
                verified = final_candidate.verified,
                iterations,
                "session finished"
            );

            Ok(Solution {
                verified: final_candidate.verified,
                score: final_score,
                candidate: final_candidate,
                refine_iterations: iterations,
                category: bundle.category,
                session_id,
            })
        }
        .instrument(span)
        .await
    }

    /// Spawn one worker per configured temperature and collect what lands
    ///
    /// A worker that errors or exceeds its timeout is dropped with a log
    /// line; the survivors form the candidate set.
    async fn run_workers(&self, task: &Task, memory_prompt: &str) -> Vec<WorkerResult> {
        let mut handles = Vec::new();
        for (id, &temperature) in self.config.worker_temperatures.iter().enumerate() {
            let worker = CandidateWorker::new(
                id,
                temperature,
                self.gateway.clone(),
                self.sandbox.clone(),
                self.config.clone(),
            );
            let task = task.clone();
            let memory_prompt = memory_prompt.to_string();
            let budget = self.config.worker_timeout;
            handles.push(tokio::spawn(async move {
                tokio::time::timeout(budget, worker.run(&task, &memory_prompt)).await
            }));
        }

        let mut results = Vec::new();
        for (id, joined) in futures::future::join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(Ok(Ok(result))) => results.push(result),
                Ok(Ok(Err(e))) => warn!(worker_id = id, error = %e, "worker failed"),
                Ok(Err(_)) => warn!(worker_id = id, "worker timed out"),
                Err(e) => warn!(worker_id = id, error = %e, "worker task panicked"),
            }
        }
        // Arrival order must not depend on completion timing
        results.sort_by_key(|r| r.worker_id);
        results
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

//! End-to-end pipeline scenarios
//!
//! A scripted gateway and a content-keyed stub sandbox drive the full
//! solve path: retrieval, parallel workers, aggregation, refinement, and
//! the failure modes in between.
//!
//! Run with: cargo test --test pipeline_tests

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use crucible::error::{CrucibleError, Result};
use crucible::gateway::{CompletionRequest, InferenceGateway};
use crucible::memory::MemoryOrchestrator;
use crucible::sandbox::{ExecutionReport, ExecutionSandbox};
use crucible::types::{PipelineConfig, Task, TestCase};
use crucible::SolvePipeline;

/// Gateway whose behavior is a pure function of the request, so concurrent
/// workers always see deterministic replies.
struct RuleGateway {
    rules: Box<dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync>,
}

#[async_trait]
impl InferenceGateway for RuleGateway {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        (self.rules)(request)
    }
}

fn gateway<F>(rules: F) -> Arc<RuleGateway>
where
    F: Fn(&CompletionRequest) -> Result<String> + Send + Sync + 'static,
{
    Arc::new(RuleGateway {
        rules: Box::new(rules),
    })
}

/// Sandbox that passes exactly the code containing the marker "ok"
struct MarkerSandbox;

#[async_trait]
impl ExecutionSandbox for MarkerSandbox {
    async fn run(
        &self,
        code: &str,
        _tests: &[TestCase],
        _timeout: Duration,
    ) -> Result<ExecutionReport> {
        if code.contains("ok") {
            Ok(ExecutionReport {
                passed: true,
                output: "2\n".to_string(),
                error: None,
                failures: vec![],
            })
        } else {
            Ok(ExecutionReport {
                passed: false,
                output: String::new(),
                error: Some("IndexError: list index out of range".to_string()),
                failures: vec![],
            })
        }
    }
}

fn task() -> Task {
    Task::with_tests(
        "implement solve(x) returning x + 1",
        vec![TestCase {
            input: "solve(1)".to_string(),
            expected: "2".to_string(),
        }],
    )
}

fn is_generation(req: &CompletionRequest) -> bool {
    req.system
        .as_deref()
        .map(|s| s.starts_with("You are a careful programmer"))
        .unwrap_or(false)
        && !req.prompt.starts_with("The following solution")
}

fn is_evaluation(req: &CompletionRequest) -> bool {
    req.prompt.contains("0-25 rubric")
}

fn pipeline(
    gw: Arc<RuleGateway>,
    config: PipelineConfig,
) -> (SolvePipeline, Arc<MemoryOrchestrator>) {
    let memory = Arc::new(MemoryOrchestrator::open_in_memory().unwrap());
    (
        SolvePipeline::new(gw, Arc::new(MarkerSandbox), memory.clone(), config),
        memory,
    )
}

/// All workers verified with a good score: the refiner never runs and the
/// best-scoring verified candidate wins.
#[tokio::test]
async fn test_verified_high_score_skips_refiner() {
    let gw = gateway(|req| {
        if is_generation(req) {
            // Code content varies by temperature, all pass the sandbox
            Ok(match req.temperature {
                t if t < 0.4 => "```python\nok_a = 1\n```".to_string(),
                t if t < 0.6 => "```python\nok_b = 1\n```".to_string(),
                _ => "```python\nok_c = 1\n```".to_string(),
            })
        } else if is_evaluation(req) {
            Ok(if req.prompt.contains("ok_b") {
                "TOTAL: 20/25".to_string()
            } else {
                "TOTAL: 16/25".to_string()
            })
        } else {
            Ok("RULE: SKIP".to_string())
        }
    });

    let (pipeline, _memory) = pipeline(gw, PipelineConfig::default());
    let solution = pipeline.solve(task()).await.unwrap();

    assert!(solution.verified);
    assert_eq!(solution.score, 20);
    assert_eq!(solution.refine_iterations, 0);
    assert!(solution.candidate.solution.contains("ok_b"));
}

/// A verified low-score candidate beats unverified high scorers, and the
/// refiner then runs because the score is under the confidence threshold.
#[tokio::test]
async fn test_verified_low_score_beats_unverified_and_refines() {
    let gw = gateway(|req| {
        if is_generation(req) {
            Ok(match req.temperature {
                // Only the coolest worker produces passing code
                t if t < 0.4 => "```python\nok_modest = 1\n```".to_string(),
                _ => "```python\nbad = 1\n```".to_string(),
            })
        } else if req.prompt.starts_with("The following solution") {
            // Repairs never fix the bad workers
            Ok("```python\nbad = 2\n```".to_string())
        } else if is_evaluation(req) {
            Ok(if req.prompt.contains("ok_modest") {
                "TOTAL: 19/25".to_string()
            } else {
                "TOTAL: 24/25".to_string()
            })
        } else {
            Ok("RULE: SKIP".to_string())
        }
    });

    let (pipeline, _memory) = pipeline(gw, PipelineConfig::default());
    let solution = pipeline.solve(task()).await.unwrap();

    // The unverified 24-scorers lost to the verified candidate, and the
    // partially-verified pool forced the refiner to run
    assert!(solution.verified);
    assert!(solution.candidate.solution.contains("ok_modest"));
    // First refiner evaluation already clears the acceptable threshold
    assert_eq!(solution.refine_iterations, 0);
    assert_eq!(solution.score, 19);
}

/// Every worker failing is the one fatal aggregation case.
#[tokio::test]
async fn test_all_workers_failing_is_fatal() {
    let gw = gateway(|_req| Err(CrucibleError::Gateway("endpoint down".to_string())));

    let (pipeline, _memory) = pipeline(gw, PipelineConfig::default());
    let err = pipeline.solve(task()).await.unwrap_err();

    assert!(matches!(err, CrucibleError::NoCandidates(_)));
    assert_eq!(err.reason_code(), "generation_failed");
}

/// An unverified winner that never improves exhausts the iteration budget
/// and comes back with the best score seen, not the last.
#[tokio::test]
async fn test_refine_bounded_and_keeps_best() {
    let gw = gateway(|req| {
        if is_generation(req) {
            Ok("```python\nbad = 1\n```".to_string())
        } else if req.prompt.starts_with("The following solution") {
            Ok("```python\nbad = 2\n```".to_string())
        } else if req.prompt.contains("Produce an improved solution") {
            // Refinements keep producing failing code
            Ok("```python\nbad = 3\n```".to_string())
        } else if is_evaluation(req) {
            // First refiner evaluation is the high-water mark
            Ok(if req.prompt.contains("bad = 3") {
                "TOTAL: 6/25".to_string()
            } else {
                "TOTAL: 11/25".to_string()
            })
        } else {
            Ok("RULE: SKIP".to_string())
        }
    });

    let (pipeline, _memory) = pipeline(gw, PipelineConfig::default());
    let solution = pipeline.solve(task()).await.unwrap();

    assert_eq!(solution.refine_iterations, 3);
    assert_eq!(solution.score, 11);
    assert!(!solution.verified);
}

/// A task with no test cases still flows end to end, just unverified.
#[tokio::test]
async fn test_task_without_tests_is_never_verified() {
    let gw = gateway(|req| {
        if is_generation(req) {
            Ok("```python\nok = 1\n```".to_string())
        } else if is_evaluation(req) {
            Ok("TOTAL: 23/25".to_string())
        } else {
            Ok("RULE: SKIP".to_string())
        }
    });

    let (pipeline, _memory) = pipeline(gw, PipelineConfig::default());
    let solution = pipeline
        .solve(Task::new("describe an approach to parsing logs"))
        .await
        .unwrap();

    assert!(!solution.verified);
    // Unverified, so the refiner ran and early-stopped at 23
    assert_eq!(solution.refine_iterations, 0);
    assert_eq!(solution.score, 23);
}

/// Sessions feed memory: a solved task leaves lessons behind that the next
/// retrieval can surface.
#[tokio::test]
async fn test_session_learning_reaches_the_store() {
    let gw = gateway(|req| {
        if is_generation(req) {
            Ok("```python\nok = 1\n```".to_string())
        } else if is_evaluation(req) {
            Ok("TOTAL: 16/25".to_string())
        } else if req.prompt.contains("Extract ONE actionable") {
            Ok("RULE: When computing [value], add explicit bounds checks first".to_string())
        } else {
            Ok("```python\nok = 1\n```".to_string())
        }
    });

    let (pipeline, memory) = pipeline(gw, PipelineConfig::default());
    pipeline.solve(task()).await.unwrap();

    // The learner runs in the background; give the writer a moment to drain
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let stats = memory.store().stats().unwrap();
        if stats.total_memories > 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "learner never wrote a lesson"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let all = memory.store().all().unwrap();
    assert!(all
        .iter()
        .any(|m| m.lesson.contains("bounds checks")));
}

//! The solve pipeline
//!
//! Parallel candidate workers, deterministic aggregation, the self-refine
//! loop, and the session learner, tied together by `SolvePipeline`.

pub mod aggregator;
pub mod learner;
pub mod refiner;
pub mod runner;
pub mod worker;

pub use aggregator::select_winner;
pub use learner::SessionLearner;
pub use refiner::{RefineOutcome, SelfRefiner};
pub use runner::SolvePipeline;
pub use worker::CandidateWorker;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::MAX_SCORE;

static CODE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:python|py)?\s*\n([\s\S]*?)```").expect("valid regex"));

static SCORE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(?i)TOTAL[:\s]+(\d+)\s*/\s*25", r"(\d+)\s*/\s*25"]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
});

/// Pull the first fenced code block out of a completion
pub(crate) fn extract_code(text: &str) -> Option<String> {
    CODE_BLOCK
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|code| !code.is_empty())
}

/// Pull a 0-25 rubric score out of evaluation feedback
///
/// Looks for "TOTAL: n/25" first, then any "n/25"; anything unparseable
/// scores 0 so a malformed evaluation never inflates a candidate.
pub(crate) fn extract_score(feedback: &str) -> u8 {
    for pattern in SCORE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(feedback) {
            if let Some(m) = caps.get(1) {
                if let Ok(score) = m.as_str().parse::<u8>() {
                    return score.min(MAX_SCORE);
                }
            }
        }
    }
    0
}

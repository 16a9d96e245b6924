//! Deterministic candidate selection
//!
//! Verified candidates always beat unverified ones regardless of score;
//! within a tier higher scores win; full ties go to the result that was
//! seen first. No synthesis call, no randomness: the same input set always
//! selects the same winner.

use tracing::info;

use crate::error::{CrucibleError, Result};
use crate::types::WorkerResult;

/// Pick the winning result from what the workers produced
///
/// An empty set is fatal for the whole task; there is nothing sensible to
/// refine or return.
pub fn select_winner(mut results: Vec<WorkerResult>) -> Result<WorkerResult> {
    if results.is_empty() {
        return Err(CrucibleError::NoCandidates(
            "all workers failed or timed out".to_string(),
        ));
    }

    let verified_count = results.iter().filter(|r| r.candidate.verified).count();

    // Stable sort preserves first-seen order on full ties
    results.sort_by(|a, b| {
        b.candidate
            .verified
            .cmp(&a.candidate.verified)
            .then(b.candidate.score.cmp(&a.candidate.score))
    });

    let winner = results.swap_remove(0);
    info!(
        worker_id = winner.worker_id,
        verified = winner.candidate.verified,
        score = winner.candidate.score,
        verified_count,
        total = results.len() + 1,
        "winner selected"
    );
    Ok(winner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candidate;
    use std::time::Duration;

    fn result(worker_id: usize, verified: bool, score: u8) -> WorkerResult {
        WorkerResult {
            worker_id,
            candidate: Candidate {
                solution: format!("solution {}", worker_id),
                code: None,
                temperature: 0.5,
                verified,
                score,
                error_summary: None,
            },
            attempts: 1,
            elapsed: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_empty_set_is_fatal() {
        let err = select_winner(vec![]).unwrap_err();
        assert!(matches!(err, CrucibleError::NoCandidates(_)));
        assert_eq!(err.reason_code(), "generation_failed");
    }

    #[test]
    fn test_verified_beats_higher_unverified_score() {
        let winner = select_winner(vec![
            result(0, false, 24),
            result(1, true, 10),
        ])
        .unwrap();
        assert_eq!(winner.worker_id, 1);
    }

    #[test]
    fn test_score_breaks_ties_within_tier() {
        let winner = select_winner(vec![
            result(0, true, 12),
            result(1, true, 19),
            result(2, false, 25),
        ])
        .unwrap();
        assert_eq!(winner.worker_id, 1);
    }

    #[test]
    fn test_full_tie_goes_to_first_seen() {
        let winner = select_winner(vec![
            result(2, true, 20),
            result(0, true, 20),
            result(1, true, 20),
        ])
        .unwrap();
        assert_eq!(winner.worker_id, 2);
    }

    #[test]
    fn test_single_result_wins() {
        let winner = select_winner(vec![result(7, false, 0)]).unwrap();
        assert_eq!(winner.worker_id, 7);
    }
}

//! Session learner
//!
//! Runs after a task completes, off the critical path: extracts generalized
//! lessons from the session, promotes reflection-buffer entries, feeds
//! reinforcement back to every memory the session used, and links the new
//! lessons together. All writes go through the memory writer.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::gateway::{CompletionRequest, InferenceGateway};
use crate::memory::{category, MemoryWriter};
use crate::types::{
    CreateMemoryInput, MemoryId, MemorySource, ReflectionEntry, SessionRecord,
};

/// Sessions at or above this final score count as wins for reinforcement
const HELPED_SCORE: u8 = 15;
/// Lesson extraction is skipped for clean high-scoring sessions
const SKIP_EXTRACTION_SCORE: u8 = 22;

const ANALYSIS_TEMPERATURE: f64 = 0.3;

pub struct SessionLearner {
    gateway: Arc<dyn InferenceGateway>,
    writer: MemoryWriter,
}

impl SessionLearner {
    pub fn new(gateway: Arc<dyn InferenceGateway>, writer: MemoryWriter) -> Self {
        Self { gateway, writer }
    }

    /// Digest a finished session into durable memory
    pub async fn learn(
        &self,
        record: &SessionRecord,
        reflections: &[ReflectionEntry],
    ) -> Result<Vec<MemoryId>> {
        // Reinforce everything the session retrieved
        let helped = record.final_candidate.verified && record.final_score >= HELPED_SCORE;
        for &id in &record.memories_used {
            if let Err(e) = self.writer.reinforce(id, helped).await {
                warn!(memory_id = id, error = %e, "reinforcement failed");
            }
        }

        let mut new_ids = Vec::new();

        // Promote session reflections: errors worth remembering across tasks
        for entry in reflections {
            let keywords = category::fallback_keywords(&entry.lesson);
            let id = self
                .writer
                .learn(CreateMemoryInput {
                    lesson: entry.lesson.clone(),
                    category: record.category,
                    importance: Some(7.0),
                    keywords,
                    source: MemorySource::Failure,
                    error_type: Some(entry.error_type.clone()),
                })
                .await?;
            new_ids.push(id);
        }

        // Extract a generalized lesson, unless the session was a clean win
        if record.final_score >= SKIP_EXTRACTION_SCORE && record.iterations.len() <= 1 {
            debug!(
                score = record.final_score,
                "clean session, skipping lesson extraction"
            );
        } else {
            for lesson in self.extract_lessons(record).await {
                let keywords = category::fallback_keywords(&lesson);
                let source = if helped {
                    MemorySource::VerifiedSuccess
                } else {
                    MemorySource::Failure
                };
                let importance = if helped { 5.0 } else { 7.0 };
                let id = self
                    .writer
                    .learn(CreateMemoryInput {
                        lesson,
                        category: record.category,
                        importance: Some(importance),
                        keywords,
                        source,
                        error_type: None,
                    })
                    .await?;
                new_ids.push(id);
            }
        }

        // Lessons born from the same session are related
        for pair in new_ids.windows(2) {
            self.writer.strengthen(pair[0], pair[1]).await?;
        }

        info!(
            session_id = %record.session_id,
            lessons = new_ids.len(),
            reinforced = record.memories_used.len(),
            helped,
            "session digested"
        );
        Ok(new_ids)
    }

    /// One analysis call; gateway failure falls back to a heuristic lesson
    async fn extract_lessons(&self, record: &SessionRecord) -> Vec<String> {
        let prompt = self.analysis_prompt(record);
        match self
            .gateway
            .complete(&CompletionRequest::new(prompt, ANALYSIS_TEMPERATURE))
            .await
        {
            Ok(response) => parse_lessons(&response),
            Err(e) => {
                warn!(error = %e, "lesson extraction failed, using heuristic");
                heuristic_lesson(record).into_iter().collect()
            }
        }
    }

    fn analysis_prompt(&self, record: &SessionRecord) -> String {
        let outcome = if record.final_score >= 18 {
            "SUCCESS"
        } else if record.final_score >= 12 {
            "PARTIAL"
        } else {
            "FAIL"
        };
        let first_score = record.iterations.first().map(|i| i.score).unwrap_or(0);
        let error = record
            .final_candidate
            .error_summary
            .as_deref()
            .unwrap_or("None");

        format!(
            "Extract ONE actionable, GENERALIZED rule from this session.\n\n\
             TASK: {}\n\
             RESULT: {} (score {}->{}/25, {} iterations)\n\
             CATEGORY: {}\n\
             ERROR: {}\n\n\
             OUTPUT FORMAT (pick ONE):\n\
             RULE: When [general situation], do [general action]\n\
             AVOID: Don't [general mistake] because [reason]\n\n\
             The rule must apply to ANY similar task: use placeholders like \
             [file], [function], [input] instead of names from this task. \
             ONE sentence max. If the session was trivial, output: SKIP",
            truncate(&record.task.description, 300),
            outcome,
            first_score,
            record.final_score,
            record.iterations.len(),
            record.category.as_str(),
            truncate(error, 150),
        )
    }
}

/// Parse RULE:/AVOID:/bullet lessons out of the analysis response
fn parse_lessons(text: &str) -> Vec<String> {
    let mut lessons = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let lesson = if let Some(rest) = line.strip_prefix("RULE:") {
            rest.trim()
        } else if let Some(rest) = line.strip_prefix("AVOID:") {
            rest.trim()
        } else if let Some(rest) = line.strip_prefix('-').or_else(|| line.strip_prefix('*')) {
            rest.trim()
        } else {
            continue;
        };
        if lesson.eq_ignore_ascii_case("skip") {
            continue;
        }
        if lesson.len() > 15 && lesson.len() < 300 {
            lessons.push(lesson.to_string());
        }
    }
    lessons.truncate(2);
    lessons
}

/// Fallback when the gateway is unavailable
fn heuristic_lesson(record: &SessionRecord) -> Option<String> {
    if record.final_candidate.verified && record.final_score >= HELPED_SCORE {
        Some(format!(
            "For {} tasks like \"{}\", the verified approach scored {}/25",
            record.category.as_str(),
            truncate(&record.task.description, 80),
            record.final_score
        ))
    } else {
        record.final_candidate.error_summary.as_ref().map(|err| {
            format!(
                "For {} tasks, watch for: {}",
                record.category.as_str(),
                truncate(err, 120)
            )
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrucibleError;
    use crate::memory::MemoryOrchestrator;
    use crate::types::{Candidate, Category, Task};
    use async_trait::async_trait;
    use chrono::Utc;

    struct FixedGateway(Option<String>);

    #[async_trait]
    impl InferenceGateway for FixedGateway {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            match &self.0 {
                Some(reply) => Ok(reply.clone()),
                None => Err(CrucibleError::Gateway("offline".to_string())),
            }
        }
    }

    fn record(verified: bool, final_score: u8, memories_used: Vec<MemoryId>) -> SessionRecord {
        let candidate = Candidate {
            solution: "```python\ndef solve(x):\n    return x\n```".to_string(),
            code: Some("def solve(x):\n    return x".to_string()),
            temperature: 0.3,
            verified,
            score: final_score,
            error_summary: if verified {
                None
            } else {
                Some("IndexError: out of range".to_string())
            },
        };
        SessionRecord {
            session_id: uuid::Uuid::new_v4(),
            task: Task::new("parse the input and extract fields"),
            category: Category::Parsing,
            category_confidence: 0.4,
            memories_used,
            worker_results: vec![],
            iterations: vec![],
            final_candidate: candidate.clone(),
            final_score,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_lessons_formats() {
        let text = "RULE: When parsing [file], validate the header first\nnoise\n- always check bounds before indexing";
        let lessons = parse_lessons(text);
        assert_eq!(lessons.len(), 2);
        assert!(lessons[0].starts_with("When parsing"));
    }

    #[test]
    fn test_parse_lessons_skip() {
        assert!(parse_lessons("RULE: SKIP").is_empty());
        assert!(parse_lessons("RULE: too short").is_empty());
    }

    #[tokio::test]
    async fn test_successful_session_reinforces_positively() {
        let orch = MemoryOrchestrator::open_in_memory().unwrap();
        let writer = orch.writer();
        let id = writer
            .learn(CreateMemoryInput::new("existing lesson to reinforce"))
            .await
            .unwrap();

        let learner = SessionLearner::new(
            Arc::new(FixedGateway(Some(
                "RULE: When parsing [input], check it is not empty first".to_string(),
            ))),
            writer,
        );
        let new_ids = learner.learn(&record(true, 20, vec![id]), &[]).await.unwrap();

        assert_eq!(new_ids.len(), 1);
        let mem = orch.store().get(id).unwrap();
        assert_eq!(mem.success_count, 1);
        let new_mem = orch.store().get(new_ids[0]).unwrap();
        assert_eq!(new_mem.source, MemorySource::VerifiedSuccess);
    }

    #[tokio::test]
    async fn test_failed_session_reinforces_negatively() {
        let orch = MemoryOrchestrator::open_in_memory().unwrap();
        let writer = orch.writer();
        let id = writer
            .learn(CreateMemoryInput::new("existing lesson to reinforce"))
            .await
            .unwrap();

        let learner = SessionLearner::new(Arc::new(FixedGateway(None)), writer);
        learner.learn(&record(false, 8, vec![id]), &[]).await.unwrap();

        let mem = orch.store().get(id).unwrap();
        assert_eq!(mem.failure_count, 1);
    }

    #[tokio::test]
    async fn test_reflections_promoted_as_failure_memories() {
        let orch = MemoryOrchestrator::open_in_memory().unwrap();
        let learner = SessionLearner::new(Arc::new(FixedGateway(None)), orch.writer());

        let reflections = vec![ReflectionEntry {
            iteration: 1,
            error_type: "IndexError".to_string(),
            error_summary: "IndexError: out of range".to_string(),
            lesson: "Check collection bounds before accessing elements".to_string(),
        }];
        let ids = learner
            .learn(&record(false, 8, vec![]), &reflections)
            .await
            .unwrap();

        assert!(!ids.is_empty());
        let mem = orch.store().get(ids[0]).unwrap();
        assert_eq!(mem.source, MemorySource::Failure);
        assert_eq!(mem.error_type.as_deref(), Some("IndexError"));
        assert!((mem.importance - 7.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_clean_session_skips_extraction() {
        let orch = MemoryOrchestrator::open_in_memory().unwrap();
        // Gateway returning a lesson that must NOT be stored
        let learner = SessionLearner::new(
            Arc::new(FixedGateway(Some(
                "RULE: When everything works, do nothing different".to_string(),
            ))),
            orch.writer(),
        );
        let ids = learner.learn(&record(true, 24, vec![]), &[]).await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_sibling_lessons_get_linked() {
        let orch = MemoryOrchestrator::open_in_memory().unwrap();
        let writer = orch.writer();
        let learner = SessionLearner::new(Arc::new(FixedGateway(None)), writer.clone());

        let reflections = vec![
            ReflectionEntry {
                iteration: 1,
                error_type: "IndexError".to_string(),
                error_summary: "x".to_string(),
                lesson: "Check collection bounds before accessing elements".to_string(),
            },
            ReflectionEntry {
                iteration: 2,
                error_type: "TypeError".to_string(),
                error_summary: "y".to_string(),
                lesson: "Ensure types are compatible before operating on them".to_string(),
            },
        ];
        let ids = learner
            .learn(&record(false, 6, vec![]), &reflections)
            .await
            .unwrap();
        // includes the heuristic failure lesson as well
        assert!(ids.len() >= 2);

        // Drain the queued link writes
        writer.decay_tick().await.unwrap();
        assert!(orch.graph().weight(ids[0], ids[1]).unwrap().is_some());
    }
}

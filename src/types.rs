//! Core types for Crucible

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unique identifier for a memory
pub type MemoryId = i64;

/// Importance floor and ceiling for memories (1-10 scale)
pub const MIN_IMPORTANCE: f64 = 1.0;
pub const MAX_IMPORTANCE: f64 = 10.0;

/// Rubric ceiling for candidate evaluation scores
pub const MAX_SCORE: u8 = 25;

/// A persisted lesson in the memory store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier
    pub id: MemoryId,
    /// The lesson text itself
    pub lesson: String,
    /// Task category this lesson applies to
    pub category: Category,
    /// Current importance after decay (1.0 - 10.0)
    pub importance: f64,
    /// Importance before decay was applied, anchor for decay math
    pub base_importance: f64,
    /// Number of times retrieved
    #[serde(default)]
    pub access_count: i64,
    /// Times this lesson demonstrably helped an outcome
    #[serde(default)]
    pub success_count: i64,
    /// Times this lesson demonstrably hurt an outcome
    #[serde(default)]
    pub failure_count: i64,
    /// Keywords used for retrieval matching
    #[serde(default)]
    pub keywords: Vec<String>,
    /// How the lesson entered the store
    #[serde(default)]
    pub source: MemorySource,
    /// Error class the lesson was extracted from, if any
    pub error_type: Option<String>,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last retrieved
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl Memory {
    /// Fraction of reinforcements that were successes (0.5 with no data)
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.5
        } else {
            self.success_count as f64 / total as f64
        }
    }
}

/// How a memory entered the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    /// Extracted by the session learner from a refined session
    #[default]
    Refinement,
    /// Extracted from a failed session or execution error
    Failure,
    /// Success pattern harvested from a verified candidate
    VerifiedSuccess,
    /// Added by hand through the curation interface
    Curated,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::Refinement => "refinement",
            MemorySource::Failure => "failure",
            MemorySource::VerifiedSuccess => "verified_success",
            MemorySource::Curated => "curated",
        }
    }
}

impl std::str::FromStr for MemorySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "refinement" => Ok(MemorySource::Refinement),
            "failure" => Ok(MemorySource::Failure),
            "verified_success" => Ok(MemorySource::VerifiedSuccess),
            "curated" => Ok(MemorySource::Curated),
            _ => Err(format!("Unknown memory source: {}", s)),
        }
    }
}

/// Task category detected from keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Writing new code or functions
    CodeGeneration,
    /// Creating or writing files
    FileCreate,
    /// Reading or inspecting files
    FileRead,
    /// Parsing, extraction, text transformation
    Parsing,
    /// Analysis, debugging, error diagnosis
    Debugging,
    /// Data aggregation and computation
    DataAnalysis,
    /// No category matched with enough confidence
    #[default]
    General,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::CodeGeneration => "code_generation",
            Category::FileCreate => "file_create",
            Category::FileRead => "file_read",
            Category::Parsing => "parsing",
            Category::Debugging => "debugging",
            Category::DataAnalysis => "data_analysis",
            Category::General => "general",
        }
    }

    pub fn all() -> &'static [Category] {
        &[
            Category::CodeGeneration,
            Category::FileCreate,
            Category::FileRead,
            Category::Parsing,
            Category::Debugging,
            Category::DataAnalysis,
            Category::General,
        ]
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "code_generation" => Ok(Category::CodeGeneration),
            "file_create" => Ok(Category::FileCreate),
            "file_read" => Ok(Category::FileRead),
            "parsing" => Ok(Category::Parsing),
            "debugging" => Ok(Category::Debugging),
            "data_analysis" => Ok(Category::DataAnalysis),
            "general" => Ok(Category::General),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

/// Undirected weighted edge between two memories
///
/// Stored with `a < b` canonical ordering; weight stays in [0, 1] and is
/// only moved by clamped strengthen/weaken steps, never set directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLink {
    pub a: MemoryId,
    pub b: MemoryId,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a new memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMemoryInput {
    pub lesson: String,
    #[serde(default)]
    pub category: Category,
    /// Importance on the 1-10 scale (clamped on write)
    pub importance: Option<f64>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub source: MemorySource,
    pub error_type: Option<String>,
}

impl CreateMemoryInput {
    pub fn new(lesson: impl Into<String>) -> Self {
        Self {
            lesson: lesson.into(),
            category: Category::General,
            importance: None,
            keywords: Vec::new(),
            source: MemorySource::Refinement,
            error_type: None,
        }
    }
}

/// One test assertion a candidate must satisfy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Expression handed to the sandbox, e.g. `solve("abc")`
    pub input: String,
    /// Expected printed/returned value
    pub expected: String,
}

/// A task submitted to the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub description: String,
    /// Known test cases; empty means no execution verification is possible
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            test_cases: Vec::new(),
        }
    }

    pub fn with_tests(description: impl Into<String>, test_cases: Vec<TestCase>) -> Self {
        Self {
            description: description.into(),
            test_cases,
        }
    }
}

/// One generated solution attempt, immutable once produced
///
/// Refinement supersedes a candidate by producing a new one; nothing
/// mutates a candidate after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Full solution text as returned by the gateway
    pub solution: String,
    /// Code block extracted from the solution, if any
    pub code: Option<String>,
    /// Sampling temperature that produced this candidate
    pub temperature: f64,
    /// Passed all known test cases under sandboxed execution
    pub verified: bool,
    /// Rubric score 0-25 (0 when unscored)
    pub score: u8,
    /// Summary of the execution error when verification failed
    pub error_summary: Option<String>,
}

/// A candidate wrapped with worker identity and cost accounting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub worker_id: usize,
    pub candidate: Candidate,
    /// Generation attempts consumed (1 = no repair retries needed)
    pub attempts: u32,
    /// Wall time spent in this worker
    pub elapsed: Duration,
}

/// One evaluate/refine iteration inside the self-refine loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub candidate: Candidate,
    pub score: u8,
    pub feedback: String,
}

/// Full record of one pipeline session, archived read-only at task end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: uuid::Uuid,
    pub task: Task,
    pub category: Category,
    pub category_confidence: f64,
    /// Memories retrieved for this session (read-only snapshot)
    pub memories_used: Vec<MemoryId>,
    /// Worker results as they arrived
    pub worker_results: Vec<WorkerResult>,
    /// Refine loop history, first entry is the initial evaluation
    pub iterations: Vec<IterationRecord>,
    pub final_candidate: Candidate,
    pub final_score: u8,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Session-scoped error-to-lesson mapping, never persisted directly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionEntry {
    pub iteration: u32,
    pub error_type: String,
    pub error_summary: String,
    pub lesson: String,
}

/// The result returned to the caller for a completed task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub candidate: Candidate,
    pub score: u8,
    pub verified: bool,
    /// REFINE transitions performed (0 when the refiner was skipped)
    pub refine_iterations: u32,
    pub category: Category,
    pub session_id: uuid::Uuid,
}

/// Statistics about the memory store
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub total_memories: i64,
    pub total_links: i64,
    pub avg_importance: f64,
    pub below_floor: i64,
}

/// Configuration for the memory subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Path to the SQLite database (":memory:" for tests)
    pub db_path: String,
    /// Daily importance decay multiplier
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f64,
    /// Memories whose decayed importance falls below this are ignored by retrieval
    #[serde(default = "default_retrieval_floor")]
    pub retrieval_floor: f64,
    /// Fixed step applied by link strengthen/weaken
    #[serde(default = "default_link_step")]
    pub link_step: f64,
    /// How many memories a retrieval returns
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Candidate pool size considered before ranking
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

fn default_decay_factor() -> f64 {
    0.98
}

fn default_retrieval_floor() -> f64 {
    1.5
}

fn default_link_step() -> f64 {
    0.08
}

fn default_top_k() -> usize {
    5
}

fn default_max_candidates() -> usize {
    50
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            decay_factor: default_decay_factor(),
            retrieval_floor: default_retrieval_floor(),
            link_step: default_link_step(),
            top_k: default_top_k(),
            max_candidates: default_max_candidates(),
        }
    }
}

/// Configuration for the solve pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// One worker per temperature; the small fixed set creates diversity
    /// without destabilizing a small model
    #[serde(default = "default_worker_temperatures")]
    pub worker_temperatures: Vec<f64>,
    /// Local repair attempts a worker may spend on verification failures
    #[serde(default = "default_max_verify_retries")]
    pub max_verify_retries: u32,
    /// Maximum REFINE transitions in the self-refine loop
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Score at which refinement stops as acceptable
    #[serde(default = "default_refine_threshold")]
    pub refine_threshold: u8,
    /// Score at which refinement stops immediately
    #[serde(default = "default_early_stop_threshold")]
    pub early_stop_threshold: u8,
    /// When every worker verified and the winner is at or above this score,
    /// the refiner is skipped entirely
    #[serde(default = "default_high_confidence_threshold")]
    pub high_confidence_threshold: u8,
    /// Temperature for refinement calls (deliberately narrow search)
    #[serde(default = "default_refine_temperature")]
    pub refine_temperature: f64,
    /// Per-worker wall-clock budget; a worker past this is failed, not awaited
    #[serde(default = "default_worker_timeout", with = "duration_secs")]
    pub worker_timeout: Duration,
    /// Time budget handed to the sandbox per execution
    #[serde(default = "default_execution_timeout", with = "duration_secs")]
    pub execution_timeout: Duration,
}

fn default_worker_temperatures() -> Vec<f64> {
    vec![0.3, 0.5, 0.7]
}

fn default_max_verify_retries() -> u32 {
    2
}

fn default_max_iterations() -> u32 {
    3
}

fn default_refine_threshold() -> u8 {
    18
}

fn default_early_stop_threshold() -> u8 {
    22
}

fn default_high_confidence_threshold() -> u8 {
    15
}

fn default_refine_temperature() -> f64 {
    0.2
}

fn default_worker_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_execution_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_temperatures: default_worker_temperatures(),
            max_verify_retries: default_max_verify_retries(),
            max_iterations: default_max_iterations(),
            refine_threshold: default_refine_threshold(),
            early_stop_threshold: default_early_stop_threshold(),
            high_confidence_threshold: default_high_confidence_threshold(),
            refine_temperature: default_refine_temperature(),
            worker_timeout: default_worker_timeout(),
            execution_timeout: default_execution_timeout(),
        }
    }
}

/// Configuration for the completion gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// OpenAI-compatible API base URL
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-request timeout
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,
    /// Transient failures retried this many times with exponential backoff
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles per retry (1s, 2s, 4s, ...)
    #[serde(default = "default_backoff_base", with = "duration_secs")]
    pub backoff_base: Duration,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> Duration {
    Duration::from_secs(1)
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            model: "local".to_string(),
            api_key: None,
            max_tokens: default_max_tokens(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
        }
    }
}

/// Serialize Durations as whole seconds in config files
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

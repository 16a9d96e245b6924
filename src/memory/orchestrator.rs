//! Memory orchestrator: ranked retrieval and the serialized write path
//!
//! Reads are snapshots taken directly against the store. Every mutation
//! (new lessons, reinforcement, link updates, decay, imports) goes through
//! one writer task draining an mpsc queue, so concurrent sessions can never
//! interleave partial updates. The store's WAL transactions cover the
//! cross-process case.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{CrucibleError, Result};
use crate::types::{
    Category, CreateMemoryInput, Memory, MemoryConfig, MemoryId, MemorySource,
};

use super::category;
use super::graph::MemoryGraph;
use super::store::{DecayReport, ImportMode, MemoryExport, MemoryStore};

/// Composite ranking weights
const W_KEYWORD: f64 = 0.30;
const W_IMPORTANCE: f64 = 0.20;
const W_ACCESS: f64 = 0.10;
const W_DECAY: f64 = 0.10;
const W_SUCCESS: f64 = 0.15;
const W_CENTRALITY: f64 = 0.15;

/// Everything a session needs from memory, snapshotted at task start
#[derive(Debug, Clone)]
pub struct RetrievalBundle {
    pub category: Category,
    pub confidence: f64,
    pub memories: Vec<Memory>,
    pub suggested_tools: Vec<&'static str>,
    pub context_hint: Option<String>,
}

impl RetrievalBundle {
    /// Render the bundle as a prompt addition, empty when nothing applies
    pub fn to_prompt(&self) -> String {
        let mut parts = Vec::new();
        if let Some(hint) = &self.context_hint {
            parts.push(hint.clone());
        }
        if !self.memories.is_empty() {
            let mut lines = vec!["## RELEVANT LESSONS FROM MEMORY:".to_string()];
            for mem in &self.memories {
                lines.push(format!("- [{}] {}", mem.category.as_str(), mem.lesson));
            }
            parts.push(lines.join("\n"));
        }
        parts.join("\n\n")
    }

    pub fn memory_ids(&self) -> Vec<MemoryId> {
        self.memories.iter().map(|m| m.id).collect()
    }
}

/// Mutations accepted by the writer task
enum WriteRequest {
    Learn {
        input: CreateMemoryInput,
        reply: oneshot::Sender<Result<MemoryId>>,
    },
    Reinforce {
        id: MemoryId,
        helped: bool,
        reply: oneshot::Sender<Result<Memory>>,
    },
    Touch {
        id: MemoryId,
    },
    Strengthen {
        a: MemoryId,
        b: MemoryId,
    },
    Weaken {
        a: MemoryId,
        b: MemoryId,
    },
    DecayTick {
        reply: oneshot::Sender<Result<DecayReport>>,
    },
    Import {
        doc: Box<MemoryExport>,
        mode: ImportMode,
        reply: oneshot::Sender<Result<usize>>,
    },
}

/// Handle to the writer task; cheap to clone, one per session is typical
#[derive(Clone)]
pub struct MemoryWriter {
    sender: mpsc::Sender<WriteRequest>,
}

impl MemoryWriter {
    async fn send(&self, request: WriteRequest) -> Result<()> {
        self.sender
            .send(request)
            .await
            .map_err(|_| CrucibleError::WriterClosed)
    }

    /// Persist a new lesson and return its id
    pub async fn learn(&self, input: CreateMemoryInput) -> Result<MemoryId> {
        let (reply, rx) = oneshot::channel();
        self.send(WriteRequest::Learn { input, reply }).await?;
        rx.await.map_err(|_| CrucibleError::WriterClosed)?
    }

    /// Add a hand-written lesson with chosen importance and category
    pub async fn curate(
        &self,
        lesson: impl Into<String>,
        category: Category,
        importance: f64,
    ) -> Result<MemoryId> {
        let lesson = lesson.into();
        let keywords = category::fallback_keywords(&lesson);
        self.learn(CreateMemoryInput {
            lesson,
            category,
            importance: Some(importance),
            keywords,
            source: MemorySource::Curated,
            error_type: None,
        })
        .await
    }

    /// Feed back whether a retrieved memory helped the session outcome
    pub async fn reinforce(&self, id: MemoryId, helped: bool) -> Result<Memory> {
        let (reply, rx) = oneshot::channel();
        self.send(WriteRequest::Reinforce { id, helped, reply }).await?;
        rx.await.map_err(|_| CrucibleError::WriterClosed)?
    }

    /// Record a retrieval; failures are logged by the writer, not returned
    pub async fn touch(&self, id: MemoryId) -> Result<()> {
        self.send(WriteRequest::Touch { id }).await
    }

    /// Strengthen (or lazily create) the link between two memories
    pub async fn strengthen(&self, a: MemoryId, b: MemoryId) -> Result<()> {
        self.send(WriteRequest::Strengthen { a, b }).await
    }

    /// Weaken the link between two memories
    pub async fn weaken(&self, a: MemoryId, b: MemoryId) -> Result<()> {
        self.send(WriteRequest::Weaken { a, b }).await
    }

    /// Run a decay pass over the whole store
    pub async fn decay_tick(&self) -> Result<DecayReport> {
        let (reply, rx) = oneshot::channel();
        self.send(WriteRequest::DecayTick { reply }).await?;
        rx.await.map_err(|_| CrucibleError::WriterClosed)?
    }

    /// Load an export document through the serialized path
    pub async fn import(&self, doc: MemoryExport, mode: ImportMode) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(WriteRequest::Import {
            doc: Box::new(doc),
            mode,
            reply,
        })
        .await?;
        rx.await.map_err(|_| CrucibleError::WriterClosed)?
    }
}

/// Memory subsystem facade: snapshot reads plus the writer handle
pub struct MemoryOrchestrator {
    store: MemoryStore,
    graph: MemoryGraph,
    writer: MemoryWriter,
}

impl MemoryOrchestrator {
    /// Open the store and spawn the writer task
    pub fn open(config: MemoryConfig) -> Result<Self> {
        let store = MemoryStore::open(config)?;
        Ok(Self::with_store(store))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_store(MemoryStore::open_in_memory()?))
    }

    fn with_store(store: MemoryStore) -> Self {
        let graph = MemoryGraph::new(store.clone());
        let writer = spawn_writer(store.clone(), graph.clone());
        Self {
            store,
            graph,
            writer,
        }
    }

    pub fn writer(&self) -> MemoryWriter {
        self.writer.clone()
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn graph(&self) -> &MemoryGraph {
        &self.graph
    }

    /// Retrieve the top lessons for a task
    ///
    /// Detects the category, ranks the candidate pool with the composite
    /// score, and returns a read-only snapshot. Access bumps and lazy
    /// co-retrieval links are queued through the writer; the snapshot the
    /// caller holds never changes underneath it.
    pub async fn retrieve(&self, task: &str) -> Result<RetrievalBundle> {
        let (detected, confidence) = category::detect(task);
        let pool = self.store.candidates(detected)?;
        let top_k = self.store.config().top_k;

        let centrality: std::collections::HashMap<MemoryId, f64> = self
            .graph
            .central_memories(20)
            .unwrap_or_default()
            .into_iter()
            .collect();

        let query_words: std::collections::HashSet<String> = task
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let mut scored: Vec<(f64, Memory)> = pool
            .into_iter()
            .map(|mem| {
                let score = composite_score(&mem, &query_words, &centrality);
                (score, mem)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let memories: Vec<Memory> = scored
            .into_iter()
            .take(top_k)
            .map(|(_, mem)| mem)
            .collect();

        for mem in &memories {
            self.writer.touch(mem.id).await?;
        }
        // Lessons retrieved together are probably related; let the link
        // weights learn that over repeated co-retrievals.
        for pair in memories.windows(2) {
            self.writer.strengthen(pair[0].id, pair[1].id).await?;
        }

        debug!(
            category = detected.as_str(),
            confidence,
            retrieved = memories.len(),
            "memory retrieval"
        );

        Ok(RetrievalBundle {
            category: detected,
            confidence,
            memories,
            suggested_tools: category::suggested_tools(task),
            context_hint: category::context_hint(detected),
        })
    }
}

/// Composite ranking per memory: keyword overlap, importance, access
/// frequency, decay survival, success rate, and graph centrality.
fn composite_score(
    mem: &Memory,
    query_words: &std::collections::HashSet<String>,
    centrality: &std::collections::HashMap<MemoryId, f64>,
) -> f64 {
    let lesson_words: std::collections::HashSet<String> = mem
        .lesson
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let keyword_hits = mem
        .keywords
        .iter()
        .filter(|kw| query_words.contains(kw.as_str()))
        .count();
    let overlap = query_words.intersection(&lesson_words).count() + keyword_hits;
    let semantic = (overlap as f64 * 0.15).min(1.0);

    let importance = mem.importance / 10.0;
    let access = ((mem.access_count as f64 + 1.0).powf(0.3) / 3.0).min(1.0);
    let decay = if mem.base_importance > 0.0 {
        (mem.importance / mem.base_importance).min(1.0)
    } else {
        1.0
    };
    let success = mem.success_rate();
    // PageRank mass concentrates in small graphs; scale up but cap at 1.0
    // so centrality stays one vote among six, like the other terms.
    let central = (centrality.get(&mem.id).copied().unwrap_or(0.0) * 10.0).min(1.0);

    semantic * W_KEYWORD
        + importance * W_IMPORTANCE
        + access * W_ACCESS
        + decay * W_DECAY
        + success * W_SUCCESS
        + central * W_CENTRALITY
}

/// Spawn the writer task and return its handle
///
/// The task drains requests in arrival order. Requests without a reply
/// channel log failures instead of surfacing them; callers that need the
/// outcome use the replying variants.
fn spawn_writer(store: MemoryStore, graph: MemoryGraph) -> MemoryWriter {
    let (sender, mut receiver) = mpsc::channel::<WriteRequest>(256);
    let link_step = store.config().link_step;

    tokio::spawn(async move {
        info!("memory writer task started");
        while let Some(request) = receiver.recv().await {
            match request {
                WriteRequest::Learn { input, reply } => {
                    let _ = reply.send(store.create(input));
                }
                WriteRequest::Reinforce { id, helped, reply } => {
                    let _ = reply.send(store.reinforce(id, helped));
                }
                WriteRequest::Touch { id } => {
                    if let Err(e) = store.touch(id) {
                        warn!(memory_id = id, error = %e, "touch failed");
                    }
                }
                WriteRequest::Strengthen { a, b } => {
                    if let Err(e) = graph.strengthen(a, b, link_step) {
                        warn!(a, b, error = %e, "strengthen failed");
                    }
                }
                WriteRequest::Weaken { a, b } => {
                    if let Err(e) = graph.weaken(a, b, link_step) {
                        warn!(a, b, error = %e, "weaken failed");
                    }
                }
                WriteRequest::DecayTick { reply } => {
                    let _ = reply.send(store.run_decay());
                }
                WriteRequest::Import { doc, mode, reply } => {
                    let _ = reply.send(store.import(&doc, mode));
                }
            }
        }
        info!("memory writer task stopped");
    });

    MemoryWriter { sender }
}

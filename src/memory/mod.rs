//! Persistent memory subsystem
//!
//! A durable map of decaying, scored lessons (`store`), a weighted
//! relationship graph over them (`graph`), keyword category detection
//! (`category`), a session-scoped reflection buffer (`reflection`), and the
//! orchestrator that ties retrieval and the serialized write path together.

pub mod category;
pub mod graph;
pub mod orchestrator;
pub mod reflection;
pub mod store;

pub use graph::{GraphStats, MemoryGraph};
pub use orchestrator::{MemoryOrchestrator, MemoryWriter, RetrievalBundle};
pub use reflection::ReflectionBuffer;
pub use store::{DecayReport, ImportMode, MemoryExport, MemoryStore};

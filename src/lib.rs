//! Crucible - Self-Improving Solve Pipeline
//!
//! Parallel candidate workers, deterministic aggregation, a self-refine
//! loop, and a persistent memory subsystem that makes each session a little
//! smarter than the last.

pub mod error;
pub mod gateway;
pub mod memory;
pub mod pipeline;
pub mod sandbox;
pub mod types;

pub use error::{CrucibleError, Result};
pub use memory::{MemoryOrchestrator, MemoryStore, MemoryWriter};
pub use pipeline::SolvePipeline;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing from `RUST_LOG`; safe to call more than once
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

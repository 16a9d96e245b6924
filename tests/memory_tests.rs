//! Memory subsystem invariants
//!
//! Property tests for the bounded quantities (importance, link weights) and
//! integration tests for decay, persistence across reopen, and the
//! serialized write path under contention.
//!
//! Run with: cargo test --test memory_tests

use proptest::prelude::*;

use crucible::memory::{ImportMode, MemoryGraph, MemoryOrchestrator, MemoryStore};
use crucible::types::{Category, CreateMemoryInput, MemoryConfig};

fn mem_store() -> MemoryStore {
    MemoryStore::open_in_memory().unwrap()
}

fn add(store: &MemoryStore, lesson: &str) -> i64 {
    store.create(CreateMemoryInput::new(lesson)).unwrap()
}

mod importance_bounds {
    use super::*;

    proptest! {
        /// Invariant: any reinforcement sequence keeps importance in [1, 10]
        #[test]
        fn reinforcement_stays_bounded(outcomes in prop::collection::vec(any::<bool>(), 0..40)) {
            let store = mem_store();
            let id = add(&store, "bounded lesson");
            for helped in outcomes {
                let mem = store.reinforce(id, helped).unwrap();
                prop_assert!(mem.importance >= 1.0);
                prop_assert!(mem.importance <= 10.0);
            }
        }

        /// Invariant: created importance is clamped into [1, 10]
        #[test]
        fn create_clamps_importance(importance in -100.0f64..100.0) {
            let store = mem_store();
            let mut input = CreateMemoryInput::new("clamped lesson");
            input.importance = Some(importance);
            let id = store.create(input).unwrap();
            let mem = store.get(id).unwrap();
            prop_assert!(mem.importance >= 1.0);
            prop_assert!(mem.importance <= 10.0);
        }
    }
}

mod decay {
    use super::*;
    use chrono::Utc;
    use rusqlite::params;

    fn backdate(store: &MemoryStore, id: i64, days: i64) {
        store
            .connection()
            .execute(
                "UPDATE memories SET created_at = ?2 WHERE id = ?1",
                params![id, (Utc::now() - chrono::Duration::days(days)).to_rfc3339()],
            )
            .unwrap();
    }

    proptest! {
        /// Invariant: decayed importance equals base * 0.98^days, floored at 1
        #[test]
        fn decay_follows_the_curve(days in 1i64..400, base in 1.0f64..10.0) {
            let store = mem_store();
            let mut input = CreateMemoryInput::new("decaying lesson");
            input.importance = Some(base);
            let id = store.create(input).unwrap();
            backdate(&store, id, days);

            store.run_decay().unwrap();
            let mem = store.get(id).unwrap();
            let expected = (base * 0.98f64.powi(days as i32)).clamp(1.0, 10.0);
            prop_assert!((mem.importance - expected).abs() < 1e-9);
            // Never deleted, base anchor untouched
            prop_assert!((mem.base_importance - base).abs() < 1e-9);
        }
    }

    #[test]
    fn low_success_rate_accelerates_decay() {
        let store = mem_store();
        let id = add(&store, "unreliable lesson");
        // 1 success, 3 failures: enough data for the adjustment to kick in
        store.reinforce(id, true).unwrap();
        for _ in 0..3 {
            store.reinforce(id, false).unwrap();
        }
        let base = store.get(id).unwrap().base_importance;
        backdate(&store, id, 5);

        store.run_decay().unwrap();
        let mem = store.get(id).unwrap();
        let plain = (base * 0.98f64.powi(5)).clamp(1.0, 10.0);
        assert!(mem.importance < plain);
    }
}

mod link_weights {
    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        Strengthen,
        Weaken,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Strengthen), Just(Op::Weaken)]
    }

    proptest! {
        /// Invariant: a link's weight lives in [0, 1] and a weakened-to-zero
        /// link is gone from the table, not stored at zero
        #[test]
        fn weights_bounded_and_pruned(ops in prop::collection::vec(op_strategy(), 1..50)) {
            let store = mem_store();
            let a = add(&store, "lesson a");
            let b = add(&store, "lesson b");
            let graph = MemoryGraph::new(store.clone());

            for op in ops {
                match op {
                    Op::Strengthen => {
                        let w = graph.strengthen(a, b, 0.08).unwrap();
                        prop_assert!(w > 0.0 && w <= 1.0);
                    }
                    Op::Weaken => {
                        if let Some(w) = graph.weaken(a, b, 0.08).unwrap() {
                            prop_assert!((0.0..=1.0).contains(&w));
                        }
                    }
                }
                match graph.weight(a, b).unwrap() {
                    Some(w) => prop_assert!(w > 0.0 && w <= 1.0),
                    None => prop_assert_eq!(graph.stats().unwrap().edges, 0),
                }
            }
        }
    }
}

mod persistence {
    use super::*;

    #[test]
    fn store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = MemoryConfig {
            db_path: dir
                .path()
                .join("memories.db")
                .to_string_lossy()
                .into_owned(),
            ..MemoryConfig::default()
        };

        let id = {
            let store = MemoryStore::open(config.clone()).unwrap();
            let id = add(&store, "durable lesson");
            store.reinforce(id, true).unwrap();
            id
        };

        let store = MemoryStore::open(config).unwrap();
        let mem = store.get(id).unwrap();
        assert_eq!(mem.lesson, "durable lesson");
        assert_eq!(mem.success_count, 1);
    }

    #[test]
    fn export_import_merge_preserves_links() {
        let store = mem_store();
        let a = add(&store, "linked lesson one");
        let b = add(&store, "linked lesson two");
        let graph = MemoryGraph::new(store.clone());
        graph.strengthen(a, b, 0.08).unwrap();

        let doc = store.export().unwrap();
        assert_eq!(doc.links.len(), 1);

        let other = mem_store();
        other.import(&doc, ImportMode::Merge).unwrap();
        let stats = other.stats().unwrap();
        assert_eq!(stats.total_memories, 2);
        assert_eq!(stats.total_links, 1);
    }
}

mod write_path {
    use super::*;

    /// Many concurrent reinforcements through the writer all land; nothing
    /// is lost to interleaving.
    #[tokio::test]
    async fn concurrent_reinforcements_are_serialized() {
        let orch = MemoryOrchestrator::open_in_memory().unwrap();
        let writer = orch.writer();
        let id = writer
            .learn(CreateMemoryInput::new("contended lesson"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let w = writer.clone();
            handles.push(tokio::spawn(async move { w.reinforce(id, i % 2 == 0).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mem = orch.store().get(id).unwrap();
        assert_eq!(mem.success_count + mem.failure_count, 20);
        assert_eq!(mem.success_count, 10);
    }

    /// Decay through the writer behaves like decay on the store directly.
    #[tokio::test]
    async fn decay_tick_reports_counts() {
        let orch = MemoryOrchestrator::open_in_memory().unwrap();
        let writer = orch.writer();
        for i in 0..3 {
            writer
                .learn(CreateMemoryInput::new(format!("lesson number {}", i)))
                .await
                .unwrap();
        }
        let report = writer.decay_tick().await.unwrap();
        assert_eq!(report.memories_processed, 3);
    }

    /// Curated writes land with the chosen category and importance.
    #[tokio::test]
    async fn curation_through_the_writer() {
        let orch = MemoryOrchestrator::open_in_memory().unwrap();
        let id = orch
            .writer()
            .curate(
                "Prefer explicit loops over clever one-liners under refinement",
                Category::CodeGeneration,
                9.0,
            )
            .await
            .unwrap();
        let mem = orch.store().get(id).unwrap();
        assert_eq!(mem.category, Category::CodeGeneration);
        assert!((mem.importance - 9.0).abs() < f64::EPSILON);
    }
}

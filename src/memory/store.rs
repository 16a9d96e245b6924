//! Durable memory store backed by SQLite
//!
//! Lessons live in a `memories` table, links in `memory_links`. WAL mode plus
//! per-operation transactions give whole-or-nothing updates even when a
//! second process opens the same database. Memories decay but are never
//! deleted; retrieval simply skips anything below the importance floor.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{CrucibleError, Result};
use crate::types::{
    Category, CreateMemoryInput, Memory, MemoryConfig, MemoryId, MemoryLink, StoreStats,
    MAX_IMPORTANCE, MIN_IMPORTANCE,
};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Format version stamped into export documents
pub const EXPORT_VERSION: u32 = 1;

/// Result of a decay pass over the whole store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayReport {
    pub memories_processed: i64,
    pub total_importance_before: f64,
    pub total_importance_after: f64,
}

/// Portable snapshot of the whole memory state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryExport {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub memories: Vec<Memory>,
    pub links: Vec<MemoryLink>,
}

/// How an import treats existing rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Drop current state and load the document as-is
    Replace,
    /// Keep current state; add document rows that are not already present
    /// (memories deduped by lesson text, links by pair)
    Merge,
}

/// SQLite-backed memory store
///
/// Cheap to clone; all clones share one connection behind a mutex.
pub struct MemoryStore {
    config: MemoryConfig,
    conn: Arc<Mutex<Connection>>,
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            conn: self.conn.clone(),
        }
    }
}

impl MemoryStore {
    /// Open or create a database at the configured path
    pub fn open(config: MemoryConfig) -> Result<Self> {
        let conn = Self::create_connection(&config)?;
        run_migrations(&conn)?;
        info!(db_path = %config.db_path, "memory store opened");
        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory store (tests)
    pub fn open_in_memory() -> Result<Self> {
        Self::open(MemoryConfig::default())
    }

    fn create_connection(config: &MemoryConfig) -> Result<Connection> {
        let conn = if config.db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(&config.db_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            Connection::open_with_flags(&config.db_path, flags)?
        };

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            PRAGMA cache_size=-64000;
            PRAGMA temp_store=MEMORY;
            PRAGMA foreign_keys=ON;
            "#,
        )?;

        Ok(conn)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Get a guard on the underlying connection (single-threaded use)
    pub fn connection(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Execute a function with the connection
    pub(crate) fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a function inside a transaction
    pub(crate) fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Insert a new memory, or bump an existing one with the same lesson text
    ///
    /// Duplicate lessons are treated as a re-access rather than a new row,
    /// so repeated extraction of the same lesson reinforces instead of
    /// cluttering the store.
    pub fn create(&self, input: CreateMemoryInput) -> Result<MemoryId> {
        if input.lesson.trim().is_empty() {
            return Err(CrucibleError::InvalidInput(
                "lesson text cannot be empty".to_string(),
            ));
        }
        let importance = input
            .importance
            .unwrap_or(5.0)
            .clamp(MIN_IMPORTANCE, MAX_IMPORTANCE);

        self.with_transaction(|conn| {
            let existing: Option<MemoryId> = conn
                .query_row(
                    "SELECT id FROM memories WHERE lesson = ?1",
                    params![input.lesson],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(ignore_no_rows)?;

            if let Some(id) = existing {
                conn.execute(
                    "UPDATE memories SET access_count = access_count + 1,
                     last_accessed_at = ?2 WHERE id = ?1",
                    params![id, Utc::now().to_rfc3339()],
                )?;
                debug!(memory_id = id, "duplicate lesson, bumped instead");
                return Ok(id);
            }

            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO memories
                 (lesson, category, importance, base_importance, access_count,
                  success_count, failure_count, keywords, source, error_type, created_at)
                 VALUES (?1, ?2, ?3, ?3, 0, 0, 0, ?4, ?5, ?6, ?7)",
                params![
                    input.lesson,
                    input.category.as_str(),
                    importance,
                    serde_json::to_string(&input.keywords)?,
                    input.source.as_str(),
                    input.error_type,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Fetch a memory by id
    pub fn get(&self, id: MemoryId) -> Result<Memory> {
        self.with_connection(|conn| {
            conn.query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                params![id],
                row_to_memory,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => CrucibleError::NotFound(id),
                other => other.into(),
            })
        })
    }

    /// Record a retrieval: bump access_count and last_accessed_at
    pub fn touch(&self, id: MemoryId) -> Result<()> {
        self.with_transaction(|conn| {
            let changed = conn.execute(
                "UPDATE memories SET access_count = access_count + 1,
                 last_accessed_at = ?2 WHERE id = ?1",
                params![id, Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(CrucibleError::NotFound(id));
            }
            Ok(())
        })
    }

    /// Record whether a retrieved memory helped the session outcome
    ///
    /// Helped: success counter and a +1 importance nudge. Hurt: failure
    /// counter and -1. Importance stays inside [1, 10] either way.
    pub fn reinforce(&self, id: MemoryId, helped: bool) -> Result<Memory> {
        self.with_transaction(|conn| {
            let sql = if helped {
                "UPDATE memories SET success_count = success_count + 1,
                 importance = MIN(?2, importance + 1.0),
                 base_importance = MIN(?2, base_importance + 1.0)
                 WHERE id = ?1"
            } else {
                "UPDATE memories SET failure_count = failure_count + 1,
                 importance = MAX(?2, importance - 1.0),
                 base_importance = MAX(?2, base_importance - 1.0)
                 WHERE id = ?1"
            };
            let bound = if helped { MAX_IMPORTANCE } else { MIN_IMPORTANCE };
            let changed = conn.execute(sql, params![id, bound])?;
            if changed == 0 {
                return Err(CrucibleError::NotFound(id));
            }
            conn.query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                params![id],
                row_to_memory,
            )
            .map_err(Into::into)
        })
    }

    /// Apply temporal decay to every memory
    ///
    /// importance = clamp(base_importance * factor^idle_days), where idle
    /// days count from the last access (creation if never accessed). Once a
    /// memory has at least 3 reinforcements its success rate scales the
    /// factor, so lessons that keep failing fade faster.
    pub fn run_decay(&self) -> Result<DecayReport> {
        let factor = self.config.decay_factor;
        self.with_transaction(|conn| {
            let before: f64 = conn.query_row(
                "SELECT COALESCE(SUM(importance), 0.0) FROM memories",
                [],
                |row| row.get(0),
            )?;

            let mut stmt =
                conn.prepare(&format!("SELECT {MEMORY_COLUMNS} FROM memories"))?;
            let memories: Vec<Memory> = stmt
                .query_map([], row_to_memory)?
                .collect::<std::result::Result<_, _>>()?;
            let processed = memories.len() as i64;

            let now = Utc::now();
            for mem in memories {
                let anchor = mem.last_accessed_at.unwrap_or(mem.created_at);
                let idle_days = (now - anchor).num_days().max(0);
                if idle_days == 0 {
                    continue;
                }
                let mut decay = factor.powi(idle_days as i32);
                if mem.success_count + mem.failure_count >= 3 {
                    decay *= mem.success_rate();
                }
                let importance =
                    (mem.base_importance * decay).clamp(MIN_IMPORTANCE, MAX_IMPORTANCE);
                conn.execute(
                    "UPDATE memories SET importance = ?2 WHERE id = ?1",
                    params![mem.id, importance],
                )?;
            }

            let after: f64 = conn.query_row(
                "SELECT COALESCE(SUM(importance), 0.0) FROM memories",
                [],
                |row| row.get(0),
            )?;

            debug!(
                processed,
                decayed_by = before - after,
                "decay pass complete"
            );
            Ok(DecayReport {
                memories_processed: processed,
                total_importance_before: before,
                total_importance_after: after,
            })
        })
    }

    /// Candidate pool for retrieval: above the floor, category first
    ///
    /// Returns up to `max_candidates` rows, category matches before the
    /// rest, higher importance first. Ranking proper happens in the
    /// orchestrator; this only trims the pool.
    pub fn candidates(&self, category: Category) -> Result<Vec<Memory>> {
        let floor = self.config.retrieval_floor;
        let limit = self.config.max_candidates;
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEMORY_COLUMNS} FROM memories
                 WHERE importance >= ?1
                 ORDER BY (category = ?2) DESC, importance DESC
                 LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(
                    params![floor, category.as_str(), limit as i64],
                    row_to_memory,
                )?
                .collect::<std::result::Result<_, _>>()?;
            Ok(rows)
        })
    }

    /// All memories, newest first
    pub fn all(&self) -> Result<Vec<Memory>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEMORY_COLUMNS} FROM memories ORDER BY id DESC"
            ))?;
            let rows = stmt
                .query_map([], row_to_memory)?
                .collect::<std::result::Result<_, _>>()?;
            Ok(rows)
        })
    }

    /// Aggregate counters over the store
    pub fn stats(&self) -> Result<StoreStats> {
        let floor = self.config.retrieval_floor;
        self.with_connection(|conn| {
            let (total, avg): (i64, f64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(AVG(importance), 0.0) FROM memories",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let below: i64 = conn.query_row(
                "SELECT COUNT(*) FROM memories WHERE importance < ?1",
                params![floor],
                |row| row.get(0),
            )?;
            let links: i64 =
                conn.query_row("SELECT COUNT(*) FROM memory_links", [], |row| row.get(0))?;
            Ok(StoreStats {
                total_memories: total,
                total_links: links,
                avg_importance: avg,
                below_floor: below,
            })
        })
    }

    /// Snapshot the whole store as a portable document
    pub fn export(&self) -> Result<MemoryExport> {
        let memories = self.all()?;
        let links = self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a, b, weight, created_at FROM memory_links ORDER BY a, b",
            )?;
            let rows = stmt
                .query_map([], row_to_link)?
                .collect::<std::result::Result<_, _>>()?;
            Ok(rows)
        })?;
        Ok(MemoryExport {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            memories,
            links,
        })
    }

    /// Load an export document
    ///
    /// Replace drops existing state first. Merge keeps it and skips
    /// memories whose lesson already exists and links whose pair already
    /// exists. Either way the whole import is one transaction.
    pub fn import(&self, doc: &MemoryExport, mode: ImportMode) -> Result<usize> {
        if doc.version > EXPORT_VERSION {
            return Err(CrucibleError::InvalidInput(format!(
                "unsupported export version {}",
                doc.version
            )));
        }

        self.with_transaction(|conn| {
            if mode == ImportMode::Replace {
                conn.execute("DELETE FROM memory_links", [])?;
                conn.execute("DELETE FROM memories", [])?;
            }

            // Old id -> new id, so imported links keep pointing at the
            // right lessons after rowids change.
            let mut id_map = std::collections::HashMap::new();
            let mut imported = 0usize;

            for mem in &doc.memories {
                let existing: Option<MemoryId> = conn
                    .query_row(
                        "SELECT id FROM memories WHERE lesson = ?1",
                        params![mem.lesson],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(ignore_no_rows)?;

                if let Some(id) = existing {
                    id_map.insert(mem.id, id);
                    continue;
                }

                conn.execute(
                    "INSERT INTO memories
                     (lesson, category, importance, base_importance, access_count,
                      success_count, failure_count, keywords, source, error_type,
                      created_at, last_accessed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        mem.lesson,
                        mem.category.as_str(),
                        mem.importance,
                        mem.base_importance,
                        mem.access_count,
                        mem.success_count,
                        mem.failure_count,
                        serde_json::to_string(&mem.keywords)?,
                        mem.source.as_str(),
                        mem.error_type,
                        mem.created_at.to_rfc3339(),
                        mem.last_accessed_at.map(|t| t.to_rfc3339()),
                    ],
                )?;
                id_map.insert(mem.id, conn.last_insert_rowid());
                imported += 1;
            }

            for link in &doc.links {
                let (Some(&a), Some(&b)) = (id_map.get(&link.a), id_map.get(&link.b)) else {
                    continue;
                };
                let (a, b) = if a < b { (a, b) } else { (b, a) };
                conn.execute(
                    "INSERT INTO memory_links (a, b, weight, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(a, b) DO NOTHING",
                    params![a, b, link.weight, link.created_at.to_rfc3339()],
                )?;
            }

            info!(imported, mode = ?mode, "memory import complete");
            Ok(imported)
        })
    }
}

const MEMORY_COLUMNS: &str = "id, lesson, category, importance, base_importance, \
     access_count, success_count, failure_count, keywords, source, error_type, \
     created_at, last_accessed_at";

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let keywords_json: String = row.get(8)?;
    let category_str: String = row.get(2)?;
    let source_str: String = row.get(9)?;
    let created_at: String = row.get(11)?;
    let last_accessed_at: Option<String> = row.get(12)?;

    Ok(Memory {
        id: row.get(0)?,
        lesson: row.get(1)?,
        category: category_str.parse().unwrap_or_default(),
        importance: row.get(3)?,
        base_importance: row.get(4)?,
        access_count: row.get(5)?,
        success_count: row.get(6)?,
        failure_count: row.get(7)?,
        keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
        source: source_str.parse().unwrap_or_default(),
        error_type: row.get(10)?,
        created_at: parse_timestamp(&created_at),
        last_accessed_at: last_accessed_at.as_deref().map(parse_timestamp),
    })
}

fn row_to_link(row: &Row<'_>) -> rusqlite::Result<MemoryLink> {
    let created_at: String = row.get(3)?;
    Ok(MemoryLink {
        a: row.get(0)?,
        b: row.get(1)?,
        weight: row.get(2)?,
        created_at: parse_timestamp(&created_at),
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn ignore_no_rows<T>(e: rusqlite::Error) -> std::result::Result<Option<T>, rusqlite::Error> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Initial schema (v1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lesson TEXT NOT NULL UNIQUE,
            category TEXT NOT NULL DEFAULT 'general',
            importance REAL NOT NULL DEFAULT 5.0,
            base_importance REAL NOT NULL DEFAULT 5.0,
            access_count INTEGER NOT NULL DEFAULT 0,
            success_count INTEGER NOT NULL DEFAULT 0,
            failure_count INTEGER NOT NULL DEFAULT 0,
            keywords TEXT NOT NULL DEFAULT '[]',
            source TEXT NOT NULL DEFAULT 'refinement',
            error_type TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            last_accessed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category);
        CREATE INDEX IF NOT EXISTS idx_memories_importance ON memories(importance);

        CREATE TABLE IF NOT EXISTS memory_links (
            a INTEGER NOT NULL,
            b INTEGER NOT NULL,
            weight REAL NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (a, b),
            FOREIGN KEY (a) REFERENCES memories(id) ON DELETE CASCADE,
            FOREIGN KEY (b) REFERENCES memories(id) ON DELETE CASCADE,
            CHECK (a < b)
        );

        CREATE INDEX IF NOT EXISTS idx_links_b ON memory_links(b);
        "#,
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemorySource;

    fn store() -> MemoryStore {
        MemoryStore::open_in_memory().unwrap()
    }

    fn lesson(store: &MemoryStore, text: &str) -> MemoryId {
        store.create(CreateMemoryInput::new(text)).unwrap()
    }

    #[test]
    fn test_create_and_get() {
        let store = store();
        let mut input = CreateMemoryInput::new("Always validate inputs before parsing");
        input.category = Category::Parsing;
        input.importance = Some(7.0);
        input.keywords = vec!["validate".to_string(), "parse".to_string()];
        let id = store.create(input).unwrap();

        let mem = store.get(id).unwrap();
        assert_eq!(mem.lesson, "Always validate inputs before parsing");
        assert_eq!(mem.category, Category::Parsing);
        assert!((mem.importance - 7.0).abs() < f64::EPSILON);
        assert_eq!(mem.keywords.len(), 2);
        assert_eq!(mem.source, MemorySource::Refinement);
    }

    #[test]
    fn test_importance_clamped_on_create() {
        let store = store();
        let mut input = CreateMemoryInput::new("overweighted lesson");
        input.importance = Some(42.0);
        let id = store.create(input).unwrap();
        assert!((store.get(id).unwrap().importance - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_duplicate_lesson_bumps_instead_of_inserting() {
        let store = store();
        let a = lesson(&store, "same lesson");
        let b = lesson(&store, "same lesson");
        assert_eq!(a, b);
        let mem = store.get(a).unwrap();
        assert_eq!(mem.access_count, 1);
        assert_eq!(store.stats().unwrap().total_memories, 1);
    }

    #[test]
    fn test_empty_lesson_rejected() {
        let store = store();
        let err = store.create(CreateMemoryInput::new("   ")).unwrap_err();
        assert!(matches!(err, CrucibleError::InvalidInput(_)));
    }

    #[test]
    fn test_reinforce_moves_counters_and_importance() {
        let store = store();
        let id = lesson(&store, "reinforced lesson");

        let mem = store.reinforce(id, true).unwrap();
        assert_eq!(mem.success_count, 1);
        assert!((mem.importance - 6.0).abs() < f64::EPSILON);

        let mem = store.reinforce(id, false).unwrap();
        assert_eq!(mem.failure_count, 1);
        assert!((mem.importance - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reinforce_respects_bounds() {
        let store = store();
        let id = lesson(&store, "bounded lesson");
        for _ in 0..20 {
            store.reinforce(id, true).unwrap();
        }
        assert!((store.get(id).unwrap().importance - 10.0).abs() < f64::EPSILON);
        for _ in 0..30 {
            store.reinforce(id, false).unwrap();
        }
        assert!((store.get(id).unwrap().importance - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_touch_unknown_id() {
        let store = store();
        assert!(matches!(
            store.touch(999).unwrap_err(),
            CrucibleError::NotFound(999)
        ));
    }

    #[test]
    fn test_decay_reduces_idle_importance() {
        let store = store();
        let id = lesson(&store, "old lesson");
        // Backdate so the memory reads as ten idle days old
        store
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE memories SET created_at = ?2 WHERE id = ?1",
                    params![id, (Utc::now() - chrono::Duration::days(10)).to_rfc3339()],
                )?;
                Ok(())
            })
            .unwrap();

        let report = store.run_decay().unwrap();
        assert_eq!(report.memories_processed, 1);
        assert!(report.total_importance_after < report.total_importance_before);

        let mem = store.get(id).unwrap();
        let expected = 5.0 * 0.98f64.powi(10);
        assert!((mem.importance - expected).abs() < 1e-9);
        // base stays as the anchor
        assert!((mem.base_importance - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_decay_never_deletes_and_never_drops_below_one() {
        let store = store();
        let id = lesson(&store, "ancient lesson");
        store
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE memories SET created_at = ?2 WHERE id = ?1",
                    params![id, (Utc::now() - chrono::Duration::days(2000)).to_rfc3339()],
                )?;
                Ok(())
            })
            .unwrap();
        store.run_decay().unwrap();
        let mem = store.get(id).unwrap();
        assert!((mem.importance - 1.0).abs() < f64::EPSILON);
        assert_eq!(store.stats().unwrap().total_memories, 1);
    }

    #[test]
    fn test_candidates_skip_below_floor() {
        let store = store();
        let keep = lesson(&store, "healthy lesson");
        let fade = lesson(&store, "faded lesson");
        store
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE memories SET importance = 1.2 WHERE id = ?1",
                    params![fade],
                )?;
                Ok(())
            })
            .unwrap();

        let pool = store.candidates(Category::General).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].id, keep);
    }

    #[test]
    fn test_export_import_replace_round_trip() {
        let store = store();
        lesson(&store, "first lesson");
        lesson(&store, "second lesson");
        let doc = store.export().unwrap();

        let other = MemoryStore::open_in_memory().unwrap();
        lesson(&other, "stale lesson");
        let imported = other.import(&doc, ImportMode::Replace).unwrap();
        assert_eq!(imported, 2);
        assert_eq!(other.stats().unwrap().total_memories, 2);
    }

    #[test]
    fn test_import_merge_dedupes_by_lesson() {
        let store = store();
        lesson(&store, "shared lesson");
        lesson(&store, "only here");
        let doc = store.export().unwrap();

        let other = MemoryStore::open_in_memory().unwrap();
        lesson(&other, "shared lesson");
        let imported = other.import(&doc, ImportMode::Merge).unwrap();
        assert_eq!(imported, 1);
        assert_eq!(other.stats().unwrap().total_memories, 2);
    }
}

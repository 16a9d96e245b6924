//! Weighted relationship graph between memories
//!
//! Links are undirected, stored once with `a < b`, weight in [0, 1]. Weights
//! only move by fixed clamped steps; a weaken that reaches zero prunes the
//! row. Centrality is weighted PageRank over the undirected link set.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{CrucibleError, Result};
use crate::types::{MemoryId, MemoryLink};

use super::store::MemoryStore;

/// PageRank damping factor
const DAMPING: f64 = 0.85;
/// Iteration cap; convergence usually lands well before this
const MAX_PAGERANK_ITERATIONS: usize = 30;
const CONVERGENCE_EPSILON: f64 = 1e-6;

/// Weight given to a link the first time a pair is seen together
const INITIAL_WEIGHT: f64 = 0.5;

/// Aggregate counters over the graph
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub components: usize,
}

/// Graph view over the store's `memory_links` table
#[derive(Clone)]
pub struct MemoryGraph {
    store: MemoryStore,
}

impl MemoryGraph {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    fn canonical(a: MemoryId, b: MemoryId) -> Result<(MemoryId, MemoryId)> {
        if a == b {
            return Err(CrucibleError::InvalidInput(format!(
                "memory {} cannot link to itself",
                a
            )));
        }
        Ok(if a < b { (a, b) } else { (b, a) })
    }

    /// Create or reset a link at an explicit weight, clamped to [0, 1]
    pub fn link(&self, a: MemoryId, b: MemoryId, weight: f64) -> Result<f64> {
        let (a, b) = Self::canonical(a, b)?;
        let weight = weight.clamp(0.0, 1.0);
        self.store.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO memory_links (a, b, weight, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(a, b) DO UPDATE SET weight = excluded.weight",
                params![a, b, weight, chrono::Utc::now().to_rfc3339()],
            )?;
            debug!(a, b, weight, "link set");
            Ok(weight)
        })
    }

    /// Strengthen a link, creating it at the initial weight if absent
    ///
    /// Existing links move up by `step`, clamped to 1.0.
    pub fn strengthen(&self, a: MemoryId, b: MemoryId, step: f64) -> Result<f64> {
        let (a, b) = Self::canonical(a, b)?;
        self.store.with_transaction(|conn| {
            let existing: Option<f64> = conn
                .query_row(
                    "SELECT weight FROM memory_links WHERE a = ?1 AND b = ?2",
                    params![a, b],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            let weight = match existing {
                Some(w) => {
                    let weight = (w + step).min(1.0);
                    conn.execute(
                        "UPDATE memory_links SET weight = ?3 WHERE a = ?1 AND b = ?2",
                        params![a, b, weight],
                    )?;
                    weight
                }
                None => {
                    conn.execute(
                        "INSERT INTO memory_links (a, b, weight, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![a, b, INITIAL_WEIGHT, chrono::Utc::now().to_rfc3339()],
                    )?;
                    INITIAL_WEIGHT
                }
            };
            debug!(a, b, weight, "link strengthened");
            Ok(weight)
        })
    }

    /// Weaken a link; pruned from the table if the weight reaches zero
    ///
    /// Weakening a link that does not exist is a no-op, never an error.
    pub fn weaken(&self, a: MemoryId, b: MemoryId, step: f64) -> Result<Option<f64>> {
        let (a, b) = Self::canonical(a, b)?;
        self.store.with_transaction(|conn| {
            let existing: Option<f64> = conn
                .query_row(
                    "SELECT weight FROM memory_links WHERE a = ?1 AND b = ?2",
                    params![a, b],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            let Some(w) = existing else {
                return Ok(None);
            };

            let weight = w - step;
            if weight <= 0.0 {
                conn.execute(
                    "DELETE FROM memory_links WHERE a = ?1 AND b = ?2",
                    params![a, b],
                )?;
                debug!(a, b, "link pruned");
                Ok(Some(0.0))
            } else {
                conn.execute(
                    "UPDATE memory_links SET weight = ?3 WHERE a = ?1 AND b = ?2",
                    params![a, b, weight],
                )?;
                Ok(Some(weight))
            }
        })
    }

    /// Current weight of a link, if present
    pub fn weight(&self, a: MemoryId, b: MemoryId) -> Result<Option<f64>> {
        let (a, b) = Self::canonical(a, b)?;
        self.store.with_connection(|conn| {
            conn.query_row(
                "SELECT weight FROM memory_links WHERE a = ?1 AND b = ?2",
                params![a, b],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other.into()),
            })
        })
    }

    /// Neighbors of a memory above a minimum weight, strongest first
    pub fn related(&self, id: MemoryId, min_weight: f64, limit: usize) -> Result<Vec<(MemoryId, f64)>> {
        self.store.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT CASE WHEN a = ?1 THEN b ELSE a END, weight
                 FROM memory_links
                 WHERE (a = ?1 OR b = ?1) AND weight >= ?2
                 ORDER BY weight DESC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![id, min_weight, limit as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<std::result::Result<_, _>>()?;
            Ok(rows)
        })
    }

    /// All links, canonical order
    pub fn links(&self) -> Result<Vec<MemoryLink>> {
        self.store.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a, b, weight, created_at FROM memory_links ORDER BY a, b",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    let created: String = row.get(3)?;
                    Ok(MemoryLink {
                        a: row.get(0)?,
                        b: row.get(1)?,
                        weight: row.get(2)?,
                        created_at: chrono::DateTime::parse_from_rfc3339(&created)
                            .map(|t| t.with_timezone(&chrono::Utc))
                            .unwrap_or_else(|_| chrono::Utc::now()),
                    })
                })?
                .collect::<std::result::Result<_, _>>()?;
            Ok(rows)
        })
    }

    /// Most central memories by weighted PageRank
    ///
    /// Scores sum to 1 over the linked node set; unlinked memories score 0
    /// and are not returned. Empty graph yields an empty list.
    pub fn central_memories(&self, top_k: usize) -> Result<Vec<(MemoryId, f64)>> {
        let links = self.links()?;
        if links.is_empty() {
            return Ok(Vec::new());
        }

        let mut neighbors: HashMap<MemoryId, Vec<(MemoryId, f64)>> = HashMap::new();
        for link in &links {
            neighbors.entry(link.a).or_default().push((link.b, link.weight));
            neighbors.entry(link.b).or_default().push((link.a, link.weight));
        }

        let n = neighbors.len();
        let uniform = 1.0 / n as f64;
        let mut rank: HashMap<MemoryId, f64> =
            neighbors.keys().map(|&id| (id, uniform)).collect();
        let out_weight: HashMap<MemoryId, f64> = neighbors
            .iter()
            .map(|(&id, edges)| (id, edges.iter().map(|(_, w)| w).sum()))
            .collect();

        for _ in 0..MAX_PAGERANK_ITERATIONS {
            let mut next: HashMap<MemoryId, f64> =
                neighbors.keys().map(|&id| (id, (1.0 - DAMPING) * uniform)).collect();

            for (&id, edges) in &neighbors {
                let total = out_weight[&id];
                if total <= 0.0 {
                    continue;
                }
                let share = DAMPING * rank[&id];
                for &(other, weight) in edges {
                    if let Some(r) = next.get_mut(&other) {
                        *r += share * (weight / total);
                    }
                }
            }

            let delta: f64 = next
                .iter()
                .map(|(id, r)| (r - rank[id]).abs())
                .sum();
            rank = next;
            if delta < CONVERGENCE_EPSILON {
                break;
            }
        }

        let mut scored: Vec<(MemoryId, f64)> = rank.into_iter().collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Node/edge/component counters
    pub fn stats(&self) -> Result<GraphStats> {
        let links = self.links()?;
        let mut neighbors: HashMap<MemoryId, Vec<MemoryId>> = HashMap::new();
        for link in &links {
            neighbors.entry(link.a).or_default().push(link.b);
            neighbors.entry(link.b).or_default().push(link.a);
        }

        let mut seen = std::collections::HashSet::new();
        let mut components = 0;
        for &start in neighbors.keys() {
            if !seen.insert(start) {
                continue;
            }
            components += 1;
            let mut stack = vec![start];
            while let Some(id) = stack.pop() {
                if let Some(adj) = neighbors.get(&id) {
                    for &next in adj {
                        if seen.insert(next) {
                            stack.push(next);
                        }
                    }
                }
            }
        }

        Ok(GraphStats {
            nodes: neighbors.len(),
            edges: links.len(),
            components,
        })
    }
}

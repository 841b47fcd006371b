//! SQLite-backed long-term memory storage.
//!
//! Rows carry access statistics (`access_count`, `last_access`) used
//! for ranking. A process-level RW lock guards the database: saves and
//! clears take the write lock, searches take the read lock. Access-stat
//! updates triggered by a search are applied after the read lock is
//! released, under the write lock, so a search never upgrades its lock.
//!
//! Full-text search uses an FTS5 virtual table kept in sync by
//! triggers. When FTS5 is unavailable the store logs one warning and
//! degrades to `LIKE` matching; construction never fails because of it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rusqlite::{params, Connection};
use serde_json::Value;

use crate::memory::{MemoryItem, MemoryStorage};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS long_term_memories (
    id TEXT PRIMARY KEY,
    value TEXT,
    metadata TEXT,
    agent TEXT,
    created_at DATETIME,
    score REAL,
    access_count INTEGER DEFAULT 0,
    last_access DATETIME
)";

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_ltm_agent ON long_term_memories(agent)",
    "CREATE INDEX IF NOT EXISTS idx_ltm_created_at ON long_term_memories(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_ltm_score ON long_term_memories(score)",
    "CREATE INDEX IF NOT EXISTS idx_ltm_last_access ON long_term_memories(last_access)",
];

const CREATE_FTS: &str = "CREATE VIRTUAL TABLE IF NOT EXISTS long_term_memories_fts
    USING fts5(value, content='long_term_memories', content_rowid='rowid')";

const CREATE_FTS_TRIGGERS: &[&str] = &[
    "CREATE TRIGGER IF NOT EXISTS ltm_fts_insert AFTER INSERT ON long_term_memories BEGIN
        INSERT INTO long_term_memories_fts(rowid, value) VALUES (new.rowid, new.value);
    END",
    "CREATE TRIGGER IF NOT EXISTS ltm_fts_delete AFTER DELETE ON long_term_memories BEGIN
        INSERT INTO long_term_memories_fts(long_term_memories_fts, rowid, value)
        VALUES ('delete', old.rowid, old.value);
    END",
    "CREATE TRIGGER IF NOT EXISTS ltm_fts_update AFTER UPDATE ON long_term_memories BEGIN
        INSERT INTO long_term_memories_fts(long_term_memories_fts, rowid, value)
        VALUES ('delete', old.rowid, old.value);
        INSERT INTO long_term_memories_fts(rowid, value) VALUES (new.rowid, new.value);
    END",
];

/// SQLite long-term memory store.
pub struct SqliteMemoryStorage {
    db_path: PathBuf,
    lock: Arc<RwLock<()>>,
    fts_enabled: bool,
}

impl SqliteMemoryStorage {
    /// Open (creating if needed) the store at the given path.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self, anyhow::Error> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)?;
        conn.execute(CREATE_TABLE, [])?;
        for index in CREATE_INDEXES {
            conn.execute(index, [])?;
        }

        let fts_enabled = match Self::create_fts(&conn) {
            Ok(()) => true,
            Err(err) => {
                log::warn!(
                    "FTS5 unavailable for long-term memory, degrading to LIKE search: {err}"
                );
                false
            }
        };

        Ok(Self {
            db_path,
            lock: Arc::new(RwLock::new(())),
            fts_enabled,
        })
    }

    fn create_fts(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute(CREATE_FTS, [])?;
        for trigger in CREATE_FTS_TRIGGERS {
            conn.execute(trigger, [])?;
        }
        Ok(())
    }

    /// Whether FTS5 matching is active.
    pub fn fts_enabled(&self) -> bool {
        self.fts_enabled
    }

    /// Path of the backing database file.
    pub fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }

    /// Quote the query's terms for an FTS5 MATCH expression.
    fn fts_query(query: &str) -> String {
        query
            .split_whitespace()
            .map(|term| format!("\"{}\"", term.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

fn row_to_item(
    id: String,
    value: String,
    metadata: String,
    agent: String,
    created_at: String,
    score: f64,
) -> MemoryItem {
    let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
    let metadata: HashMap<String, Value> = serde_json::from_str(&metadata).unwrap_or_default();
    let created_at = created_at
        .parse::<DateTime<Utc>>()
        .unwrap_or_else(|_| Utc::now());
    MemoryItem {
        id,
        value,
        metadata,
        score,
        agent,
        created_at,
    }
}

#[async_trait]
impl MemoryStorage for SqliteMemoryStorage {
    async fn save(&self, item: &MemoryItem) -> Result<(), anyhow::Error> {
        let db_path = self.db_path.clone();
        let lock = self.lock.clone();
        let id = item.id.clone();
        let value = serde_json::to_string(&item.value)?;
        let metadata = serde_json::to_string(&item.metadata)?;
        let agent = item.agent.clone();
        let created_at = item.created_at.to_rfc3339();
        let score = item.score;

        tokio::task::spawn_blocking(move || {
            let _guard = lock.write();
            let conn = Connection::open(&db_path)?;
            conn.execute(
                "INSERT OR REPLACE INTO long_term_memories
                 (id, value, metadata, agent, created_at, score, access_count, last_access)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL)",
                params![id, value, metadata, agent, created_at, score],
            )?;
            Ok::<_, anyhow::Error>(())
        })
        .await?
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<MemoryItem>, anyhow::Error> {
        let db_path = self.db_path.clone();
        let lock = self.lock.clone();
        let fts_enabled = self.fts_enabled;
        let query = query.to_string();

        tokio::task::spawn_blocking(move || {
            let items = {
                let _guard = lock.read();
                let conn = Connection::open(&db_path)?;

                let fts_query = Self::fts_query(&query);
                let mut items = Vec::new();

                if fts_enabled && !fts_query.is_empty() {
                    let mut stmt = conn.prepare(
                        "SELECT m.id, m.value, m.metadata, m.agent, m.created_at, m.score
                         FROM long_term_memories m
                         JOIN long_term_memories_fts f ON f.rowid = m.rowid
                         WHERE long_term_memories_fts MATCH ?1 AND m.score >= ?2
                         ORDER BY m.score DESC, m.access_count DESC
                         LIMIT ?3",
                    )?;
                    let rows = stmt.query_map(
                        params![fts_query, score_threshold, limit as i64],
                        |row| {
                            Ok(row_to_item(
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                                row.get(5)?,
                            ))
                        },
                    )?;
                    for row in rows {
                        items.push(row?);
                    }
                } else {
                    let mut stmt = conn.prepare(
                        "SELECT id, value, metadata, agent, created_at, score
                         FROM long_term_memories
                         WHERE value LIKE '%' || ?1 || '%' AND score >= ?2
                         ORDER BY score DESC, access_count DESC
                         LIMIT ?3",
                    )?;
                    let rows = stmt.query_map(
                        params![query, score_threshold, limit as i64],
                        |row| {
                            Ok(row_to_item(
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                                row.get(5)?,
                            ))
                        },
                    )?;
                    for row in rows {
                        items.push(row?);
                    }
                }
                items
            };

            // Access stats update happens under the write lock, after
            // the read lock is gone.
            if !items.is_empty() {
                let _guard = lock.write();
                let conn = Connection::open(&db_path)?;
                let now = Utc::now().to_rfc3339();
                for item in &items {
                    conn.execute(
                        "UPDATE long_term_memories
                         SET access_count = access_count + 1, last_access = ?1
                         WHERE id = ?2",
                        params![now, item.id],
                    )?;
                }
            }

            Ok::<_, anyhow::Error>(items)
        })
        .await?
    }

    async fn delete(&self, id: &str) -> Result<(), anyhow::Error> {
        let db_path = self.db_path.clone();
        let lock = self.lock.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || {
            let _guard = lock.write();
            let conn = Connection::open(&db_path)?;
            conn.execute("DELETE FROM long_term_memories WHERE id = ?1", params![id])?;
            Ok::<_, anyhow::Error>(())
        })
        .await?
    }

    async fn clear(&self) -> Result<(), anyhow::Error> {
        let db_path = self.db_path.clone();
        let lock = self.lock.clone();

        tokio::task::spawn_blocking(move || {
            let _guard = lock.write();
            let conn = Connection::open(&db_path)?;
            conn.execute("DELETE FROM long_term_memories", [])?;
            Ok::<_, anyhow::Error>(())
        })
        .await?
    }

    fn close(&self) -> Result<(), anyhow::Error> {
        // Connections are opened per operation; nothing to release.
        Ok(())
    }
}

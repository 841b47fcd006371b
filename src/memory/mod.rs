//! Memory facades.
//!
//! The runtime consumes memory through the [`Memory`] trait: save an
//! item, search by query. Two pathways implement the agent-facing
//! surface: a single flat facade rendered as one `Relevant Memory:`
//! section, and the four-tier [`ContextualMemory`] with labelled
//! sections. The agent holds whichever is configured via
//! [`AgentMemory`]; context assembly consumes it uniformly.

pub mod contextual;
pub mod storage;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use contextual::ContextualMemory;
pub use storage::{MemoryStorage, SqliteMemoryStorage};

/// One item stored in or returned by a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique identifier.
    pub id: String,
    /// Opaque stored value.
    pub value: Value,
    /// Free-form metadata.
    pub metadata: HashMap<String, Value>,
    /// Relevance or quality score.
    pub score: f64,
    /// Tag of the agent that produced the item.
    pub agent: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl MemoryItem {
    /// Create an item from a string value with a fresh id.
    pub fn new(value: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            value: Value::String(value.into()),
            metadata: HashMap::new(),
            score: 0.0,
            agent: agent.into(),
            created_at: Utc::now(),
        }
    }

    /// Builder method to set the score.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    /// Builder method to attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The value rendered as a string for prompt injection.
    pub fn value_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Agent-facing memory interface.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Persist an item.
    async fn save(&self, item: MemoryItem) -> Result<(), anyhow::Error>;

    /// Search for items relevant to the query, best first.
    async fn search(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<MemoryItem>, anyhow::Error>;
}

/// Memory facade backed by a storage.
pub struct StorageMemory {
    storage: Arc<dyn MemoryStorage>,
}

impl StorageMemory {
    /// Wrap a storage backend.
    pub fn new(storage: Arc<dyn MemoryStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Memory for StorageMemory {
    async fn save(&self, item: MemoryItem) -> Result<(), anyhow::Error> {
        self.storage.save(&item).await
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<MemoryItem>, anyhow::Error> {
        self.storage.search(query, limit, score_threshold).await
    }
}

/// Which memory pathway an agent is configured with.
#[derive(Clone)]
pub enum AgentMemory {
    /// Flat facade, rendered as one `Relevant Memory:` section.
    Simple(Arc<dyn Memory>),
    /// Four-tier facade with labelled sections.
    Contextual(Arc<ContextualMemory>),
}

impl std::fmt::Debug for AgentMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMemory::Simple(_) => f.write_str("AgentMemory::Simple"),
            AgentMemory::Contextual(_) => f.write_str("AgentMemory::Contextual"),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory storage used across the crate's tests.

    use super::*;
    use parking_lot::Mutex;

    /// Vec-backed storage with naive substring scoring.
    #[derive(Default)]
    pub struct VecStorage {
        items: Mutex<Vec<MemoryItem>>,
    }

    impl VecStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_items(items: Vec<MemoryItem>) -> Self {
            Self {
                items: Mutex::new(items),
            }
        }
    }

    #[async_trait]
    impl MemoryStorage for VecStorage {
        async fn save(&self, item: &MemoryItem) -> Result<(), anyhow::Error> {
            self.items.lock().push(item.clone());
            Ok(())
        }

        async fn search(
            &self,
            query: &str,
            limit: usize,
            score_threshold: f64,
        ) -> Result<Vec<MemoryItem>, anyhow::Error> {
            let words: Vec<String> = query
                .to_lowercase()
                .split_whitespace()
                .map(str::to_string)
                .collect();
            let mut hits: Vec<MemoryItem> = self
                .items
                .lock()
                .iter()
                .filter(|item| {
                    let value = item.value_text().to_lowercase();
                    item.score >= score_threshold
                        && (words.is_empty() || words.iter().any(|w| value.contains(w)))
                })
                .cloned()
                .collect();
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            hits.truncate(limit);
            Ok(hits)
        }

        async fn delete(&self, id: &str) -> Result<(), anyhow::Error> {
            self.items.lock().retain(|item| item.id != id);
            Ok(())
        }

        async fn clear(&self) -> Result<(), anyhow::Error> {
            self.items.lock().clear();
            Ok(())
        }

        fn close(&self) -> Result<(), anyhow::Error> {
            Ok(())
        }
    }

    /// Storage whose search always fails, for degradation tests.
    pub struct FailingStorage;

    #[async_trait]
    impl MemoryStorage for FailingStorage {
        async fn save(&self, _item: &MemoryItem) -> Result<(), anyhow::Error> {
            Err(anyhow::anyhow!("storage offline"))
        }

        async fn search(
            &self,
            _query: &str,
            _limit: usize,
            _score_threshold: f64,
        ) -> Result<Vec<MemoryItem>, anyhow::Error> {
            Err(anyhow::anyhow!("storage offline"))
        }

        async fn delete(&self, _id: &str) -> Result<(), anyhow::Error> {
            Err(anyhow::anyhow!("storage offline"))
        }

        async fn clear(&self) -> Result<(), anyhow::Error> {
            Err(anyhow::anyhow!("storage offline"))
        }

        fn close(&self) -> Result<(), anyhow::Error> {
            Ok(())
        }
    }
}

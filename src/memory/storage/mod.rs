//! Storage interface for memory back-ends.

mod sqlite;

use async_trait::async_trait;

use crate::memory::MemoryItem;

pub use sqlite::SqliteMemoryStorage;

/// Interface every memory storage back-end implements.
///
/// Search returns items best-first; the score threshold is inclusive.
/// `close` releases any underlying resources and is synchronous so it
/// can run from `Drop` paths.
#[async_trait]
pub trait MemoryStorage: Send + Sync {
    /// Persist an item.
    async fn save(&self, item: &MemoryItem) -> Result<(), anyhow::Error>;

    /// Search for items matching the query.
    async fn search(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<MemoryItem>, anyhow::Error>;

    /// Remove one item by id.
    async fn delete(&self, id: &str) -> Result<(), anyhow::Error>;

    /// Remove every item.
    async fn clear(&self) -> Result<(), anyhow::Error>;

    /// Release underlying resources.
    fn close(&self) -> Result<(), anyhow::Error>;
}

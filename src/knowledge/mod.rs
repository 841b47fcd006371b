//! Knowledge sources.
//!
//! A knowledge source answers queries with scored items; ingestion
//! pipelines live behind the trait, outside the runtime. Sources are
//! initialized once when their agent initializes and closed when the
//! agent closes; an initialization failure is fatal to the agent.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// One item returned by a knowledge query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    /// The retrieved content.
    pub content: String,
    /// Free-form metadata.
    pub metadata: HashMap<String, Value>,
    /// Relevance score.
    pub score: f64,
    /// Name of the source the item came from.
    pub source: String,
}

/// Options for a knowledge query.
#[derive(Debug, Clone, Copy)]
pub struct KnowledgeQueryOptions {
    /// Maximum items to return.
    pub limit: usize,
    /// Minimum relevance score, inclusive.
    pub score_threshold: f64,
}

impl Default for KnowledgeQueryOptions {
    fn default() -> Self {
        Self {
            limit: 3,
            score_threshold: 0.35,
        }
    }
}

/// A queryable knowledge source.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Stable name of the source, used to label retrieved items.
    fn name(&self) -> &str;

    /// Query the source. Results come back best-first.
    async fn query(
        &self,
        query: &str,
        options: &KnowledgeQueryOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<KnowledgeItem>, anyhow::Error>;

    /// Prepare the source for querying.
    async fn initialize(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }

    /// Release the source's resources.
    fn close(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// In-memory knowledge source over a list of text chunks.
///
/// Scores by word overlap between the query and each chunk. Intended
/// for small reference corpora and as the test double for the trait.
pub struct StringKnowledgeSource {
    name: String,
    chunks: Vec<String>,
}

impl StringKnowledgeSource {
    /// Create a source from text chunks.
    pub fn new(name: impl Into<String>, chunks: Vec<String>) -> Self {
        Self {
            name: name.into(),
            chunks,
        }
    }

    fn score(query: &str, chunk: &str) -> f64 {
        let query_words: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if query_words.is_empty() {
            return 0.0;
        }
        let chunk_lower = chunk.to_lowercase();
        let matched = query_words
            .iter()
            .filter(|word| chunk_lower.contains(word.as_str()))
            .count();
        matched as f64 / query_words.len() as f64
    }
}

#[async_trait]
impl KnowledgeSource for StringKnowledgeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(
        &self,
        query: &str,
        options: &KnowledgeQueryOptions,
        _cancel: &CancellationToken,
    ) -> Result<Vec<KnowledgeItem>, anyhow::Error> {
        let mut items: Vec<KnowledgeItem> = self
            .chunks
            .iter()
            .map(|chunk| KnowledgeItem {
                content: chunk.clone(),
                metadata: HashMap::new(),
                score: Self::score(query, chunk),
                source: self.name.clone(),
            })
            .filter(|item| item.score >= options.score_threshold)
            .collect();

        items.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        items.truncate(options.limit);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> StringKnowledgeSource {
        StringKnowledgeSource::new(
            "docs",
            vec![
                "The deploy pipeline runs on merge to main".to_string(),
                "Database migrations require a maintenance window".to_string(),
                "Unrelated trivia about office plants".to_string(),
            ],
        )
    }

    #[tokio::test]
    async fn query_ranks_by_overlap() {
        let source = source();
        let items = source
            .query(
                "deploy pipeline merge",
                &KnowledgeQueryOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!items.is_empty());
        assert!(items[0].content.contains("deploy pipeline"));
        assert_eq!(items[0].source, "docs");
    }

    #[tokio::test]
    async fn threshold_drops_weak_matches() {
        let source = source();
        let options = KnowledgeQueryOptions {
            limit: 3,
            score_threshold: 0.9,
        };
        let items = source
            .query("office", &options, &CancellationToken::new())
            .await
            .unwrap();
        // "office" is one word and fully matches the trivia chunk.
        assert_eq!(items.len(), 1);

        let items = source
            .query("deploy window plants together", &options, &CancellationToken::new())
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn limit_truncates() {
        let source = source();
        let options = KnowledgeQueryOptions {
            limit: 1,
            score_threshold: 0.0,
        };
        let items = source
            .query("the", &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
    }
}

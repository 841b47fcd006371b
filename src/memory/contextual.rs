//! Contextual memory: the four-tier labelled facade.
//!
//! Aggregates long-term, short-term, entity, and external memories into
//! one context block with fixed section order: `Historical Data:`,
//! `Recent Insights:`, `Entities:`, `External memories:`. Empty
//! sections are dropped, identical sections are deduplicated, and the
//! concatenated text is truncated to the configured maximum length.

use std::sync::Arc;

use serde_json::Value;

use crate::memory::{Memory, MemoryItem};

/// Default per-tier score threshold.
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.35;

/// Default cap on the assembled context, in characters.
pub const DEFAULT_MAX_CONTEXT_LENGTH: usize = 8000;

const LONG_TERM_LIMIT: usize = 2;
const SHORT_TERM_LIMIT: usize = 3;
const ENTITY_LIMIT: usize = 3;
const EXTERNAL_LIMIT: usize = 3;

/// Four-tier memory facade.
pub struct ContextualMemory {
    long_term: Option<Arc<dyn Memory>>,
    short_term: Option<Arc<dyn Memory>>,
    entity: Option<Arc<dyn Memory>>,
    external: Option<Arc<dyn Memory>>,
    score_threshold: f64,
    max_context_length: usize,
}

impl ContextualMemory {
    /// Create a facade over the configured tiers. Absent tiers simply
    /// contribute nothing.
    pub fn new(
        long_term: Option<Arc<dyn Memory>>,
        short_term: Option<Arc<dyn Memory>>,
        entity: Option<Arc<dyn Memory>>,
        external: Option<Arc<dyn Memory>>,
    ) -> Self {
        Self {
            long_term,
            short_term,
            entity,
            external,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            max_context_length: DEFAULT_MAX_CONTEXT_LENGTH,
        }
    }

    /// Builder method to override the per-tier score threshold.
    pub fn with_score_threshold(mut self, threshold: f64) -> Self {
        self.score_threshold = threshold;
        self
    }

    /// Builder method to override the context length cap.
    pub fn with_max_context_length(mut self, max: usize) -> Self {
        self.max_context_length = max;
        self
    }

    /// Build the labelled context block for a task.
    ///
    /// Tier query failures are logged and the tier is skipped; the
    /// remaining tiers still contribute.
    pub async fn build_context(&self, task_description: &str, extra: &str) -> String {
        let query = format!("{task_description} {extra}").trim().to_string();
        if query.is_empty() {
            return String::new();
        }

        let mut sections = Vec::new();

        if let Some(section) = self.fetch_historical(task_description).await {
            sections.push(section);
        }
        if let Some(section) = self.fetch_recent(&query).await {
            sections.push(section);
        }
        if let Some(section) = self.fetch_entities(&query).await {
            sections.push(section);
        }
        if let Some(section) = self.fetch_external(&query).await {
            sections.push(section);
        }

        // Drop identical sections, keeping first occurrences.
        let mut seen = std::collections::HashSet::new();
        sections.retain(|s| seen.insert(s.clone()));

        let mut context = sections.join("\n");
        if context.len() > self.max_context_length {
            let mut cut = self.max_context_length;
            while !context.is_char_boundary(cut) {
                cut -= 1;
            }
            context.truncate(cut);
        }
        context
    }

    async fn fetch_historical(&self, task_description: &str) -> Option<String> {
        let ltm = self.long_term.as_ref()?;
        let items = match ltm
            .search(task_description, LONG_TERM_LIMIT, self.score_threshold)
            .await
        {
            Ok(items) => items,
            Err(err) => {
                log::warn!("long-term memory query failed: {err}");
                return None;
            }
        };

        // Suggestions are extracted from metadata and deduplicated
        // across items, preserving first-seen order.
        let mut suggestions: Vec<String> = Vec::new();
        for item in &items {
            if let Some(Value::Array(entries)) = item.metadata.get("suggestions") {
                for entry in entries {
                    if let Some(text) = entry.as_str() {
                        if !suggestions.iter().any(|s| s == text) {
                            suggestions.push(text.to_string());
                        }
                    }
                }
            }
        }

        if suggestions.is_empty() {
            return None;
        }
        Some(format_section("Historical Data:", &suggestions))
    }

    async fn fetch_recent(&self, query: &str) -> Option<String> {
        let stm = self.short_term.as_ref()?;
        let items = match stm.search(query, SHORT_TERM_LIMIT, self.score_threshold).await {
            Ok(items) => items,
            Err(err) => {
                log::warn!("short-term memory query failed: {err}");
                return None;
            }
        };

        let lines: Vec<String> = items.iter().map(insight_text).collect();
        if lines.is_empty() {
            return None;
        }
        Some(format_section("Recent Insights:", &lines))
    }

    async fn fetch_entities(&self, query: &str) -> Option<String> {
        let em = self.entity.as_ref()?;
        let items = match em.search(query, ENTITY_LIMIT, self.score_threshold).await {
            Ok(items) => items,
            Err(err) => {
                log::warn!("entity memory query failed: {err}");
                return None;
            }
        };

        let lines: Vec<String> = items.iter().map(|i| i.value_text()).collect();
        if lines.is_empty() {
            return None;
        }
        Some(format_section("Entities:", &lines))
    }

    async fn fetch_external(&self, query: &str) -> Option<String> {
        let exm = self.external.as_ref()?;
        let items = match exm.search(query, EXTERNAL_LIMIT, self.score_threshold).await {
            Ok(items) => items,
            Err(err) => {
                log::warn!("external memory query failed: {err}");
                return None;
            }
        };

        let lines: Vec<String> = items.iter().map(|i| i.value_text()).collect();
        if lines.is_empty() {
            return None;
        }
        Some(format_section("External memories:", &lines))
    }
}

/// Short-term items prefer the `context` metadata entry over the raw
/// value.
fn insight_text(item: &MemoryItem) -> String {
    item.metadata
        .get("context")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| item.value_text())
}

fn format_section(label: &str, lines: &[String]) -> String {
    let bullets: Vec<String> = lines.iter().map(|l| format!("- {l}")).collect();
    format!("{label}\n{}", bullets.join("\n"))
}

impl std::fmt::Debug for ContextualMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextualMemory")
            .field("long_term", &self.long_term.is_some())
            .field("short_term", &self.short_term.is_some())
            .field("entity", &self.entity.is_some())
            .field("external", &self.external.is_some())
            .field("score_threshold", &self.score_threshold)
            .field("max_context_length", &self.max_context_length)
            .finish()
    }
}

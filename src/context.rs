//! Context assembly: builds the prompt body for a task.
//!
//! The body starts from the task description and accretes, in order:
//! expected output, human input, dependency context, the tool catalog
//! with the usage instruction, the memory section (flat or four-tier),
//! and the knowledge sections. Memory and knowledge query failures are
//! logged and contribute nothing; they never fail the build.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::events::{Event, EventBus, EventKind, EventSource};
use crate::knowledge::{KnowledgeQueryOptions, KnowledgeSource};
use crate::memory::contextual::DEFAULT_SCORE_THRESHOLD;
use crate::memory::AgentMemory;
use crate::task::{Task, MARKDOWN_INSTRUCTION};
use crate::tools::ToolInvocationContext;

/// Instruction block appended after the tool catalog.
pub const TOOL_USAGE_INSTRUCTION: &str = "To use a tool, respond with a JSON object \
with 'tool' and 'args' keys, where 'args' matches the tool's declared parameters.";

/// Number of items requested from the flat memory facade.
const MEMORY_QUERY_LIMIT: usize = 5;

/// Builds the prompt body for one execution.
pub struct ContextAssembler<'a> {
    /// The task being executed.
    pub task: &'a Task,
    /// Resolved tool set for the execution.
    pub tools: &'a ToolInvocationContext,
    /// The agent's configured memory pathway, if any.
    pub memory: Option<&'a AgentMemory>,
    /// The agent's knowledge sources.
    pub knowledge: &'a [Arc<dyn KnowledgeSource>],
    /// Bus receiving build and query events.
    pub bus: &'a EventBus,
    /// Source stamped on emitted events.
    pub source: EventSource,
}

impl<'a> ContextAssembler<'a> {
    /// Assemble the prompt body.
    pub async fn build(&self, cancel: &CancellationToken) -> String {
        self.bus.emit(Event::new(
            EventKind::ContextBuildStarted,
            self.source.clone(),
        ));

        let mut body = self.task.description.clone();

        if !self.task.expected_output.trim().is_empty() {
            body.push_str(&format!(
                "\n\nExpected Output: {}",
                self.task.expected_output
            ));
        }

        if self.task.human_input {
            if let Some(input) = self
                .task
                .human_input_received
                .as_deref()
                .filter(|s| !s.is_empty())
            {
                body.push_str(&format!("\n\nHuman Input: {input}"));
            }
        }

        if let Some(context) = self
            .task
            .prompt_context
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            body.push_str(&format!("\n\nContext:\n{context}"));
        }

        if !self.tools.is_empty() {
            body.push_str(&format!(
                "\n\nAvailable Tools:\n{}\n\n{}",
                self.tools.render(),
                TOOL_USAGE_INSTRUCTION
            ));
        }

        if let Some(section) = self.memory_section().await {
            body.push_str(&section);
        }

        if let Some(section) = self.knowledge_section(cancel).await {
            body.push_str(&section);
        }

        if self.task.markdown {
            body.push_str(&format!("\n\n{MARKDOWN_INSTRUCTION}"));
        }

        self.bus.emit(
            Event::new(EventKind::ContextBuildCompleted, self.source.clone())
                .with("length", body.len() as u64),
        );

        body
    }

    async fn memory_section(&self) -> Option<String> {
        match self.memory? {
            AgentMemory::Simple(memory) => {
                self.bus.emit(
                    Event::new(EventKind::MemoryQueryStarted, self.source.clone())
                        .with("limit", MEMORY_QUERY_LIMIT as u64),
                );

                match memory
                    .search(
                        &self.task.description,
                        MEMORY_QUERY_LIMIT,
                        DEFAULT_SCORE_THRESHOLD,
                    )
                    .await
                {
                    Ok(items) => {
                        self.bus.emit(
                            Event::new(EventKind::MemoryQueryCompleted, self.source.clone())
                                .with("results", items.len() as u64),
                        );
                        let joined = items
                            .iter()
                            .map(|item| item.value_text())
                            .collect::<Vec<_>>()
                            .join("\n");
                        if joined.is_empty() {
                            None
                        } else {
                            Some(format!("\n\nRelevant Memory:\n{joined}"))
                        }
                    }
                    Err(err) => {
                        log::warn!("memory query failed, skipping memory section: {err}");
                        self.bus.emit(
                            Event::new(EventKind::MemoryQueryFailed, self.source.clone())
                                .with("error", err.to_string()),
                        );
                        None
                    }
                }
            }
            AgentMemory::Contextual(contextual) => {
                self.bus.emit(Event::new(
                    EventKind::MemoryRetrievalStarted,
                    self.source.clone(),
                ));
                let extra = self.task.prompt_context.as_deref().unwrap_or("");
                let context = contextual
                    .build_context(&self.task.description, extra)
                    .await;
                self.bus.emit(
                    Event::new(EventKind::MemoryRetrievalCompleted, self.source.clone())
                        .with("length", context.len() as u64),
                );
                if context.is_empty() {
                    None
                } else {
                    Some(format!("\n\n{context}"))
                }
            }
        }
    }

    async fn knowledge_section(&self, cancel: &CancellationToken) -> Option<String> {
        if self.knowledge.is_empty() {
            return None;
        }

        let options = KnowledgeQueryOptions::default();
        let mut lines = Vec::new();

        for source in self.knowledge {
            self.bus.emit(
                Event::new(EventKind::KnowledgeQueryStarted, self.source.clone())
                    .with("source", source.name()),
            );

            match source.query(&self.task.description, &options, cancel).await {
                Ok(items) => {
                    self.bus.emit(
                        Event::new(EventKind::KnowledgeQueryCompleted, self.source.clone())
                            .with("source", source.name())
                            .with("results", items.len() as u64),
                    );
                    for item in items {
                        lines.push(format!("[{}] {}", source.name(), item.content));
                    }
                }
                Err(err) => {
                    log::warn!(
                        "knowledge query against '{}' failed, skipping: {err}",
                        source.name()
                    );
                    self.bus.emit(
                        Event::new(EventKind::KnowledgeQueryCompleted, self.source.clone())
                            .with("source", source.name())
                            .with("error", err.to_string()),
                    );
                }
            }
        }

        if lines.is_empty() {
            None
        } else {
            Some(format!("\n\nRelevant Knowledge:\n{}", lines.join("\n")))
        }
    }
}

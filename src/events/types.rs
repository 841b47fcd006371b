//! Typed event records emitted at every phase boundary of an execution.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Every event kind the runtime emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    ToolUsageStarted,
    ToolUsageCompleted,
    MemoryRetrievalStarted,
    MemoryRetrievalCompleted,
    KnowledgeQueryStarted,
    KnowledgeQueryCompleted,
    HumanInputRequested,
    HumanInputReceived,
    ReasoningStarted,
    ReasoningCompleted,
    ReasoningError,
    ContextBuildStarted,
    ContextBuildCompleted,
    ContextBuildFailed,
    MemorySaveStarted,
    MemorySaveCompleted,
    MemorySaveFailed,
    MemoryQueryStarted,
    MemoryQueryCompleted,
    MemoryQueryFailed,
}

impl EventKind {
    /// Snake-case discriminator string, as used in payload logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ExecutionStarted => "execution_started",
            EventKind::ExecutionCompleted => "execution_completed",
            EventKind::ExecutionFailed => "execution_failed",
            EventKind::ToolUsageStarted => "tool_usage_started",
            EventKind::ToolUsageCompleted => "tool_usage_completed",
            EventKind::MemoryRetrievalStarted => "memory_retrieval_started",
            EventKind::MemoryRetrievalCompleted => "memory_retrieval_completed",
            EventKind::KnowledgeQueryStarted => "knowledge_query_started",
            EventKind::KnowledgeQueryCompleted => "knowledge_query_completed",
            EventKind::HumanInputRequested => "human_input_requested",
            EventKind::HumanInputReceived => "human_input_received",
            EventKind::ReasoningStarted => "reasoning_started",
            EventKind::ReasoningCompleted => "reasoning_completed",
            EventKind::ReasoningError => "reasoning_error",
            EventKind::ContextBuildStarted => "context_build_started",
            EventKind::ContextBuildCompleted => "context_build_completed",
            EventKind::ContextBuildFailed => "context_build_failed",
            EventKind::MemorySaveStarted => "memory_save_started",
            EventKind::MemorySaveCompleted => "memory_save_completed",
            EventKind::MemorySaveFailed => "memory_save_failed",
            EventKind::MemoryQueryStarted => "memory_query_started",
            EventKind::MemoryQueryCompleted => "memory_query_completed",
            EventKind::MemoryQueryFailed => "memory_query_failed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The entity an event originated from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventSource {
    /// Identifier of the emitting agent.
    pub agent_id: String,
    /// Role of the emitting agent.
    pub agent_role: String,
    /// Task being executed when the event fired, if any.
    pub task_id: Option<String>,
}

/// A single emitted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event instance.
    pub id: String,
    /// Event kind discriminator.
    pub kind: EventKind,
    /// UTC creation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Emitting entity.
    pub source: EventSource,
    /// Free-form payload.
    pub payload: HashMap<String, Value>,
}

impl Event {
    /// Create an event with an empty payload.
    pub fn new(kind: EventKind, source: EventSource) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            timestamp: Utc::now(),
            source,
            payload: HashMap::new(),
        }
    }

    /// Attach a payload entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_snake_case() {
        assert_eq!(EventKind::ExecutionStarted.as_str(), "execution_started");
        assert_eq!(EventKind::ToolUsageCompleted.as_str(), "tool_usage_completed");
        assert_eq!(EventKind::MemoryQueryFailed.as_str(), "memory_query_failed");
    }

    #[test]
    fn payload_builder_accumulates() {
        let event = Event::new(EventKind::ExecutionStarted, EventSource::default())
            .with("execution_id", 7)
            .with("task", "t1");
        assert_eq!(event.payload.len(), 2);
        assert_eq!(event.payload["execution_id"], 7);
    }
}

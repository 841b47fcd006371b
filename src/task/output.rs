//! Task output representation and the output builder.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::LLMResponse;
use crate::task::{OutputFormat, Task};

/// Number of whitespace-separated tokens kept in the summary.
const SUMMARY_TOKENS: usize = 15;

/// The structured result of one task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Raw model output.
    pub raw: String,
    /// Parsed JSON map, when the raw output parses as an object.
    pub json: Option<HashMap<String, Value>>,
    /// Typed object facade for `OutputFormat::Typed` tasks.
    pub typed: Option<Value>,
    /// Role of the agent that produced the output.
    pub agent_role: String,
    /// Identifier of the executed task.
    pub task_id: String,
    /// Task description at execution time.
    pub description: String,
    /// First tokens of the raw output, ellipsized.
    pub summary: String,
    /// The task's expected-output hint.
    pub expected_output: String,
    /// Output format tag.
    pub output_format: OutputFormat,
    /// Wall-clock execution time, stamped by the execution controller.
    pub execution_time: Duration,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Total tokens consumed.
    pub tokens_used: u64,
    /// Cost in USD.
    pub cost: f64,
    /// Model that produced the output.
    pub model: String,
    /// Whether the output passed validation (guardrail, completion).
    pub is_valid: bool,
    /// Guardrail or structural validation failure, if any.
    pub validation_error: Option<String>,
    /// Sorted unique names of tools used during execution.
    pub tools_used: Vec<String>,
    /// Free-form execution metadata (finish reason, token split, mode,
    /// agent id, trace id).
    pub metadata: HashMap<String, Value>,
}

impl TaskOutput {
    /// Build an output from a task and an LLM response.
    ///
    /// Fills summary, JSON parsing, usage, and metadata; the execution
    /// controller stamps `execution_time` afterwards.
    pub fn build(task: &Task, response: &LLMResponse, agent_id: &str, agent_role: &str) -> Self {
        let raw = response.content.clone();
        let mut output_format = task.output_format;
        let mut json = None;

        // JSON parsing: requested format, or both braces present.
        let attempt_json = output_format == OutputFormat::Json
            || (raw.contains('{') && raw.contains('}'));
        if attempt_json {
            if let Some(map) = parse_json_object(&raw) {
                json = Some(map);
                if output_format == OutputFormat::Raw {
                    output_format = OutputFormat::Json;
                }
            }
        }

        let mut metadata = HashMap::new();
        metadata.insert(
            "finish_reason".to_string(),
            Value::String(response.finish_reason.clone()),
        );
        metadata.insert(
            "prompt_tokens".to_string(),
            Value::from(response.usage.prompt_tokens),
        );
        metadata.insert(
            "completion_tokens".to_string(),
            Value::from(response.usage.completion_tokens),
        );
        metadata.insert("agent_id".to_string(), Value::String(agent_id.to_string()));

        Self {
            summary: summarize(&raw),
            raw,
            json,
            typed: None,
            agent_role: agent_role.to_string(),
            task_id: task.id.to_string(),
            description: task.description.clone(),
            expected_output: task.expected_output.clone(),
            output_format,
            execution_time: Duration::ZERO,
            created_at: Utc::now(),
            tokens_used: response.usage.total_tokens,
            cost: response.usage.cost,
            model: response.model.clone(),
            is_valid: true,
            validation_error: None,
            tools_used: Vec::new(),
            metadata,
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// JSON string of the parsed map, when present.
    pub fn json_string(&self) -> Option<String> {
        self.json
            .as_ref()
            .and_then(|map| serde_json::to_string(map).ok())
    }
}

impl fmt::Display for TaskOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// First [`SUMMARY_TOKENS`] whitespace-separated tokens; the raw text
/// verbatim when it is short enough, ellipsized otherwise.
pub fn summarize(raw: &str) -> String {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.len() <= SUMMARY_TOKENS {
        return raw.to_string();
    }
    format!("{}...", tokens[..SUMMARY_TOKENS].join(" "))
}

/// Parse the raw text as a JSON object; falls back to the outermost
/// brace-delimited slice when the full text is not valid JSON.
fn parse_json_object(raw: &str) -> Option<HashMap<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw.trim()) {
        return Some(map.into_iter().collect());
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&raw[start..=end]) {
        Ok(Value::Object(map)) => Some(map.into_iter().collect()),
        _ => None,
    }
}

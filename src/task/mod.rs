//! Declarative tasks.
//!
//! A [`Task`] pairs a natural-language description with an
//! expected-output hint plus optional constraints: a task-scoped tool
//! list, an output format, a guardrail, human-input requirements, and a
//! free-form context bag. Dependency outputs from other tasks arrive
//! already resolved as `prompt_context`; the runtime never walks a task
//! graph itself.

pub mod guardrail;
mod output;

use std::collections::HashMap;
use std::sync::Arc;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AgentError;
use crate::tools::Tool;

pub use guardrail::{FnGuardrail, Guardrail, GuardrailResult};
pub use output::{summarize, TaskOutput};

/// Instruction block appended to the prompt when `markdown` is set.
pub const MARKDOWN_INSTRUCTION: &str = "Your final answer MUST be formatted in Markdown syntax.\n\
Follow these guidelines:\n\
- Use # for headers\n\
- Use ** for bold text\n\
- Use * for italic text\n\
- Use - or * for bullet points\n\
- Use `code` for inline code\n\
- Use ```language for code blocks";

/// Output format tag for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain text.
    Raw,
    /// JSON object expected.
    Json,
    /// Caller-defined typed object.
    Typed,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Raw
    }
}

/// Callback invoked with the built output after execution.
pub type TaskCallback = Arc<dyn Fn(&TaskOutput) -> Result<(), anyhow::Error> + Send + Sync>;

/// A declarative unit of work.
#[derive(Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: Uuid,
    /// Optional name.
    pub name: Option<String>,
    /// Descriptive text detailing the task's purpose. Mutable: the
    /// reasoning hook may append a plan to it before execution.
    pub description: String,
    /// Clear definition of the expected outcome.
    pub expected_output: String,
    /// Output format tag.
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Free-form context bag.
    #[serde(default)]
    pub context: HashMap<String, Value>,
    /// Dependency outputs from preceding tasks, already rendered to a
    /// string by the caller.
    pub prompt_context: Option<String>,
    /// Task-scoped tools. When non-empty this list replaces the agent's
    /// tools entirely for the execution.
    #[serde(skip)]
    pub tools: Vec<Arc<Tool>>,
    /// Identifier of a pre-assigned agent, if any.
    pub agent: Option<String>,
    /// Whether the caller intends to run this task asynchronously.
    pub async_execution: bool,
    /// File path the raw output is persisted to after execution.
    pub output_file: Option<String>,
    /// Whether missing parent directories of `output_file` are created.
    pub create_directory: bool,
    /// Current retry count.
    pub retry_count: u32,
    /// Maximum retries allowed.
    pub max_retries: u32,
    /// Post-hoc output validator.
    #[serde(skip)]
    pub guardrail: Option<Arc<dyn Guardrail>>,
    /// Completion callback.
    #[serde(skip)]
    pub callback: Option<TaskCallback>,
    /// Whether the final answer must be markdown-formatted.
    pub markdown: bool,
    /// Whether execution must collect human input first.
    pub human_input: bool,
    /// The received human input, when `human_input` is set.
    pub human_input_received: Option<String>,

    /// Original description before interpolation.
    #[serde(skip)]
    original_description: Option<String>,
    /// Original expected output before interpolation.
    #[serde(skip)]
    original_expected_output: Option<String>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("expected_output", &self.expected_output)
            .field("tools", &self.tools.len())
            .field("human_input", &self.human_input)
            .finish_non_exhaustive()
    }
}

impl Clone for Task {
    fn clone(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            description: self.description.clone(),
            expected_output: self.expected_output.clone(),
            output_format: self.output_format,
            context: self.context.clone(),
            prompt_context: self.prompt_context.clone(),
            tools: self.tools.clone(),
            agent: self.agent.clone(),
            async_execution: self.async_execution,
            output_file: self.output_file.clone(),
            create_directory: self.create_directory,
            retry_count: 0,
            max_retries: self.max_retries,
            guardrail: self.guardrail.clone(),
            callback: self.callback.clone(),
            markdown: self.markdown,
            human_input: self.human_input,
            human_input_received: self.human_input_received.clone(),
            original_description: self.original_description.clone(),
            original_expected_output: self.original_expected_output.clone(),
        }
    }
}

impl Task {
    /// Create a task with the required fields.
    pub fn new(description: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: None,
            description: description.into(),
            expected_output: expected_output.into(),
            output_format: OutputFormat::Raw,
            context: HashMap::new(),
            prompt_context: None,
            tools: Vec::new(),
            agent: None,
            async_execution: false,
            output_file: None,
            create_directory: true,
            retry_count: 0,
            max_retries: 3,
            guardrail: None,
            callback: None,
            markdown: false,
            human_input: false,
            human_input_received: None,
            original_description: None,
            original_expected_output: None,
        }
    }

    /// Builder method to attach task-scoped tools.
    pub fn with_tools(mut self, tools: Vec<Arc<Tool>>) -> Self {
        self.tools = tools;
        self
    }

    /// Builder method to set the output format.
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Builder method to attach a guardrail.
    pub fn with_guardrail(mut self, guardrail: Arc<dyn Guardrail>) -> Self {
        self.guardrail = Some(guardrail);
        self
    }

    /// Builder method to require human input before execution.
    pub fn with_human_input(mut self) -> Self {
        self.human_input = true;
        self
    }

    /// Check the task's structural invariants.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.description.trim().is_empty() {
            return Err(AgentError::Validation(
                "task description must not be empty".to_string(),
            ));
        }
        if self.expected_output.trim().is_empty() {
            return Err(AgentError::Validation(
                "task expected_output must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Merge entries into the context bag. Existing keys are
    /// overwritten by incoming ones; absent keys are preserved.
    pub fn set_context(&mut self, entries: HashMap<String, Value>) {
        self.context.extend(entries);
    }

    /// Replace the context bag entirely.
    pub fn replace_context(&mut self, entries: HashMap<String, Value>) {
        self.context = entries;
    }

    /// Record the human input collected for this task.
    pub fn set_human_input(&mut self, input: impl Into<String>) {
        self.human_input_received = Some(input.into());
    }

    /// Stable MD5 fingerprint over description|expected_output,
    /// computed from the pre-interpolation originals when present.
    pub fn key(&self) -> String {
        let description = self
            .original_description
            .as_deref()
            .unwrap_or(&self.description);
        let expected = self
            .original_expected_output
            .as_deref()
            .unwrap_or(&self.expected_output);

        let mut hasher = Md5::new();
        hasher.update(format!("{description}|{expected}").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Interpolate `{placeholder}` inputs into description and expected
    /// output, preserving the originals for `key()` stability.
    pub fn interpolate_inputs(&mut self, inputs: &HashMap<String, String>) {
        if self.original_description.is_none() {
            self.original_description = Some(self.description.clone());
        }
        if self.original_expected_output.is_none() {
            self.original_expected_output = Some(self.expected_output.clone());
        }

        if inputs.is_empty() {
            return;
        }

        if let Some(ref original) = self.original_description {
            self.description = interpolate(original, inputs);
        }
        if let Some(ref original) = self.original_expected_output {
            self.expected_output = interpolate(original, inputs);
        }
    }

    /// Persist the raw output to `output_file`.
    pub fn save_file(&self, raw: &str) -> Result<(), AgentError> {
        let output_file = self
            .output_file
            .as_ref()
            .ok_or_else(|| AgentError::Config("output_file is not set".to_string()))?;

        let path = std::path::Path::new(output_file);
        if self.create_directory {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AgentError::Config(format!("failed to create output directory: {e}"))
                })?;
            }
        }
        std::fs::write(path, raw)
            .map_err(|e| AgentError::Config(format!("failed to save output file: {e}")))
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Task(description={}, expected_output={})",
            self.description, self.expected_output
        )
    }
}

/// Predicate deciding whether a conditional task executes.
pub type TaskCondition = Arc<dyn Fn(&TaskOutput) -> bool + Send + Sync>;

/// A task that executes only when its predicate accepts the previous
/// task's output; otherwise it yields a canonical skipped output.
pub struct ConditionalTask {
    /// The wrapped task.
    pub task: Task,
    condition: TaskCondition,
}

impl ConditionalTask {
    /// Wrap a task with an execution predicate.
    pub fn new(task: Task, condition: impl Fn(&TaskOutput) -> bool + Send + Sync + 'static) -> Self {
        Self {
            task,
            condition: Arc::new(condition),
        }
    }

    /// Evaluate the predicate against the preceding output.
    pub fn should_execute(&self, previous: &TaskOutput) -> bool {
        (self.condition)(previous)
    }

    /// The canonical output for a skipped task: empty raw text, valid,
    /// tagged in metadata.
    pub fn skipped_output(&self, agent_role: &str) -> TaskOutput {
        let mut metadata = HashMap::new();
        metadata.insert("skipped".to_string(), Value::Bool(true));
        TaskOutput {
            raw: String::new(),
            json: None,
            typed: None,
            agent_role: agent_role.to_string(),
            task_id: self.task.id.to_string(),
            description: self.task.description.clone(),
            summary: "Skipped".to_string(),
            expected_output: self.task.expected_output.clone(),
            output_format: self.task.output_format,
            execution_time: std::time::Duration::ZERO,
            created_at: chrono::Utc::now(),
            tokens_used: 0,
            cost: 0.0,
            model: String::new(),
            is_valid: true,
            validation_error: None,
            tools_used: Vec::new(),
            metadata,
        }
    }
}

/// Replace `{key}` placeholders with the corresponding input values.
fn interpolate(template: &str, inputs: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in inputs {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

//! Tool abstractions.
//!
//! A [`Tool`] wraps an async handler behind a name, a description, a
//! JSON-schema-like parameter tree, and a usage counter with an optional
//! limit. Tools are added to an agent or to a task; the per-execution
//! resolution and dispatch logic lives in [`invocation`].

pub mod invocation;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ToolError;

pub use invocation::{ToolInvocationContext, ToolOutcome};

/// Usage limit sentinel meaning "unbounded".
pub const UNLIMITED_USAGE: i64 = -1;

/// One declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    /// JSON type name (`"string"`, `"number"`, `"object"`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable description shown in the tool catalog.
    pub description: String,
}

/// Parameter tree plus required list for a tool.
///
/// The tree is kept sorted by parameter name so catalog rendering and
/// schema emission are deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Declared parameters by name.
    pub parameters: BTreeMap<String, ToolParameter>,
    /// Names of parameters that must be present.
    pub required: Vec<String>,
}

impl ToolSchema {
    /// Create an empty schema (a tool taking no arguments).
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter.
    pub fn parameter(
        mut self,
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.insert(
            name.into(),
            ToolParameter {
                kind: kind.into(),
                description: description.into(),
            },
        );
        self
    }

    /// Mark parameters as required.
    pub fn require(mut self, names: &[&str]) -> Self {
        for name in names {
            let name = name.to_string();
            if !self.required.contains(&name) {
                self.required.push(name);
            }
        }
        self
    }

    /// Emit the JSON-schema object for the LLM function-schema shape.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        for (name, param) in &self.parameters {
            properties.insert(
                name.clone(),
                serde_json::json!({
                    "type": param.kind,
                    "description": param.description,
                }),
            );
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }
}

/// Boxed async tool handler.
///
/// Synchronous handlers wrap through [`Tool::from_fn`].
pub type ToolHandler =
    Arc<dyn Fn(HashMap<String, Value>) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct UsageState {
    count: u32,
    limit: i64,
}

/// A callable tool with a schema and a usage counter.
///
/// The counter and limit sit behind the tool's own lock so that
/// increment-and-check is atomic per invocation, including across
/// concurrent executions sharing the tool through an `Arc`.
pub struct Tool {
    name: String,
    description: String,
    schema: ToolSchema,
    handler: ToolHandler,
    usage: Mutex<UsageState>,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let usage = self.usage.lock();
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("usage_count", &usage.count)
            .field("usage_limit", &usage.limit)
            .finish()
    }
}

impl Tool {
    /// Create a tool from an async handler.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: ToolSchema::default(),
            handler,
            usage: Mutex::new(UsageState {
                count: 0,
                limit: UNLIMITED_USAGE,
            }),
        }
    }

    /// Create a tool from a synchronous closure.
    pub fn from_fn<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        func: F,
    ) -> Self
    where
        F: Fn(HashMap<String, Value>) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        let handler: ToolHandler = Arc::new(move |args| {
            let func = func.clone();
            Box::pin(async move { func(args) })
        });
        Self::new(name, description, handler)
    }

    /// Builder method to attach a parameter schema.
    pub fn with_schema(mut self, schema: ToolSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Builder method to set the usage limit. Negative means unlimited.
    pub fn with_usage_limit(self, limit: i64) -> Self {
        self.usage.lock().limit = limit;
        self
    }

    /// The tool's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description shown to the model.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared parameter schema.
    pub fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    /// Current usage count.
    pub fn usage_count(&self) -> u32 {
        self.usage.lock().count
    }

    /// Configured usage limit ([`UNLIMITED_USAGE`] when unbounded).
    pub fn usage_limit(&self) -> i64 {
        self.usage.lock().limit
    }

    /// Whether further calls would be rejected.
    pub fn is_exhausted(&self) -> bool {
        let usage = self.usage.lock();
        usage.limit >= 0 && i64::from(usage.count) > usage.limit
    }

    /// Reset the usage counter to zero.
    pub fn reset_usage(&self) {
        self.usage.lock().count = 0;
    }

    /// Record an invocation attempt.
    ///
    /// The counter increments whether or not the attempt is admitted;
    /// a rejected attempt returns `UsageLimitExceeded`.
    pub(crate) fn register_attempt(&self) -> Result<u32, ToolError> {
        let mut usage = self.usage.lock();
        usage.count += 1;
        if usage.limit >= 0 && i64::from(usage.count) > usage.limit {
            return Err(ToolError::UsageLimitExceeded {
                name: self.name.clone(),
                count: usage.count,
                limit: usage.limit,
            });
        }
        Ok(usage.count)
    }

    /// Check the args against the schema's required list.
    pub fn validate_args(&self, args: &HashMap<String, Value>) -> Result<(), ToolError> {
        for required in &self.schema.required {
            if !args.contains_key(required) {
                return Err(ToolError::InvalidArguments {
                    name: self.name.clone(),
                    message: format!("missing required parameter '{required}'"),
                });
            }
        }
        Ok(())
    }

    /// Start the handler for the given args.
    pub(crate) fn run_handler(
        &self,
        args: HashMap<String, Value>,
    ) -> BoxFuture<'static, Result<Value, ToolError>> {
        (self.handler)(args)
    }

    /// LLM function-schema wire shape for this tool.
    pub fn function_schema(&self) -> Value {
        crate::llm::function_schema(&self.name, &self.description, self.schema.to_json_schema())
    }
}

/// Render the prompt catalog for a tool set.
///
/// Each tool renders as name, description, parameter list, and required
/// CSV; tools are separated by a blank line. An empty set renders as
/// `"No tools available."`.
pub fn render_catalog(tools: &[Arc<Tool>]) -> String {
    if tools.is_empty() {
        return "No tools available.".to_string();
    }

    let mut sections = Vec::with_capacity(tools.len());
    for tool in tools {
        let mut lines = vec![format!("{}: {}", tool.name(), tool.description())];
        if !tool.schema().parameters.is_empty() {
            lines.push("  Parameters:".to_string());
            for (name, param) in &tool.schema().parameters {
                lines.push(format!("    - {}: {}", name, param.description));
            }
        }
        if !tool.schema().required.is_empty() {
            lines.push(format!("  Required: {}", tool.schema().required.join(", ")));
        }
        sections.push(lines.join("\n"));
    }
    sections.join("\n\n")
}

//! Per-execution tool invocation context.
//!
//! Binds an agent, a task, and the resolved tool set for one execution.
//! Resolution is task-scope-overrides-agent-scope in full: a task that
//! declares any tools replaces the agent's list entirely, never a merge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::errors::ToolError;
use crate::events::{Event, EventBus, EventKind, EventSource};
use crate::tools::{render_catalog, Tool};

/// Result of an asynchronous tool invocation.
#[derive(Debug)]
pub struct ToolOutcome {
    /// Handler result or rejection.
    pub result: Result<Value, ToolError>,
    /// Handler execution time (zero when the call was rejected before
    /// the handler ran).
    pub duration: Duration,
    /// Invocation metadata (tool name, duration in milliseconds).
    pub metadata: HashMap<String, Value>,
}

/// Tool set and auxiliary state for a single task execution.
pub struct ToolInvocationContext {
    tools: Vec<Arc<Tool>>,
    bus: Arc<EventBus>,
    source: EventSource,
    state: Mutex<HashMap<String, Value>>,
}

impl ToolInvocationContext {
    /// Resolve the tool set for an execution and bind it to the event
    /// source describing the running agent/task pair.
    ///
    /// Task tools take precedence over agent tools when non-empty;
    /// nameless tools are dropped and order is preserved.
    pub fn resolve(
        agent_tools: &[Arc<Tool>],
        task_tools: &[Arc<Tool>],
        bus: Arc<EventBus>,
        source: EventSource,
    ) -> Self {
        let scope = if task_tools.is_empty() {
            agent_tools
        } else {
            task_tools
        };
        let tools = scope
            .iter()
            .filter(|t| !t.name().is_empty())
            .cloned()
            .collect();

        Self {
            tools,
            bus,
            source,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// The resolved tool set.
    pub fn tools(&self) -> &[Arc<Tool>] {
        &self.tools
    }

    /// Whether any tools are available.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// O(n) lookup by tool name.
    pub fn find(&self, name: &str) -> Option<&Arc<Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Prompt catalog for the resolved set.
    pub fn render(&self) -> String {
        render_catalog(&self.tools)
    }

    /// Function schemas for the resolved set, in the LLM wire shape.
    pub fn function_schemas(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.function_schema()).collect()
    }

    /// Store a value in the cross-step auxiliary bag.
    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.state.lock().insert(key.into(), value);
    }

    /// Read a value from the cross-step auxiliary bag.
    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.state.lock().get(key).cloned()
    }

    fn available_names(&self) -> String {
        self.tools
            .iter()
            .map(|t| t.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Execute a tool synchronously within the caller's context.
    ///
    /// The usage counter increments before admission is decided, so a
    /// rejected call still counts as an attempt. Cancellation preempts
    /// the handler at its next suspension point.
    pub async fn execute(
        &self,
        name: &str,
        args: HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let (result, _duration) = self.execute_timed(name, args, cancel).await;
        result
    }

    /// Execute a tool and return a single-slot channel with the outcome.
    ///
    /// The channel is written exactly once and a dropped receiver never
    /// blocks the producer.
    pub fn execute_async(
        self: &Arc<Self>,
        name: &str,
        args: HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> oneshot::Receiver<ToolOutcome> {
        let (tx, rx) = oneshot::channel();
        let ctx = Arc::clone(self);
        let name = name.to_string();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let (result, duration) = ctx.execute_timed(&name, args, &cancel).await;
            let mut metadata = HashMap::new();
            metadata.insert("tool".to_string(), Value::String(name));
            metadata.insert(
                "duration_ms".to_string(),
                Value::from(duration.as_millis() as u64),
            );
            let _ = tx.send(ToolOutcome {
                result,
                duration,
                metadata,
            });
        });

        rx
    }

    async fn execute_timed(
        &self,
        name: &str,
        args: HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> (Result<Value, ToolError>, Duration) {
        let tool = match self.find(name) {
            Some(tool) => Arc::clone(tool),
            None => {
                return (
                    Err(ToolError::NotFound {
                        name: name.to_string(),
                        available: self.available_names(),
                    }),
                    Duration::ZERO,
                )
            }
        };

        if let Err(err) = tool.register_attempt() {
            return (Err(err), Duration::ZERO);
        }
        if let Err(err) = tool.validate_args(&args) {
            return (Err(err), Duration::ZERO);
        }

        self.bus.emit(
            Event::new(EventKind::ToolUsageStarted, self.source.clone())
                .with("tool", tool.name())
                .with("usage_count", tool.usage_count()),
        );

        let started = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ToolError::Cancelled {
                name: tool.name().to_string(),
            }),
            result = tool.run_handler(args) => result,
        };
        let duration = started.elapsed();

        self.bus.emit(
            Event::new(EventKind::ToolUsageCompleted, self.source.clone())
                .with("tool", tool.name())
                .with("success", result.is_ok())
                .with("duration_ms", duration.as_millis() as u64),
        );

        (result, duration)
    }
}

impl std::fmt::Debug for ToolInvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolInvocationContext")
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("source", &self.source)
            .finish()
    }
}

//! Error types for the crewkit execution surface.
//!
//! Two enums cover the crate: [`ToolError`] for the tool invocation
//! subsystem and [`AgentError`] for everything that can surface from an
//! agent execution. Memory and knowledge storage seams use
//! `anyhow::Error`; those failures are logged and treated as empty
//! results during context assembly rather than propagated.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the tool invocation subsystem.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with the requested name exists in the resolved tool set.
    #[error("tool '{name}' not found; available tools: [{available}]")]
    NotFound { name: String, available: String },

    /// The tool's usage counter exceeded its configured limit.
    #[error("tool '{name}' usage limit exceeded ({count} > {limit})")]
    UsageLimitExceeded { name: String, count: u32, limit: i64 },

    /// The tool handler itself failed.
    #[error("tool '{name}' execution failed: {message}")]
    ExecutionFailed { name: String, message: String },

    /// The provided arguments do not satisfy the tool's schema.
    #[error("invalid arguments for tool '{name}': {message}")]
    InvalidArguments { name: String, message: String },

    /// Cancellation fired while the handler was running.
    #[error("tool '{name}' cancelled")]
    Cancelled { name: String },
}

/// Errors surfaced by agent construction and execution.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Required configuration is missing or invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Execution was attempted before `initialize` succeeded.
    #[error("agent is not initialized")]
    NotInitialized,

    /// Initialization found no LLM client.
    #[error("agent has no LLM client configured")]
    MissingLLM,

    /// The task requires human input but no handler is configured, or
    /// the handler reported that input is unavailable.
    #[error("human input unavailable: {0}")]
    HumanInputUnavailable(String),

    /// The underlying LLM transport failed.
    #[error("LLM call failed: {0}")]
    LLMCallFailed(String),

    /// A tool subsystem error.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Model output did not match any reason-act field.
    #[error("failed to parse model output: {0}")]
    Parse(String),

    /// A task or reason-act step failed structural validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A knowledge source failed to initialize or close.
    #[error("knowledge source '{name}' failed: {message}")]
    Knowledge { name: String, message: String },

    /// The deadline imposed by `execute_with_timeout` elapsed.
    #[error("execution timed out after {timeout:?}: {cause}")]
    Timeout { timeout: Duration, cause: String },

    /// Cancellation was observed at a suspension point.
    #[error("execution cancelled")]
    Cancelled,
}

impl AgentError {
    /// Whether this error is the result of cancellation or a deadline,
    /// as opposed to a genuine failure of the execution body.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AgentError::Cancelled | AgentError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_display_lists_available_tools() {
        let err = ToolError::NotFound {
            name: "search".to_string(),
            available: "calculator, text_analyzer".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'search'"));
        assert!(msg.contains("calculator, text_analyzer"));
    }

    #[test]
    fn usage_limit_error_carries_counts() {
        let err = ToolError::UsageLimitExceeded {
            name: "calculator".to_string(),
            count: 3,
            limit: 2,
        };
        assert!(err.to_string().contains("3 > 2"));
    }

    #[test]
    fn timeout_is_cancellation() {
        let err = AgentError::Timeout {
            timeout: Duration::from_millis(100),
            cause: "context cancelled".to_string(),
        };
        assert!(err.is_cancellation());
        assert!(AgentError::Cancelled.is_cancellation());
        assert!(!AgentError::NotInitialized.is_cancellation());
    }
}

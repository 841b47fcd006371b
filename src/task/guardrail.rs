//! Post-hoc output validation hook.

use std::sync::Arc;

use async_trait::async_trait;

use crate::task::TaskOutput;

/// Verdict produced by a guardrail.
#[derive(Debug, Clone)]
pub struct GuardrailResult {
    /// Whether the output is acceptable.
    pub valid: bool,
    /// Reason the output was rejected, when `valid` is false.
    pub error: Option<String>,
}

impl GuardrailResult {
    /// An accepting verdict.
    pub fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    /// A rejecting verdict with a reason.
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(reason.into()),
        }
    }
}

/// Validator invoked against a built task output.
///
/// A rejecting verdict marks the output invalid and records the reason;
/// it does not fail the execution.
#[async_trait]
pub trait Guardrail: Send + Sync {
    /// Validate the output.
    async fn validate(&self, output: &TaskOutput) -> Result<GuardrailResult, anyhow::Error>;
}

/// Guardrail backed by a plain closure.
pub struct FnGuardrail {
    func: Arc<dyn Fn(&TaskOutput) -> GuardrailResult + Send + Sync>,
}

impl FnGuardrail {
    /// Wrap a closure as a guardrail.
    pub fn new(func: impl Fn(&TaskOutput) -> GuardrailResult + Send + Sync + 'static) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl Guardrail for FnGuardrail {
    async fn validate(&self, output: &TaskOutput) -> Result<GuardrailResult, anyhow::Error> {
        Ok((self.func)(output))
    }
}

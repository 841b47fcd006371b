//! The reason-act loop.
//!
//! Drives a bounded, cancellable deliberation loop: call the model,
//! parse the response into a step, execute the step's tool if it acts,
//! append the step to the trace, extend the prompt, and repeat until a
//! final answer, an error, cancellation, or the iteration cap.

pub mod parser;
pub mod step;

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::agent::StepCallback;
use crate::errors::AgentError;
use crate::llm::{CallOptions, LLMClient, Message, TokenUsage};
use crate::tools::ToolInvocationContext;

pub use step::{ReactStep, ReactTrace, StepKind};

/// Default iteration cap.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Error recorded on the forced final step at the iteration cap.
pub const MAX_ITERATIONS_ERROR: &str = "Reached maximum iterations";

const FORCED_FINAL_ANSWER: &str =
    "Unable to determine a final answer within the allowed number of iterations.";

/// Tuning knobs for the loop.
#[derive(Debug, Clone)]
pub struct ReactConfig {
    /// Iteration cap; the loop then forces a final step.
    pub max_iterations: u32,
    /// Soft per-thought timeout for each LLM call.
    pub thought_timeout: Option<std::time::Duration>,
    /// When set, a structurally invalid step ends the loop with the
    /// step's error stamped; when unset the step is coerced to a
    /// thinking step over the raw response and the loop continues.
    pub strict_validation: bool,
    /// When set, an unparseable response becomes a final step carrying
    /// the raw text instead of failing the execution.
    pub fallback_on_parse_error: bool,
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            thought_timeout: None,
            strict_validation: true,
            fallback_on_parse_error: true,
        }
    }
}

/// Everything the loop produced.
#[derive(Debug)]
pub struct ReactRun {
    /// The step trace.
    pub trace: ReactTrace,
    /// Usage summed across all LLM calls of the loop.
    pub usage: TokenUsage,
    /// Model name from the last call, or the client's model when no
    /// call was made.
    pub model: String,
    /// Finish reason of the last call.
    pub finish_reason: String,
}

/// One reason-act execution over a prepared prompt.
pub struct ReactLoop<'a> {
    /// LLM client driving the deliberation.
    pub llm: &'a dyn LLMClient,
    /// Loop configuration.
    pub config: ReactConfig,
    /// Resolved tool set.
    pub tools: &'a ToolInvocationContext,
    /// Optional system message prepended to every call.
    pub system_message: Option<String>,
    /// Per-call options (max tokens, temperature).
    pub call_options: CallOptions,
    /// Per-step callbacks; errors are logged and swallowed.
    pub step_callbacks: &'a [StepCallback],
}

impl ReactLoop<'_> {
    /// Run the loop to termination.
    pub async fn run(
        &self,
        initial_prompt: String,
        cancel: &CancellationToken,
    ) -> Result<ReactRun, AgentError> {
        let mut prompt = initial_prompt;
        let mut trace = ReactTrace::new();
        let mut usage = TokenUsage::default();
        let mut model = self.llm.model().to_string();
        let mut finish_reason = String::new();

        loop {
            if trace.iteration_count() >= self.config.max_iterations as usize {
                let mut forced = ReactStep::final_step("", FORCED_FINAL_ANSWER);
                forced.error = Some(MAX_ITERATIONS_ERROR.to_string());
                self.append_step(&mut trace, forced);
                break;
            }

            // Cancellation is checked once per iteration, ahead of the
            // LLM call.
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let iteration_start = Instant::now();
            let response = match self.call_llm(&prompt, cancel).await {
                Ok(response) => response,
                // The per-thought timeout is soft: it ends the loop with
                // an errored step instead of failing the execution.
                Err(AgentError::Timeout { timeout, .. }) => {
                    let mut step = ReactStep::new();
                    step.error = Some(format!("thought timed out after {timeout:?}"));
                    step.duration = iteration_start.elapsed();
                    self.append_step(&mut trace, step);
                    break;
                }
                Err(err) => return Err(err),
            };
            usage.add(&response.usage);
            model = response.model.clone();
            finish_reason = response.finish_reason.clone();

            let mut step = match parser::parse(&response.content) {
                Ok(step) => step,
                Err(parse_err) => {
                    if self.config.fallback_on_parse_error {
                        let mut fallback = ReactStep::final_step("", response.content.clone());
                        fallback.error = Some(parse_err.to_string());
                        fallback.duration = iteration_start.elapsed();
                        self.append_step(&mut trace, fallback);
                        break;
                    }
                    return Err(parse_err);
                }
            };

            if let Err(invalid) = step.validate() {
                if self.config.strict_validation {
                    step.error = Some(invalid.to_string());
                    step.duration = iteration_start.elapsed();
                    self.append_step(&mut trace, step);
                    break;
                }
                step = ReactStep::new();
                step.thought = response.content.clone();
            }

            if step.is_final() {
                step.duration = iteration_start.elapsed();
                self.append_step(&mut trace, step);
                break;
            }

            if let Some(action) = step.action.clone() {
                let args = step.action_input.clone().unwrap_or_default();
                match self.tools.execute(&action, args, cancel).await {
                    Ok(value) => {
                        step.observation = Some(render_observation(&value));
                    }
                    Err(tool_err) => {
                        step.error = Some(tool_err.to_string());
                        step.duration = iteration_start.elapsed();
                        self.append_step(&mut trace, step);
                        break;
                    }
                }
            }

            step.duration = iteration_start.elapsed();
            let formatted = parser::format_step(&step)?;
            self.append_step(&mut trace, step);
            prompt.push_str(&format!("\n{formatted}\n"));
        }

        trace.finish();
        Ok(ReactRun {
            trace,
            usage,
            model,
            finish_reason,
        })
    }

    async fn call_llm(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<crate::llm::LLMResponse, AgentError> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system_message {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt.to_string()));

        let call = self.llm.call(&messages, &self.call_options, cancel);

        match self.config.thought_timeout {
            Some(timeout) => tokio::select! {
                _ = cancel.cancelled() => Err(AgentError::Cancelled),
                _ = tokio::time::sleep(timeout) => Err(AgentError::Timeout {
                    timeout,
                    cause: "thought timed out".to_string(),
                }),
                result = call => result,
            },
            None => tokio::select! {
                _ = cancel.cancelled() => Err(AgentError::Cancelled),
                result = call => result,
            },
        }
    }

    fn append_step(&self, trace: &mut ReactTrace, step: ReactStep) {
        for callback in self.step_callbacks {
            if let Err(err) = callback(&step) {
                log::warn!("step callback failed: {err}");
            }
        }
        trace.append(step);
    }
}

/// Render a tool result for the observation line.
fn render_observation(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build the initial reason-act prompt for a task.
///
/// The tool section and the action lines of the format block appear
/// only when the tool set is non-empty.
pub fn build_initial_prompt(
    description: &str,
    expected_output: &str,
    tool_catalog: Option<&str>,
) -> String {
    let mut prompt = format!("Task: {description}\n");

    if !expected_output.trim().is_empty() {
        prompt.push_str(&format!("\nExpected Output: {expected_output}\n"));
    }

    if let Some(catalog) = tool_catalog {
        prompt.push_str(&format!("\nAvailable Tools:\n{catalog}\n"));
    }

    prompt.push_str("\nUse the following format for your response:\n\n");
    prompt.push_str("Thought: [your reasoning about what to do]\n");
    if tool_catalog.is_some() {
        prompt.push_str("Action: [the action/tool to use]\n");
        prompt.push_str("Action Input: [the input for the action as JSON]\n");
        prompt.push_str("Observation: [the result of the action]\n");
        prompt.push_str(
            "... (this Thought/Action/Action Input/Observation can repeat N times)\n",
        );
        prompt.push_str("Thought: [final reasoning]\n");
    }
    prompt.push_str("Final Answer: [your final answer to the task]\n");
    prompt.push_str("\nBegin!\n");
    prompt
}

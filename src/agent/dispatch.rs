//! Mode dispatch: single-shot direct execution vs. the reason-act loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::react::{self, ReactConfig, ReactLoop};
use crate::agent::{Agent, ExecutionConfig, ExecutionMode};
use crate::context::ContextAssembler;
use crate::errors::AgentError;
use crate::events::{Event, EventKind, EventSource};
use crate::llm::{CallOptions, LLMClient, LLMResponse, Message};
use crate::task::{Task, TaskOutput};
use crate::tools::ToolInvocationContext;

/// Fixed preamble composed into the default system message.
const TEAMWORK_PREAMBLE: &str = "You are part of a team of agents working toward a shared \
outcome. Use the context, memory, and tools available to deliver the best result you can.";

impl Agent {
    /// Select the execution mode and run the task body.
    pub(crate) async fn dispatch(
        &self,
        task: &mut Task,
        source: &EventSource,
        cancel: &CancellationToken,
    ) -> Result<TaskOutput, AgentError> {
        let llm = self.llm().ok_or(AgentError::MissingLLM)?.clone();
        let config = self.config();
        let agent_tools = self.tools();
        let tool_ctx = ToolInvocationContext::resolve(
            &agent_tools,
            &task.tools,
            self.bus().clone(),
            source.clone(),
        );

        // Hybrid deliberates only when it has tools to act with.
        let mode = match config.mode {
            ExecutionMode::Hybrid => {
                if tool_ctx.is_empty() {
                    ExecutionMode::Direct
                } else {
                    ExecutionMode::ReasonAct
                }
            }
            other => other,
        };

        match mode {
            ExecutionMode::Direct => {
                self.run_direct(task, &tool_ctx, llm.as_ref(), &config, source, cancel)
                    .await
            }
            _ => {
                self.run_react(task, &tool_ctx, llm.as_ref(), &config, cancel)
                    .await
            }
        }
    }

    /// The system message: configured template with identity
    /// substitutions, or the default composition plus the teamwork
    /// preamble.
    fn system_message(&self, config: &ExecutionConfig) -> String {
        match &config.system_template {
            Some(template) => template
                .replace("{role}", self.role())
                .replace("{goal}", self.goal())
                .replace("{backstory}", self.backstory()),
            None => format!(
                "You are {}. {}\nYour personal goal is: {}\n{}",
                self.role(),
                self.backstory(),
                self.goal(),
                TEAMWORK_PREAMBLE
            ),
        }
    }

    async fn run_direct(
        &self,
        task: &mut Task,
        tool_ctx: &ToolInvocationContext,
        llm: &dyn LLMClient,
        config: &ExecutionConfig,
        source: &EventSource,
        cancel: &CancellationToken,
    ) -> Result<TaskOutput, AgentError> {
        // Plan-refinement hook: failures are logged, never fatal.
        if config.enable_reasoning {
            if let Some(handler) = self.reasoning_handler() {
                self.bus()
                    .emit(Event::new(EventKind::ReasoningStarted, source.clone()));
                match handler.plan(task, cancel).await {
                    Ok(plan) => {
                        task.description
                            .push_str(&format!("\n\nReasoning Plan:\n{plan}"));
                        self.bus()
                            .emit(Event::new(EventKind::ReasoningCompleted, source.clone()));
                    }
                    Err(err) => {
                        log::warn!("reasoning handler failed, continuing without a plan: {err}");
                        self.bus().emit(
                            Event::new(EventKind::ReasoningError, source.clone())
                                .with("error", err.to_string()),
                        );
                    }
                }
            }
        }

        let knowledge = self.knowledge_sources();
        let assembler = ContextAssembler {
            task,
            tools: tool_ctx,
            memory: self.memory(),
            knowledge: &knowledge,
            bus: self.bus(),
            source: source.clone(),
        };
        let mut prompt = assembler.build(cancel).await;
        if let Some(template) = &config.prompt_template {
            prompt = template.replace("{prompt}", &prompt);
        }

        let messages = vec![
            Message::system(self.system_message(config)),
            Message::user(prompt),
        ];
        let options = CallOptions {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            tools: tool_ctx.function_schemas(),
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = llm.call(&messages, &options, cancel) => result,
        }?;

        let output = TaskOutput::build(task, &response, self.id(), self.role())
            .with_metadata("mode", "direct");
        Ok(output)
    }

    async fn run_react(
        &self,
        task: &mut Task,
        tool_ctx: &ToolInvocationContext,
        llm: &dyn LLMClient,
        config: &ExecutionConfig,
        cancel: &CancellationToken,
    ) -> Result<TaskOutput, AgentError> {
        let catalog = if tool_ctx.is_empty() {
            None
        } else {
            Some(tool_ctx.render())
        };
        let prompt = react::build_initial_prompt(
            &task.description,
            &task.expected_output,
            catalog.as_deref(),
        );

        let step_callbacks = self.step_callbacks_snapshot();
        let react_loop = ReactLoop {
            llm,
            config: ReactConfig {
                max_iterations: config.max_iterations,
                thought_timeout: config.thought_timeout,
                strict_validation: config.strict_validation,
                fallback_on_parse_error: config.fallback_on_parse_error,
            },
            tools: tool_ctx,
            system_message: Some(self.system_message(config)),
            call_options: CallOptions {
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                tools: Vec::new(),
            },
            step_callbacks: &step_callbacks,
        };

        let run = react_loop.run(prompt, cancel).await?;
        let trace = run.trace;

        let synthetic = LLMResponse {
            content: trace.final_output.clone(),
            model: run.model,
            finish_reason: run.finish_reason,
            usage: run.usage,
        };
        let mut output = TaskOutput::build(task, &synthetic, self.id(), self.role())
            .with_metadata("mode", "react")
            .with_metadata("trace_id", trace.id.clone())
            .with_metadata("iterations", trace.iteration_count() as u64)
            .with_metadata("steps", trace.steps.len() as u64);

        let last_error = trace.steps.last().and_then(|s| s.error.clone());
        output.is_valid =
            trace.is_completed && !trace.final_output.is_empty() && last_error.is_none();
        if !output.is_valid {
            output.validation_error = last_error
                .or_else(|| Some("reason-act loop ended without a final answer".to_string()));
        }
        output.tools_used = trace.tools_used();

        self.store_trace(Arc::new(trace));
        Ok(output)
    }
}

//! The execution controller: the agent's public execution surface.
//!
//! Three entry points share one body: `execute` runs synchronously in
//! the caller's task, `execute_async` hands back a single-slot result
//! channel, and `execute_with_timeout` races the body against a
//! deadline through a derived cancellation token. Every execution emits
//! exactly one `execution_started` followed by exactly one of
//! `execution_completed` or `execution_failed`, and updates the
//! per-agent statistics either way.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::errors::AgentError;
use crate::events::{Event, EventKind, EventSource};
use crate::memory::{AgentMemory, MemoryItem};
use crate::task::{Task, TaskOutput};

/// Score assigned to outputs saved back into memory.
const MEMORY_SAVE_SCORE: f64 = 0.5;

impl Agent {
    /// Execute a task to completion.
    ///
    /// The task is consumed: the body may rewrite its description
    /// (reasoning plan) and record received human input.
    pub async fn execute(
        &self,
        mut task: Task,
        cancel: &CancellationToken,
    ) -> Result<TaskOutput, AgentError> {
        if let Err(err) = self.initialize().await {
            log::warn!("agent initialization failed: {err}");
            return Err(AgentError::NotInitialized);
        }

        let execution_id = self.begin_execution();
        let source = self.event_source(Some(&task));
        self.bus().emit(
            Event::new(EventKind::ExecutionStarted, source.clone())
                .with("execution_id", execution_id)
                .with("task_description", task.description.clone()),
        );

        let started = Instant::now();
        let result = self.execute_body(&mut task, &source, cancel).await;
        let duration = started.elapsed();
        self.finish_execution(duration, result.as_ref().ok());

        match result {
            Ok(mut output) => {
                output.execution_time = duration;

                self.apply_guardrail(&task, &mut output).await;

                if task.output_file.is_some() {
                    if let Err(err) = task.save_file(&output.raw) {
                        log::warn!("failed to persist task output file: {err}");
                    }
                }

                self.save_to_memory(&output, &source).await;
                self.run_output_callbacks(&task, &output);

                self.bus().emit(
                    Event::new(EventKind::ExecutionCompleted, source)
                        .with("execution_id", execution_id)
                        .with("duration_ms", duration.as_millis() as u64)
                        .with("valid", output.is_valid),
                );
                Ok(output)
            }
            Err(err) => {
                self.bus().emit(
                    Event::new(EventKind::ExecutionFailed, source)
                        .with("execution_id", execution_id)
                        .with("duration_ms", duration.as_millis() as u64)
                        .with("error", err.to_string()),
                );
                Err(err)
            }
        }
    }

    /// Execute on a spawned worker, returning a single-slot result
    /// channel immediately.
    ///
    /// Exactly one result is written. If the worker panics or is
    /// aborted the channel closes without a value, so receivers never
    /// hang.
    pub fn execute_async(
        self: &Arc<Self>,
        task: Task,
        cancel: &CancellationToken,
    ) -> oneshot::Receiver<Result<TaskOutput, AgentError>> {
        let (tx, rx) = oneshot::channel();
        let agent = Arc::clone(self);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let result = agent.execute(task, &cancel).await;
            let _ = tx.send(result);
        });

        rx
    }

    /// Execute with a hard deadline.
    ///
    /// The body runs on a worker under a child token; when the deadline
    /// fires the child is cancelled and the caller gets a `Timeout`
    /// immediately, even while the worker is still unwinding. The
    /// worker observes the cancellation at its next suspension point
    /// and records the failed execution.
    pub async fn execute_with_timeout(
        self: &Arc<Self>,
        task: Task,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TaskOutput, AgentError> {
        let child = cancel.child_token();
        let mut rx = self.execute_async(task, &child);

        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                child.cancel();
                Err(AgentError::Timeout {
                    timeout,
                    cause: AgentError::Cancelled.to_string(),
                })
            }
            result = &mut rx => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(AgentError::Cancelled),
            },
        }
    }

    async fn execute_body(
        &self,
        task: &mut Task,
        source: &EventSource,
        cancel: &CancellationToken,
    ) -> Result<TaskOutput, AgentError> {
        task.validate()?;

        if task.human_input && task.human_input_received.is_none() {
            let handler = self.human_input_handler().cloned().ok_or_else(|| {
                AgentError::HumanInputUnavailable(
                    "task requires human input but no handler is configured".to_string(),
                )
            })?;

            self.bus()
                .emit(Event::new(EventKind::HumanInputRequested, source.clone()));
            let prompt = format!("Input required for task: {}", task.description);
            let input = handler.request_input(&prompt, &[], cancel).await?;
            self.bus().emit(
                Event::new(EventKind::HumanInputReceived, source.clone())
                    .with("length", input.len() as u64),
            );
            task.set_human_input(input);
        }

        self.dispatch(task, source, cancel).await
    }

    async fn apply_guardrail(&self, task: &Task, output: &mut TaskOutput) {
        let Some(guardrail) = &task.guardrail else {
            return;
        };
        match guardrail.validate(output).await {
            Ok(result) => {
                if !result.valid {
                    output.is_valid = false;
                    output.validation_error = result.error;
                }
            }
            Err(err) => {
                log::warn!("guardrail evaluation failed, output accepted as-is: {err}");
            }
        }
    }

    async fn save_to_memory(&self, output: &TaskOutput, source: &EventSource) {
        // Only the flat facade exposes a save surface; contextual tiers
        // are populated by their owners.
        let Some(AgentMemory::Simple(memory)) = self.memory() else {
            return;
        };
        if output.raw.is_empty() {
            return;
        }

        self.bus()
            .emit(Event::new(EventKind::MemorySaveStarted, source.clone()));

        let item = MemoryItem::new(output.raw.clone(), self.id())
            .with_score(MEMORY_SAVE_SCORE)
            .with_metadata("task_id", output.task_id.clone())
            .with_metadata("agent_role", output.agent_role.clone())
            .with_metadata("summary", output.summary.clone());

        match memory.save(item).await {
            Ok(()) => {
                self.bus()
                    .emit(Event::new(EventKind::MemorySaveCompleted, source.clone()));
            }
            Err(err) => {
                log::warn!("failed to save output to memory: {err}");
                self.bus().emit(
                    Event::new(EventKind::MemorySaveFailed, source.clone())
                        .with("error", err.to_string()),
                );
            }
        }
    }

    fn run_output_callbacks(&self, task: &Task, output: &TaskOutput) {
        for callback in self.output_callbacks_snapshot() {
            if let Err(err) = callback(output) {
                log::warn!("output callback failed: {err}");
            }
        }
        if let Some(callback) = &task.callback {
            if let Err(err) = callback(output) {
                log::warn!("task callback failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ExecutionMode, ReactStep};
    use crate::events::EventBus;
    use crate::human::test_support::{ScriptedInputHandler, UnavailableInputHandler};
    use crate::memory::storage::MemoryStorage;
    use crate::llm::test_support::{BlockingLLM, FailingLLM, ScriptedLLM};
    use crate::memory::test_support::VecStorage;
    use crate::memory::StorageMemory;
    use crate::task::{FnGuardrail, GuardrailResult};
    use crate::tools::{Tool, ToolSchema};
    use parking_lot::Mutex;
    use serde_json::Value;

    fn init_logs() {
        let _ = env_logger::Builder::from_default_env().is_test(true).try_init();
    }

    fn recording_bus() -> (Arc<EventBus>, Arc<Mutex<Vec<EventKind>>>) {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.on_any("recorder", move |event: &Event| sink.lock().push(event.kind));
        (bus, seen)
    }

    fn calculator() -> Arc<Tool> {
        Arc::new(
            Tool::from_fn("calculator", "Perform arithmetic", |args| {
                let a = args.get("a").and_then(Value::as_f64).unwrap_or(0.0);
                let b = args.get("b").and_then(Value::as_f64).unwrap_or(0.0);
                Ok(Value::from(a + b))
            })
            .with_schema(
                ToolSchema::new()
                    .parameter("operation", "string", "Operation")
                    .parameter("a", "number", "First operand")
                    .parameter("b", "number", "Second operand"),
            ),
        )
    }

    fn count(seen: &[EventKind], kind: EventKind) -> usize {
        seen.iter().filter(|k| **k == kind).count()
    }

    #[tokio::test]
    async fn direct_success_records_stats_and_events() {
        let (bus, seen) = recording_bus();
        let llm = Arc::new(
            ScriptedLLM::repeating("hello")
                .with_usage_per_call(10, 0.01)
                .with_model("m"),
        );
        let agent = Agent::builder("R", "G", "B")
            .llm(llm)
            .event_bus(bus)
            .build()
            .unwrap();

        let output = agent
            .execute(Task::new("Say hi", "a greeting"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.raw, "hello");
        assert_eq!(output.tokens_used, 10);
        assert!((output.cost - 0.01).abs() < 1e-9);
        assert_eq!(output.model, "m");
        assert_eq!(output.metadata["mode"], "direct");
        assert!(output.execution_time > Duration::ZERO);

        let stats = agent.stats();
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.successful_executions, 1);
        assert_eq!(stats.tokens_used, 10);

        let seen = seen.lock();
        assert_eq!(count(&seen, EventKind::ExecutionStarted), 1);
        assert_eq!(count(&seen, EventKind::ExecutionCompleted), 1);
        assert_eq!(count(&seen, EventKind::ExecutionFailed), 0);
    }

    #[tokio::test]
    async fn llm_failure_surfaces_after_bookkeeping() {
        let (bus, seen) = recording_bus();
        let agent = Agent::builder("R", "G", "B")
            .llm(Arc::new(FailingLLM {
                message: "mock LLM error".to_string(),
            }))
            .event_bus(bus)
            .build()
            .unwrap();

        let err = agent
            .execute(Task::new("Say hi", "a greeting"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("mock LLM error"));

        let stats = agent.stats();
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.failed_executions, 1);
        assert_eq!(stats.successful_executions, 0);

        let seen = seen.lock();
        assert_eq!(count(&seen, EventKind::ExecutionStarted), 1);
        assert_eq!(count(&seen, EventKind::ExecutionFailed), 1);
        assert_eq!(count(&seen, EventKind::ExecutionCompleted), 0);
    }

    #[tokio::test]
    async fn task_tools_replace_agent_tools_in_the_prompt() {
        let llm = Arc::new(ScriptedLLM::repeating("ok"));
        let agent = Agent::builder("R", "G", "B")
            .llm(llm.clone())
            .tool(calculator())
            .build()
            .unwrap();

        let analyzer = Arc::new(Tool::from_fn("text_analyzer", "Analyze text", |_| {
            Ok(Value::Null)
        }));
        let task = Task::new("Analyze this", "an analysis").with_tools(vec![analyzer]);

        agent.execute(task, &CancellationToken::new()).await.unwrap();

        let prompt = llm.last_prompt().unwrap();
        assert!(prompt.contains("text_analyzer: Analyze text"));
        assert!(!prompt.contains("calculator"));
    }

    #[tokio::test]
    async fn react_success_runs_tools_and_completes_trace() {
        let llm = Arc::new(ScriptedLLM::new(vec![
            "Thought: need to add\nAction: calculator\nAction Input: {\"operation\":\"add\",\"a\":1,\"b\":2}"
                .to_string(),
            "Thought: done\nFinal Answer: 3".to_string(),
        ]));
        let agent = Agent::builder("R", "G", "B")
            .llm(llm)
            .tool(calculator())
            .mode(ExecutionMode::ReasonAct)
            .build()
            .unwrap();

        let output = agent
            .execute(Task::new("add 1 and 2", "a number"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.raw, "3");
        assert!(output.is_valid);
        assert_eq!(output.tools_used, vec!["calculator"]);
        assert_eq!(output.metadata["mode"], "react");

        let trace = agent.last_trace().unwrap();
        assert!(trace.is_completed);
        assert_eq!(trace.iteration_count(), 2);
        assert!(trace.steps[0].observation.as_deref().unwrap().contains('3'));

        let stats = agent.stats();
        assert_eq!(stats.successful_executions, 1);
        assert_eq!(stats.tool_usage["calculator"], 1);
    }

    #[tokio::test]
    async fn react_iteration_cap_marks_output_invalid() {
        let llm = Arc::new(ScriptedLLM::repeating("Thought: still thinking"));
        let agent = Agent::builder("R", "G", "B")
            .llm(llm)
            .mode(ExecutionMode::ReasonAct)
            .max_iterations(1)
            .build()
            .unwrap();

        let output = agent
            .execute(Task::new("think", "an answer"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!output.is_valid);
        assert_eq!(
            output.validation_error.as_deref(),
            Some("Reached maximum iterations")
        );

        let trace = agent.last_trace().unwrap();
        assert_eq!(trace.iteration_count(), 2);
        assert!(trace.is_completed);
        assert_eq!(
            trace.steps.last().unwrap().error.as_deref(),
            Some("Reached maximum iterations")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_within_the_deadline() {
        let agent = Arc::new(
            Agent::builder("R", "G", "B")
                .llm(Arc::new(BlockingLLM))
                .build()
                .unwrap(),
        );

        let result = agent
            .execute_with_timeout(
                Task::new("block", "nothing"),
                Duration::from_millis(100),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(AgentError::Timeout { .. })));

        // The worker observes the cancelled child token and records the
        // failed execution shortly after.
        for _ in 0..100 {
            if agent.stats().failed_executions == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(agent.stats().failed_executions, 1);
    }

    #[tokio::test]
    async fn execute_async_delivers_exactly_one_result() {
        let agent = Arc::new(
            Agent::builder("R", "G", "B")
                .llm(Arc::new(ScriptedLLM::repeating("done")))
                .build()
                .unwrap(),
        );

        let rx = agent.execute_async(Task::new("t", "o"), &CancellationToken::new());
        let output = rx.await.unwrap().unwrap();
        assert_eq!(output.raw, "done");
    }

    #[tokio::test]
    async fn cancelled_context_fails_fast() {
        let agent = Agent::builder("R", "G", "B")
            .llm(Arc::new(BlockingLLM))
            .build()
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = agent
            .execute(Task::new("t", "o"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(agent.stats().failed_executions, 1);
    }

    #[tokio::test]
    async fn human_input_is_collected_and_injected() {
        let llm = Arc::new(ScriptedLLM::repeating("summary"));
        let agent = Agent::builder("R", "G", "B")
            .llm(llm.clone())
            .human_input(Arc::new(ScriptedInputHandler {
                answer: "focus on latency".to_string(),
            }))
            .build()
            .unwrap();

        let task = Task::new("Summarize the report", "a summary").with_human_input();
        agent.execute(task, &CancellationToken::new()).await.unwrap();

        let prompt = llm.last_prompt().unwrap();
        assert!(prompt.contains("Human Input: focus on latency"));
    }

    #[tokio::test]
    async fn missing_human_input_handler_is_fatal() {
        let agent = Agent::builder("R", "G", "B")
            .llm(Arc::new(ScriptedLLM::repeating("unused")))
            .build()
            .unwrap();

        let task = Task::new("needs input", "out").with_human_input();
        let err = agent.execute(task, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::HumanInputUnavailable(_)));
        assert_eq!(agent.stats().failed_executions, 1);
    }

    #[tokio::test]
    async fn unavailable_human_input_is_fatal() {
        let agent = Agent::builder("R", "G", "B")
            .llm(Arc::new(ScriptedLLM::repeating("unused")))
            .human_input(Arc::new(UnavailableInputHandler))
            .build()
            .unwrap();

        let task = Task::new("needs input", "out").with_human_input();
        let err = agent.execute(task, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::HumanInputUnavailable(_)));
    }

    #[tokio::test]
    async fn guardrail_rejection_marks_output_invalid() {
        let agent = Agent::builder("R", "G", "B")
            .llm(Arc::new(ScriptedLLM::repeating("goodbye")))
            .build()
            .unwrap();

        let task = Task::new("greet", "a greeting").with_guardrail(Arc::new(FnGuardrail::new(
            |output| {
                if output.raw.contains("hello") {
                    GuardrailResult::ok()
                } else {
                    GuardrailResult::reject("expected a greeting")
                }
            },
        )));

        let output = agent.execute(task, &CancellationToken::new()).await.unwrap();
        assert!(!output.is_valid);
        assert_eq!(output.validation_error.as_deref(), Some("expected a greeting"));
        // Guardrail rejection is not an execution failure.
        assert_eq!(agent.stats().successful_executions, 1);
    }

    #[tokio::test]
    async fn callback_errors_are_swallowed() {
        init_logs();
        let agent = Agent::builder("R", "G", "B")
            .llm(Arc::new(ScriptedLLM::repeating("out")))
            .build()
            .unwrap();

        let invoked = Arc::new(Mutex::new(0u32));
        let counter = invoked.clone();
        agent.add_output_callback(Arc::new(move |_| {
            *counter.lock() += 1;
            Err(anyhow::anyhow!("callback exploded"))
        }));
        let counter = invoked.clone();
        agent.add_output_callback(Arc::new(move |_| {
            *counter.lock() += 1;
            Ok(())
        }));

        let output = agent
            .execute(Task::new("t", "o"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.raw, "out");
        assert_eq!(*invoked.lock(), 2);
    }

    #[tokio::test]
    async fn step_callbacks_fire_per_step() {
        let steps = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = steps.clone();

        let llm = Arc::new(ScriptedLLM::new(vec![
            "Thought: first".to_string(),
            "Thought: done\nFinal Answer: ok".to_string(),
        ]));
        let agent = Agent::builder("R", "G", "B")
            .llm(llm)
            .mode(ExecutionMode::ReasonAct)
            .build()
            .unwrap();
        agent.add_step_callback(Arc::new(move |step: &ReactStep| {
            sink.lock().push(step.thought.clone());
            Ok(())
        }));

        agent
            .execute(Task::new("t", "o"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*steps.lock(), vec!["first".to_string(), "done".to_string()]);
    }

    #[tokio::test]
    async fn successful_output_is_saved_to_memory() {
        let storage = Arc::new(VecStorage::new());
        let memory = AgentMemory::Simple(Arc::new(StorageMemory::new(storage.clone())));
        let (bus, seen) = recording_bus();

        let agent = Agent::builder("R", "G", "B")
            .llm(Arc::new(ScriptedLLM::repeating("learned something")))
            .memory(memory)
            .event_bus(bus)
            .build()
            .unwrap();

        agent
            .execute(Task::new("learn", "knowledge"), &CancellationToken::new())
            .await
            .unwrap();

        let saved = storage.search("learned", 5, 0.0).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].value_text(), "learned something");

        let seen = seen.lock();
        assert_eq!(count(&seen, EventKind::MemorySaveStarted), 1);
        assert_eq!(count(&seen, EventKind::MemorySaveCompleted), 1);
    }

    #[tokio::test]
    async fn clone_execution_leaves_original_stats_untouched() {
        let agent = Agent::builder("R", "G", "B")
            .llm(Arc::new(ScriptedLLM::repeating("out")))
            .build()
            .unwrap();

        let clone = agent.clone_agent();
        clone
            .execute(Task::new("t", "o"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(clone.stats().total_executions, 1);
        assert_eq!(agent.stats().total_executions, 0);
    }

    #[tokio::test]
    async fn execute_without_llm_reports_not_initialized() {
        init_logs();
        let (bus, seen) = recording_bus();
        let agent = Agent::builder("R", "G", "B").event_bus(bus).build().unwrap();

        let err = agent
            .execute(Task::new("t", "o"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotInitialized));

        // Initialization failure happens before the execution starts:
        // no events, no stats.
        assert!(seen.lock().is_empty());
        assert_eq!(agent.stats().total_executions, 0);
    }

    #[tokio::test]
    async fn invalid_task_fails_with_events() {
        let (bus, seen) = recording_bus();
        let agent = Agent::builder("R", "G", "B")
            .llm(Arc::new(ScriptedLLM::repeating("unused")))
            .event_bus(bus)
            .build()
            .unwrap();

        let err = agent
            .execute(Task::new("", "out"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));

        let seen = seen.lock();
        assert_eq!(count(&seen, EventKind::ExecutionStarted), 1);
        assert_eq!(count(&seen, EventKind::ExecutionFailed), 1);
    }

    #[tokio::test]
    async fn in_flight_gauge_returns_to_zero() {
        let agent = Arc::new(
            Agent::builder("R", "G", "B")
                .llm(Arc::new(ScriptedLLM::repeating("out")))
                .build()
                .unwrap(),
        );

        let rx1 = agent.execute_async(Task::new("a", "o"), &CancellationToken::new());
        let rx2 = agent.execute_async(Task::new("b", "o"), &CancellationToken::new());
        rx1.await.unwrap().unwrap();
        rx2.await.unwrap().unwrap();

        assert_eq!(agent.in_flight(), 0);
        assert_eq!(agent.stats().total_executions, 2);
    }

    #[tokio::test]
    async fn hybrid_mode_follows_the_tool_set() {
        // Without tools hybrid runs direct.
        let llm = Arc::new(ScriptedLLM::repeating("plain answer"));
        let agent = Agent::builder("R", "G", "B")
            .llm(llm)
            .mode(ExecutionMode::Hybrid)
            .build()
            .unwrap();
        let output = agent
            .execute(Task::new("t", "o"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.metadata["mode"], "direct");

        // With tools hybrid deliberates.
        let llm = Arc::new(ScriptedLLM::repeating("Thought: done\nFinal Answer: 4"));
        let agent = Agent::builder("R", "G", "B")
            .llm(llm)
            .tool(calculator())
            .mode(ExecutionMode::Hybrid)
            .build()
            .unwrap();
        let output = agent
            .execute(Task::new("t", "o"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.metadata["mode"], "react");
    }
}

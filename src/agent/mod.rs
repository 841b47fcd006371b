//! Agents: runtime entities that execute tasks.
//!
//! An agent pairs an immutable identity (role, goal, backstory) with
//! mutable configuration and a set of collaborators: an LLM client, an
//! ordered tool list, an optional memory facade, optional knowledge
//! sources, and an optional human-input handler. The execution surface
//! (`execute`, `execute_async`, `execute_with_timeout`) lives in
//! [`execution`]; mode selection in [`dispatch`]; the iterative
//! deliberation loop in [`react`].

mod dispatch;
mod execution;
pub mod react;
mod stats;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use md5::{Digest, Md5};
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::AgentError;
use crate::events::{EventBus, EventSource};
use crate::human::HumanInputHandler;
use crate::knowledge::KnowledgeSource;
use crate::llm::LLMClient;
use crate::memory::AgentMemory;
use crate::task::{Task, TaskOutput};
use crate::tools::Tool;

pub use react::{ReactStep, ReactTrace, StepKind};
pub use stats::ExecutionStats;

use react::DEFAULT_MAX_ITERATIONS;

/// How the agent drives a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Single LLM call.
    Direct,
    /// Iterative reason-act loop.
    ReasonAct,
    /// Reason-act when tools are available, direct otherwise.
    Hybrid,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Direct
    }
}

/// Mutable execution configuration.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Execution mode.
    pub mode: ExecutionMode,
    /// Iteration cap for the reason-act loop.
    pub max_iterations: u32,
    /// Maximum tokens per LLM call.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Whether the plan-refinement hook runs before direct execution.
    pub enable_reasoning: bool,
    /// Soft per-thought timeout inside the reason-act loop.
    pub thought_timeout: Option<Duration>,
    /// Whether structurally invalid steps end the loop.
    pub strict_validation: bool,
    /// Whether unparseable responses become final answers.
    pub fallback_on_parse_error: bool,
    /// System message template; `{role}`, `{goal}`, `{backstory}` are
    /// substituted. Absent, a default composition is used.
    pub system_template: Option<String>,
    /// Wrapper template for the user prompt; `{prompt}` is substituted.
    pub prompt_template: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Direct,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: None,
            temperature: None,
            enable_reasoning: false,
            thought_timeout: None,
            strict_validation: true,
            fallback_on_parse_error: true,
            system_template: None,
            prompt_template: None,
        }
    }
}

/// Security-relevant identity material for an agent.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Stable fingerprint of this agent instance.
    pub fingerprint: String,
    /// Free-form fingerprint metadata.
    pub metadata: HashMap<String, Value>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            fingerprint: Uuid::new_v4().to_string(),
            metadata: HashMap::new(),
        }
    }
}

/// Plan-refinement hook run before direct execution when
/// `enable_reasoning` is set.
#[async_trait]
pub trait ReasoningHandler: Send + Sync {
    /// Produce a plan for the task. The plan is appended to the task
    /// description; failures are logged and swallowed.
    async fn plan(&self, task: &Task, cancel: &CancellationToken)
        -> Result<String, anyhow::Error>;
}

/// Callback invoked with the built output after each execution.
pub type OutputCallback = Arc<dyn Fn(&TaskOutput) -> Result<(), anyhow::Error> + Send + Sync>;

/// Callback invoked after each appended reason-act step.
pub type StepCallback = Arc<dyn Fn(&ReactStep) -> Result<(), anyhow::Error> + Send + Sync>;

/// Mutable per-agent runtime state, guarded by the agent's RW lock.
struct AgentState {
    initialized: bool,
    execution_seq: u64,
    in_flight: u64,
    stats: ExecutionStats,
    last_trace: Option<Arc<ReactTrace>>,
}

impl AgentState {
    fn new() -> Self {
        Self {
            initialized: false,
            execution_seq: 0,
            in_flight: 0,
            stats: ExecutionStats::default(),
            last_trace: None,
        }
    }
}

/// A configured agent.
pub struct Agent {
    id: String,
    role: String,
    goal: String,
    backstory: String,
    config: RwLock<ExecutionConfig>,
    security: RwLock<SecurityConfig>,
    llm: Option<Arc<dyn LLMClient>>,
    tools: RwLock<Vec<Arc<Tool>>>,
    memory: Option<AgentMemory>,
    knowledge: RwLock<Vec<Arc<dyn KnowledgeSource>>>,
    human_input: Option<Arc<dyn HumanInputHandler>>,
    reasoning: Option<Arc<dyn ReasoningHandler>>,
    output_callbacks: RwLock<Vec<OutputCallback>>,
    step_callbacks: RwLock<Vec<StepCallback>>,
    bus: Arc<EventBus>,
    state: RwLock<AgentState>,
    init_latch: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("initialized", &state.initialized)
            .field("in_flight", &state.in_flight)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Start building an agent from its identity triple.
    pub fn builder(
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
    ) -> AgentBuilder {
        AgentBuilder::new(role, goal, backstory)
    }

    /// Unique identifier of this instance.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The agent's role.
    pub fn role(&self) -> &str {
        &self.role
    }

    /// The agent's goal.
    pub fn goal(&self) -> &str {
        &self.goal
    }

    /// The agent's backstory.
    pub fn backstory(&self) -> &str {
        &self.backstory
    }

    /// Stable MD5 fingerprint over role|goal|backstory.
    pub fn key(&self) -> String {
        let mut hasher = Md5::new();
        hasher.update(format!("{}|{}|{}", self.role, self.goal, self.backstory).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// The bus this agent emits on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Snapshot of the execution configuration.
    pub fn config(&self) -> ExecutionConfig {
        self.config.read().clone()
    }

    /// Replace the execution configuration.
    pub fn set_config(&self, config: ExecutionConfig) {
        *self.config.write() = config;
    }

    /// Snapshot of the security configuration.
    pub fn security_config(&self) -> SecurityConfig {
        self.security.read().clone()
    }

    /// Snapshot of the agent's tool list.
    pub fn tools(&self) -> Vec<Arc<Tool>> {
        self.tools.read().clone()
    }

    /// Append a tool to the agent's list.
    pub fn add_tool(&self, tool: Arc<Tool>) {
        self.tools.write().push(tool);
    }

    /// Replace the agent's tool list.
    pub fn set_tools(&self, tools: Vec<Arc<Tool>>) {
        *self.tools.write() = tools;
    }

    /// Register a post-output callback.
    pub fn add_output_callback(&self, callback: OutputCallback) {
        self.output_callbacks.write().push(callback);
    }

    /// Register a per-step callback.
    pub fn add_step_callback(&self, callback: StepCallback) {
        self.step_callbacks.write().push(callback);
    }

    /// Snapshot of the execution statistics.
    pub fn stats(&self) -> ExecutionStats {
        self.state.read().stats.clone()
    }

    /// The most recent reason-act trace, if any.
    pub fn last_trace(&self) -> Option<Arc<ReactTrace>> {
        self.state.read().last_trace.clone()
    }

    /// Number of executions currently in flight.
    pub fn in_flight(&self) -> u64 {
        self.state.read().in_flight
    }

    /// Whether `initialize` has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    /// Initialize the agent: requires an LLM client and initializes
    /// every knowledge source. Idempotent; concurrent callers after the
    /// first successful run take the fast path.
    pub async fn initialize(&self) -> Result<(), AgentError> {
        if self.state.read().initialized {
            return Ok(());
        }

        let _latch = self.init_latch.lock().await;
        if self.state.read().initialized {
            return Ok(());
        }

        if self.llm.is_none() {
            return Err(AgentError::MissingLLM);
        }

        let sources = self.knowledge.read().clone();
        for source in sources {
            source.initialize().await.map_err(|err| AgentError::Knowledge {
                name: source.name().to_string(),
                message: err.to_string(),
            })?;
        }

        self.state.write().initialized = true;
        Ok(())
    }

    /// Close the agent: release knowledge sources and the LLM client,
    /// and flip the agent back to uninitialized.
    pub fn close(&self) -> Result<(), AgentError> {
        for source in self.knowledge.read().iter() {
            if let Err(err) = source.close() {
                log::warn!("knowledge source '{}' failed to close: {err}", source.name());
            }
        }
        if let Some(llm) = &self.llm {
            llm.close()?;
        }
        self.state.write().initialized = false;
        Ok(())
    }

    /// Clone this agent: fresh identifier and independent list copies;
    /// the LLM, memory, and handler collaborators are shared by
    /// reference. The clone starts uninitialized with fresh stats.
    pub fn clone_agent(&self) -> Agent {
        Agent {
            id: Uuid::new_v4().to_string(),
            role: self.role.clone(),
            goal: self.goal.clone(),
            backstory: self.backstory.clone(),
            config: RwLock::new(self.config.read().clone()),
            security: RwLock::new(SecurityConfig::default()),
            llm: self.llm.clone(),
            tools: RwLock::new(self.tools.read().clone()),
            memory: self.memory.clone(),
            knowledge: RwLock::new(self.knowledge.read().clone()),
            human_input: self.human_input.clone(),
            reasoning: self.reasoning.clone(),
            output_callbacks: RwLock::new(self.output_callbacks.read().clone()),
            step_callbacks: RwLock::new(self.step_callbacks.read().clone()),
            bus: self.bus.clone(),
            state: RwLock::new(AgentState::new()),
            init_latch: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn event_source(&self, task_id: Option<&Task>) -> EventSource {
        EventSource {
            agent_id: self.id.clone(),
            agent_role: self.role.clone(),
            task_id: task_id.map(|t| t.id.to_string()),
        }
    }

    pub(crate) fn llm(&self) -> Option<&Arc<dyn LLMClient>> {
        self.llm.as_ref()
    }

    pub(crate) fn memory(&self) -> Option<&AgentMemory> {
        self.memory.as_ref()
    }

    pub(crate) fn knowledge_sources(&self) -> Vec<Arc<dyn KnowledgeSource>> {
        self.knowledge.read().clone()
    }

    pub(crate) fn human_input_handler(&self) -> Option<&Arc<dyn HumanInputHandler>> {
        self.human_input.as_ref()
    }

    pub(crate) fn reasoning_handler(&self) -> Option<&Arc<dyn ReasoningHandler>> {
        self.reasoning.as_ref()
    }

    pub(crate) fn output_callbacks_snapshot(&self) -> Vec<OutputCallback> {
        self.output_callbacks.read().clone()
    }

    pub(crate) fn step_callbacks_snapshot(&self) -> Vec<StepCallback> {
        self.step_callbacks.read().clone()
    }

    /// Begin an execution: bump the sequence, raise the in-flight
    /// gauge, stamp the last execution time. Returns the execution id.
    pub(crate) fn begin_execution(&self) -> u64 {
        let mut state = self.state.write();
        state.execution_seq += 1;
        state.in_flight += 1;
        state.stats.last_execution_time = Some(chrono::Utc::now());
        state.execution_seq
    }

    /// Finish an execution: update stats and lower the gauge.
    pub(crate) fn finish_execution(&self, duration: Duration, output: Option<&TaskOutput>) {
        let mut state = self.state.write();
        match output {
            Some(output) => state.stats.record_success(duration, output),
            None => state.stats.record_failure(duration),
        }
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Record the most recent reason-act trace.
    pub(crate) fn store_trace(&self, trace: Arc<ReactTrace>) {
        self.state.write().last_trace = Some(trace);
    }
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    role: String,
    goal: String,
    backstory: String,
    config: ExecutionConfig,
    security: SecurityConfig,
    llm: Option<Arc<dyn LLMClient>>,
    tools: Vec<Arc<Tool>>,
    memory: Option<AgentMemory>,
    knowledge: Vec<Arc<dyn KnowledgeSource>>,
    human_input: Option<Arc<dyn HumanInputHandler>>,
    reasoning: Option<Arc<dyn ReasoningHandler>>,
    bus: Option<Arc<EventBus>>,
}

impl AgentBuilder {
    fn new(
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
            config: ExecutionConfig::default(),
            security: SecurityConfig::default(),
            llm: None,
            tools: Vec::new(),
            memory: None,
            knowledge: Vec::new(),
            human_input: None,
            reasoning: None,
            bus: None,
        }
    }

    /// Attach the LLM client.
    pub fn llm(mut self, llm: Arc<dyn LLMClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Set the execution configuration.
    pub fn config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the execution mode.
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Set the reason-act iteration cap.
    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Attach the agent's tools.
    pub fn tools(mut self, tools: Vec<Arc<Tool>>) -> Self {
        self.tools = tools;
        self
    }

    /// Attach one tool.
    pub fn tool(mut self, tool: Arc<Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Attach the memory facade.
    pub fn memory(mut self, memory: AgentMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attach knowledge sources.
    pub fn knowledge_sources(mut self, sources: Vec<Arc<dyn KnowledgeSource>>) -> Self {
        self.knowledge = sources;
        self
    }

    /// Attach the human input handler.
    pub fn human_input(mut self, handler: Arc<dyn HumanInputHandler>) -> Self {
        self.human_input = Some(handler);
        self
    }

    /// Attach the reasoning handler.
    pub fn reasoning(mut self, handler: Arc<dyn ReasoningHandler>) -> Self {
        self.reasoning = Some(handler);
        self
    }

    /// Attach an event bus; absent, the agent creates its own.
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Override the security configuration.
    pub fn security(mut self, security: SecurityConfig) -> Self {
        self.security = security;
        self
    }

    /// Validate and build the agent.
    pub fn build(self) -> Result<Agent, AgentError> {
        if self.role.trim().is_empty() {
            return Err(AgentError::Config("agent role must not be empty".to_string()));
        }
        if self.goal.trim().is_empty() {
            return Err(AgentError::Config("agent goal must not be empty".to_string()));
        }
        if self.backstory.trim().is_empty() {
            return Err(AgentError::Config(
                "agent backstory must not be empty".to_string(),
            ));
        }

        Ok(Agent {
            id: Uuid::new_v4().to_string(),
            role: self.role,
            goal: self.goal,
            backstory: self.backstory,
            config: RwLock::new(self.config),
            security: RwLock::new(self.security),
            llm: self.llm,
            tools: RwLock::new(self.tools),
            memory: self.memory,
            knowledge: RwLock::new(self.knowledge),
            human_input: self.human_input,
            reasoning: self.reasoning,
            output_callbacks: RwLock::new(Vec::new()),
            step_callbacks: RwLock::new(Vec::new()),
            bus: self.bus.unwrap_or_else(|| Arc::new(EventBus::new())),
            state: RwLock::new(AgentState::new()),
            init_latch: tokio::sync::Mutex::new(()),
        })
    }
}

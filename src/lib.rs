//! # crewkit
//!
//! An agent-execution runtime: configure an agent with an identity
//! (role, goal, backstory), an LLM client, tools, memory, and knowledge
//! sources, then hand it declarative tasks. The runtime assembles the
//! prompt context, drives single-shot or iterative reason-act
//! execution, dispatches tool calls under usage limits, and produces
//! structured task outputs with full event and statistics bookkeeping.
//!
//! ```no_run
//! use std::sync::Arc;
//! use crewkit::{Agent, Task};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(llm: Arc<dyn crewkit::llm::LLMClient>) -> Result<(), crewkit::AgentError> {
//! let agent = Agent::builder(
//!     "Research Analyst",
//!     "Produce concise, sourced answers",
//!     "A careful analyst with a background in data journalism",
//! )
//! .llm(llm)
//! .build()?;
//!
//! let task = Task::new("Summarize the quarterly report", "a three-sentence summary");
//! let output = agent.execute(task, &CancellationToken::new()).await?;
//! println!("{}", output.raw);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod context;
pub mod errors;
pub mod events;
pub mod human;
pub mod knowledge;
pub mod llm;
pub mod memory;
pub mod task;
pub mod tools;

pub use agent::{
    Agent, AgentBuilder, ExecutionConfig, ExecutionMode, ExecutionStats, OutputCallback,
    ReactStep, ReactTrace, ReasoningHandler, SecurityConfig, StepCallback, StepKind,
};
pub use errors::{AgentError, ToolError};
pub use events::{Event, EventBus, EventKind, EventSource};
pub use human::{ConsoleInputHandler, HumanInputHandler};
pub use knowledge::{KnowledgeItem, KnowledgeQueryOptions, KnowledgeSource, StringKnowledgeSource};
pub use llm::{CallOptions, LLMClient, LLMResponse, Message, MessageRole, TokenUsage};
pub use memory::{
    AgentMemory, ContextualMemory, Memory, MemoryItem, MemoryStorage, SqliteMemoryStorage,
    StorageMemory,
};
pub use task::{
    ConditionalTask, FnGuardrail, Guardrail, GuardrailResult, OutputFormat, Task, TaskOutput,
};
pub use tools::{Tool, ToolInvocationContext, ToolOutcome, ToolSchema};

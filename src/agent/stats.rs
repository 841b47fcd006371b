//! Per-agent execution statistics.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskOutput;

/// Aggregated counters for one agent.
///
/// Writers must hold the agent's write lock; the agent exposes a
/// cloned snapshot through `Agent::stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Executions finished, successful or not.
    pub total_executions: u64,
    /// Executions that produced an output.
    pub successful_executions: u64,
    /// Executions that surfaced an error.
    pub failed_executions: u64,
    /// Cumulative wall-clock time across executions.
    pub total_execution_time: Duration,
    /// `total_execution_time / total_executions`.
    pub average_execution_time: Duration,
    /// When the most recent execution started.
    pub last_execution_time: Option<DateTime<Utc>>,
    /// Tokens consumed by successful executions.
    pub tokens_used: u64,
    /// Cost accumulated by successful executions.
    pub cost: f64,
    /// Per-tool-name use counts from successful executions.
    pub tool_usage: HashMap<String, u64>,
    /// When this stats record was created.
    pub created_at: DateTime<Utc>,
}

impl Default for ExecutionStats {
    fn default() -> Self {
        Self {
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            total_execution_time: Duration::ZERO,
            average_execution_time: Duration::ZERO,
            last_execution_time: None,
            tokens_used: 0,
            cost: 0.0,
            tool_usage: HashMap::new(),
            created_at: Utc::now(),
        }
    }
}

impl ExecutionStats {
    /// Record a successful execution.
    pub fn record_success(&mut self, duration: Duration, output: &TaskOutput) {
        self.total_executions += 1;
        self.successful_executions += 1;
        self.tokens_used += output.tokens_used;
        self.cost += output.cost;
        for tool in &output.tools_used {
            *self.tool_usage.entry(tool.clone()).or_insert(0) += 1;
        }
        self.accumulate_duration(duration);
    }

    /// Record a failed execution.
    pub fn record_failure(&mut self, duration: Duration) {
        self.total_executions += 1;
        self.failed_executions += 1;
        self.accumulate_duration(duration);
    }

    fn accumulate_duration(&mut self, duration: Duration) {
        self.total_execution_time += duration;
        self.average_execution_time = self.total_execution_time / self.total_executions as u32;
    }
}

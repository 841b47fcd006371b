//! Reason-act steps and traces.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AgentError;

/// Structural classification of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Thought only.
    Thinking,
    /// Thought plus action and action input.
    Acting,
    /// Completed with a final answer.
    Final,
    /// Carries an error.
    Errored,
}

/// One deliberation step of the reason-act loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactStep {
    /// Unique step identifier.
    pub id: String,
    /// The model's reasoning prose.
    pub thought: String,
    /// Tool name, when the step acts.
    pub action: Option<String>,
    /// Parameter map for the action.
    pub action_input: Option<HashMap<String, Value>>,
    /// Tool result rendered to a string, filled after execution.
    pub observation: Option<String>,
    /// Final answer prose, when the step completes the task.
    pub final_answer: Option<String>,
    /// Whether this step completes the trace.
    pub is_complete: bool,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Time spent producing and executing the step.
    pub duration: Duration,
    /// Error carried by the step, if any.
    pub error: Option<String>,
}

impl ReactStep {
    /// Create an empty step.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thought: String::new(),
            action: None,
            action_input: None,
            observation: None,
            final_answer: None,
            is_complete: false,
            timestamp: Utc::now(),
            duration: Duration::ZERO,
            error: None,
        }
    }

    /// Create a final step carrying the given answer.
    pub fn final_step(thought: impl Into<String>, answer: impl Into<String>) -> Self {
        let mut step = Self::new();
        step.thought = thought.into();
        step.final_answer = Some(answer.into());
        step.is_complete = true;
        step
    }

    /// Whether this step completes the trace.
    pub fn is_final(&self) -> bool {
        self.is_complete
            && self
                .final_answer
                .as_deref()
                .is_some_and(|answer| !answer.trim().is_empty())
    }

    /// Classify the step, or `None` when no valid classification fits.
    pub fn kind(&self) -> Option<StepKind> {
        if self.error.is_some() {
            return Some(StepKind::Errored);
        }
        if self.is_complete || self.final_answer.is_some() {
            return self.is_final().then_some(StepKind::Final);
        }
        if self.action.is_some() || self.action_input.is_some() {
            let acting = !self.thought.trim().is_empty()
                && self.action.as_deref().is_some_and(|a| !a.trim().is_empty())
                && self.action_input.is_some();
            return acting.then_some(StepKind::Acting);
        }
        if !self.thought.trim().is_empty() {
            return Some(StepKind::Thinking);
        }
        None
    }

    /// Check the structural rules: a step is thinking, acting, final,
    /// or errored; no other combination is valid.
    pub fn validate(&self) -> Result<StepKind, AgentError> {
        self.kind().ok_or_else(|| {
            AgentError::Validation(
                "step is neither thinking, acting, final, nor errored".to_string(),
            )
        })
    }
}

impl Default for ReactStep {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only log of the steps taken for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactTrace {
    /// Unique trace identifier.
    pub id: String,
    /// Steps in completion order.
    pub steps: Vec<ReactStep>,
    /// When the loop started.
    pub start_time: DateTime<Utc>,
    /// When the loop finished.
    pub end_time: Option<DateTime<Utc>>,
    /// Total loop duration.
    pub duration: Duration,
    /// Whether the trace ended with a final step.
    pub is_completed: bool,
    /// The final answer, when completed.
    pub final_output: String,
}

impl ReactTrace {
    /// Start an empty trace.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            steps: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            duration: Duration::ZERO,
            is_completed: false,
            final_output: String::new(),
        }
    }

    /// Append a step.
    pub fn append(&mut self, step: ReactStep) {
        self.steps.push(step);
    }

    /// Number of iterations taken; always equals the step count.
    pub fn iteration_count(&self) -> usize {
        self.steps.len()
    }

    /// Close the trace. When the last step is final the trace becomes
    /// completed and `final_output` is that step's answer.
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.end_time = Some(now);
        self.duration = (now - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);

        if let Some(last) = self.steps.last() {
            if last.is_final() {
                self.is_completed = true;
                self.final_output = last.final_answer.clone().unwrap_or_default();
            }
        }
    }

    /// Sorted unique non-empty action names across the trace.
    pub fn tools_used(&self) -> Vec<String> {
        let mut tools: Vec<String> = self
            .steps
            .iter()
            .filter_map(|s| s.action.clone())
            .filter(|a| !a.is_empty())
            .collect();
        tools.sort();
        tools.dedup();
        tools
    }
}

impl Default for ReactTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_classification() {
        let mut thinking = ReactStep::new();
        thinking.thought = "I should look this up".to_string();
        assert_eq!(thinking.kind(), Some(StepKind::Thinking));

        let mut acting = ReactStep::new();
        acting.thought = "need the calculator".to_string();
        acting.action = Some("calculator".to_string());
        acting.action_input = Some(HashMap::new());
        assert_eq!(acting.kind(), Some(StepKind::Acting));

        let final_step = ReactStep::final_step("done", "42");
        assert_eq!(final_step.kind(), Some(StepKind::Final));
        assert!(final_step.is_final());

        let mut errored = ReactStep::new();
        errored.error = Some("boom".to_string());
        assert_eq!(errored.kind(), Some(StepKind::Errored));
    }

    #[test]
    fn invalid_combinations_fail_validation() {
        // Empty step.
        assert!(ReactStep::new().validate().is_err());

        // Action without thought.
        let mut step = ReactStep::new();
        step.action = Some("calculator".to_string());
        step.action_input = Some(HashMap::new());
        assert!(step.validate().is_err());

        // Complete without a final answer.
        let mut step = ReactStep::new();
        step.thought = "done".to_string();
        step.is_complete = true;
        assert!(step.validate().is_err());
    }

    #[test]
    fn trace_completion_mirrors_last_step() {
        let mut trace = ReactTrace::new();
        let mut thinking = ReactStep::new();
        thinking.thought = "hmm".to_string();
        trace.append(thinking);
        trace.finish();
        assert!(!trace.is_completed);
        assert_eq!(trace.iteration_count(), 1);

        let mut trace = ReactTrace::new();
        trace.append(ReactStep::final_step("done", "answer"));
        trace.finish();
        assert!(trace.is_completed);
        assert_eq!(trace.final_output, "answer");
        assert!(trace.end_time.unwrap() >= trace.start_time);
    }

    #[test]
    fn tools_used_is_sorted_unique() {
        let mut trace = ReactTrace::new();
        for name in ["search", "calculator", "search"] {
            let mut step = ReactStep::new();
            step.thought = "act".to_string();
            step.action = Some(name.to_string());
            step.action_input = Some(HashMap::new());
            trace.append(step);
        }
        assert_eq!(trace.tools_used(), vec!["calculator", "search"]);
    }
}

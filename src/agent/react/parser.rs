//! Parsing and formatting of reason-act model output.
//!
//! A model response is a flat text block with case-insensitive field
//! markers (`Thought:`, `Action:`, `Action Input:`, `Observation:`,
//! `Final Answer:`). Parsing extracts them into a [`ReactStep`];
//! formatting is the inverse, emitting only the populated fields.
//! Parse-then-format-then-parse yields an equivalent step.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::agent::react::step::ReactStep;
use crate::errors::AgentError;

static THOUGHT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*thought\s*:[ \t]*(.*)$").expect("thought regex"));

static ACTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*action\s*:[ \t]*(.*)$").expect("action regex"));

static ACTION_INPUT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)action\s*input\s*:[ \t]*(.*?)\s*(?:\n\s*observation\s*:|\n\s*final\s*answer\s*:|\z)")
        .expect("action input regex")
});

static OBSERVATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*observation\s*:[ \t]*(.*)$").expect("observation regex"));

static FINAL_ANSWER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)final\s*answer\s*:[ \t]*(.*)\z").expect("final answer regex"));

/// Parse one model response into a step.
///
/// A present `Final Answer:` makes the step final and suppresses the
/// action extractors. The action input must parse to a JSON object;
/// anything else is a parse error.
pub fn parse(text: &str) -> Result<ReactStep, AgentError> {
    let mut step = ReactStep::new();

    let thought = THOUGHT_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string());

    if let Some(caps) = FINAL_ANSWER_RE.captures(text) {
        step.thought = thought.unwrap_or_default();
        step.final_answer = Some(caps[1].trim().to_string());
        step.is_complete = true;
        return Ok(step);
    }

    let action = ACTION_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|a| !a.is_empty());
    let action_input = ACTION_INPUT_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|i| !i.is_empty());
    let observation = OBSERVATION_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|o| !o.is_empty());

    if thought.is_none() && action.is_none() && action_input.is_none() && observation.is_none() {
        return Err(AgentError::Parse(
            "response contains no reason-act fields".to_string(),
        ));
    }

    if let Some(raw) = action_input {
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Object(map)) => {
                step.action_input = Some(map.into_iter().collect());
            }
            Ok(_) => {
                return Err(AgentError::Parse(
                    "action input is not a JSON object".to_string(),
                ))
            }
            Err(err) => {
                return Err(AgentError::Parse(format!(
                    "action input is not valid JSON: {err}"
                )))
            }
        }
    }

    step.thought = thought.unwrap_or_default();
    step.action = action;
    step.observation = observation;
    Ok(step)
}

/// Render a step back to the wire format.
///
/// Emits only the non-empty fields, one per line: `Thought`, then
/// either `Final Answer` (and stop) or `Action`, `Action Input` as
/// compact JSON, and `Observation`. A non-serializable action input is
/// an error rather than a silently dropped line.
pub fn format_step(step: &ReactStep) -> Result<String, AgentError> {
    let mut lines = Vec::new();

    if !step.thought.is_empty() {
        lines.push(format!("Thought: {}", step.thought));
    }

    if let Some(answer) = step.final_answer.as_deref().filter(|a| !a.is_empty()) {
        lines.push(format!("Final Answer: {answer}"));
        return Ok(lines.join("\n"));
    }

    if let Some(action) = step.action.as_deref().filter(|a| !a.is_empty()) {
        lines.push(format!("Action: {action}"));
    }

    if let Some(input) = &step.action_input {
        let json = serde_json::to_string(input).map_err(|err| {
            AgentError::Validation(format!("action input cannot be serialized: {err}"))
        })?;
        lines.push(format!("Action Input: {json}"));
    }

    if let Some(observation) = step.observation.as_deref().filter(|o| !o.is_empty()) {
        lines.push(format!("Observation: {observation}"));
    }

    Ok(lines.join("\n"))
}

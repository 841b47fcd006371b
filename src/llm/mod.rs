//! LLM client abstraction.
//!
//! The runtime never talks to a model provider directly; it consumes the
//! [`LLMClient`] trait. A call takes a message list and per-call options
//! (max tokens, temperature, tool schemas) and yields a response with
//! content, finish reason, and token/cost usage. Implementations are
//! expected to honor the cancellation token at their network suspension
//! points.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::AgentError;

/// Role of a message participant in an LLM conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions framing the conversation.
    System,
    /// The user (or the runtime acting on the user's behalf).
    User,
    /// A prior model response.
    Assistant,
}

impl MessageRole {
    /// Wire-format string for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A single message in an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who the message is from.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call options passed to the LLM client.
///
/// `tools` holds function schemas in the provider wire shape:
/// `{"type": "function", "function": {"name", "description", "parameters"}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallOptions {
    /// Maximum tokens the model may generate.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Tool schemas advertised to the model.
    #[serde(default)]
    pub tools: Vec<Value>,
}

/// Token and cost accounting for a single LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u64,
    /// Tokens generated by the model.
    pub completion_tokens: u64,
    /// Total tokens for the call.
    pub total_tokens: u64,
    /// Cost in USD as reported by the provider.
    pub cost: f64,
}

impl TokenUsage {
    /// Accumulate another call's usage into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.cost += other.cost;
    }
}

/// Response from an LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    /// Generated text.
    pub content: String,
    /// Model that produced the response.
    pub model: String,
    /// Provider finish reason (e.g. `"stop"`, `"length"`).
    pub finish_reason: String,
    /// Token and cost usage for the call.
    pub usage: TokenUsage,
}

/// Client-side interface to a language model.
///
/// Implementations wrap a provider SDK or HTTP transport. The runtime
/// threads a [`CancellationToken`] into every call; implementations
/// should abandon in-flight requests once it fires.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Execute one completion call.
    async fn call(
        &self,
        messages: &[Message],
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<LLMResponse, AgentError>;

    /// Identifier of the model this client targets.
    fn model(&self) -> &str;

    /// Release any underlying transport resources.
    fn close(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Build the provider wire shape for one function schema.
pub fn function_schema(name: &str, description: &str, parameters: Value) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

/// Render a `role -> content` map into a [`Message`] list, skipping
/// unknown roles. Convenience for callers holding loosely typed prompts.
pub fn messages_from_map(map: &HashMap<String, String>) -> Vec<Message> {
    let mut messages = Vec::new();
    if let Some(system) = map.get("system") {
        messages.push(Message::system(system.clone()));
    }
    if let Some(user) = map.get("user") {
        messages.push(Message::user(user.clone()));
    }
    messages
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Stub LLM clients used across the crate's tests.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Client replaying a scripted sequence of responses.
    ///
    /// Once the script is exhausted (or when built with `repeating`)
    /// every further call returns the last response.
    pub struct ScriptedLLM {
        responses: Mutex<Vec<String>>,
        repeat: Mutex<Option<String>>,
        calls: AtomicUsize,
        usage: TokenUsage,
        model: String,
        last_messages: Mutex<Vec<Message>>,
    }

    impl ScriptedLLM {
        pub fn new(responses: Vec<String>) -> Self {
            Self {
                responses: Mutex::new(responses),
                repeat: Mutex::new(None),
                calls: AtomicUsize::new(0),
                usage: TokenUsage::default(),
                model: "stub-model".to_string(),
                last_messages: Mutex::new(Vec::new()),
            }
        }

        /// Messages from the most recent call.
        pub fn last_messages(&self) -> Vec<Message> {
            self.last_messages.lock().clone()
        }

        /// Content of the user message from the most recent call.
        pub fn last_prompt(&self) -> Option<String> {
            self.last_messages
                .lock()
                .iter()
                .find(|m| m.role == MessageRole::User)
                .map(|m| m.content.clone())
        }

        pub fn repeating(text: &str) -> Self {
            let stub = Self::new(Vec::new());
            *stub.repeat.lock() = Some(text.to_string());
            stub
        }

        pub fn with_usage_per_call(mut self, total_tokens: u64, cost: f64) -> Self {
            self.usage = TokenUsage {
                prompt_tokens: total_tokens.saturating_sub(total_tokens / 3),
                completion_tokens: total_tokens / 3,
                total_tokens,
                cost,
            };
            self
        }

        pub fn with_model(mut self, model: &str) -> Self {
            self.model = model.to_string();
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedLLM {
        async fn call(
            &self,
            messages: &[Message],
            _options: &CallOptions,
            _cancel: &CancellationToken,
        ) -> Result<LLMResponse, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_messages.lock() = messages.to_vec();

            let content = {
                let mut responses = self.responses.lock();
                if responses.is_empty() {
                    self.repeat.lock().clone().unwrap_or_default()
                } else {
                    let next = responses.remove(0);
                    if responses.is_empty() {
                        *self.repeat.lock() = Some(next.clone());
                    }
                    next
                }
            };

            Ok(LLMResponse {
                content,
                model: self.model.clone(),
                finish_reason: "stop".to_string(),
                usage: self.usage,
            })
        }

        fn model(&self) -> &str {
            &self.model
        }
    }

    /// Client whose responses never match the reason-act format.
    pub struct UnparseableLLM {
        inner: ScriptedLLM,
    }

    impl UnparseableLLM {
        pub fn new(text: &str) -> Self {
            Self {
                inner: ScriptedLLM::repeating(text),
            }
        }
    }

    #[async_trait]
    impl LLMClient for UnparseableLLM {
        async fn call(
            &self,
            messages: &[Message],
            options: &CallOptions,
            cancel: &CancellationToken,
        ) -> Result<LLMResponse, AgentError> {
            self.inner.call(messages, options, cancel).await
        }

        fn model(&self) -> &str {
            self.inner.model()
        }
    }

    /// Client that always fails.
    pub struct FailingLLM {
        pub message: String,
    }

    #[async_trait]
    impl LLMClient for FailingLLM {
        async fn call(
            &self,
            _messages: &[Message],
            _options: &CallOptions,
            _cancel: &CancellationToken,
        ) -> Result<LLMResponse, AgentError> {
            Err(AgentError::LLMCallFailed(self.message.clone()))
        }

        fn model(&self) -> &str {
            "failing-model"
        }
    }

    /// Client that never returns and ignores cancellation, for deadline
    /// tests.
    pub struct BlockingLLM;

    #[async_trait]
    impl LLMClient for BlockingLLM {
        async fn call(
            &self,
            _messages: &[Message],
            _options: &CallOptions,
            _cancel: &CancellationToken,
        ) -> Result<LLMResponse, AgentError> {
            futures::future::pending::<()>().await;
            unreachable!()
        }

        fn model(&self) -> &str {
            "blocking-model"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cost: 0.01,
        });
        total.add(&TokenUsage {
            prompt_tokens: 20,
            completion_tokens: 10,
            total_tokens: 30,
            cost: 0.02,
        });
        assert_eq!(total.total_tokens, 45);
        assert!((total.cost - 0.03).abs() < 1e-9);
    }

    #[test]
    fn function_schema_has_wire_shape() {
        let schema = function_schema("calculator", "Does math", serde_json::json!({"type": "object"}));
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "calculator");
    }

    #[test]
    fn message_roles_serialize_lowercase() {
        let msg = Message::system("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
    }
}

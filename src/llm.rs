//! Language-model collaborator interface.
//!
//! The core consumes four logical agents by name — game agent, puzzle
//! agent, map parser, item parser — each backed by any [`LlmClient`]
//! implementation. Provider-specific client code lives outside this crate;
//! tests use the scripted client in [`crate::testing`].

use crate::error::LlmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role in a chat exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request for a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// System-level instructions.
    pub system: String,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: usize,
}

impl ChatRequest {
    /// Create a request with a system prompt and no messages.
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            messages: Vec::new(),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }

    /// Add a message.
    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set the maximum tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token usage statistics for a single call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Tokens served from the provider's prompt cache.
    pub cached_tokens: u64,
}

impl TokenUsage {
    /// Total tokens in and out.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Response from a completion call, with usage metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    pub cost_estimate: f64,
    pub latency_ms: f64,
}

/// Core trait for language-model clients.
///
/// `complete_json` implementations must retry schema-validation failures up
/// to 3 times, feeding the prior attempt and the error back as context,
/// and then give up by returning an empty object (`{}`) rather than an
/// error. Callers treat an empty object as "nothing extracted".
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Free-text completion.
    async fn complete(&self, request: ChatRequest) -> Result<Completion, LlmError>;

    /// Structured completion conforming to the given JSON schema. Returns
    /// the extracted value plus the usage metrics of the call.
    async fn complete_json(
        &self,
        request: ChatRequest,
        schema: &Value,
    ) -> Result<(Value, Completion), LlmError>;

    /// Provider name for metrics (e.g. "anthropic").
    fn provider_name(&self) -> &str;

    /// Model identifier for metrics.
    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_builder() {
        let req = ChatRequest::new("You play text adventures.")
            .with_message(ChatMessage::user("north"))
            .with_temperature(0.2)
            .with_max_tokens(256);
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.temperature, 0.2);
        assert_eq!(req.max_tokens, 256);
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            input_tokens: 120,
            output_tokens: 30,
            cached_tokens: 100,
        };
        assert_eq!(usage.total(), 150);
    }
}

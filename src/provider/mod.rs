// src/provider/mod.rs — Language-model capability

pub mod openai_compat;
pub mod registry;
pub mod retry;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::infra::errors::OptimizerError;

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, OptimizerError>> + Send>>;

/// Core trait every model adapter implements.
///
/// A stream yields zero or more chunks and then ends; ending without an
/// `Err` item is the completion event.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn id(&self) -> &str;

    /// Whether replies carry a separate reasoning trace.
    fn supports_reasoning(&self) -> bool {
        false
    }

    async fn generate(&self, request: ChatRequest) -> Result<ChatResponse, OptimizerError>;

    async fn generate_stream(&self, request: ChatRequest) -> Result<ChatStream, OptimizerError>;
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub answer: String,
    pub thought: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default)]
pub struct ChatChunk {
    pub answer_delta: String,
    pub thought_delta: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Token counters reported for one call, or accumulated for a channel.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Add another call's usage to this running total.
    pub fn accumulate(&mut self, delta: &TokenUsage) {
        self.prompt_tokens += delta.prompt_tokens;
        self.completion_tokens += delta.completion_tokens;
        self.total_tokens += delta.total_tokens;
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_new_sums_total() {
        let u = TokenUsage::new(100, 50);
        assert_eq!(u.total_tokens, 150);
    }

    #[test]
    fn test_token_usage_accumulate() {
        let mut total = TokenUsage::default();
        total.accumulate(&TokenUsage::new(10, 5));
        total.accumulate(&TokenUsage::new(20, 1));
        assert_eq!(total.prompt_tokens, 30);
        assert_eq!(total.completion_tokens, 6);
        assert_eq!(total.total_tokens, 36);
    }

    #[test]
    fn test_token_usage_default_is_zero() {
        assert!(TokenUsage::default().is_zero());
        assert!(!TokenUsage::new(1, 0).is_zero());
    }

    #[test]
    fn test_token_usage_serializes_camel_case() {
        let json = serde_json::to_string(&TokenUsage::new(3, 4)).unwrap();
        assert_eq!(
            json,
            r#"{"promptTokens":3,"completionTokens":4,"totalTokens":7}"#
        );
    }

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").content, "a");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }
}

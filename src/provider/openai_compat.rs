// src/provider/openai_compat.rs — Generic OpenAI-compatible chat completions adapter
//
// Used for OpenAI, DeepSeek, Qwen (DashScope), OpenRouter and any endpoint
// speaking the /chat/completions dialect. Reasoning models that return
// `reasoning_content` get it surfaced as the thought trace.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use std::time::Duration;

use super::{ChatChunk, ChatRequest, ChatResponse, ChatStream, LanguageModel, TokenUsage};
use crate::infra::config::ModelConfig;
use crate::infra::errors::OptimizerError;

pub struct OpenAICompatProvider {
    id_str: String,
    model: String,
    api_key: String,
    base_url: String,
    reasoning: bool,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAICompatProvider {
    pub fn from_config(cfg: &ModelConfig, timeout: Duration) -> Result<Self, OptimizerError> {
        let api_key = cfg.resolve_api_key().ok_or_else(|| {
            OptimizerError::Configuration(format!("model '{}' has no API key", cfg.id))
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OptimizerError::Configuration(e.to_string()))?;

        Ok(Self {
            id_str: cfg.id.clone(),
            model: cfg.model.clone(),
            api_key,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            reasoning: cfg.reasoning,
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            client,
        })
    }

    fn body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        if let Some(max_tokens) = request.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature.or(self.temperature) {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }

    fn provider_error(&self, message: impl Into<String>, retriable: bool) -> OptimizerError {
        OptimizerError::Provider {
            provider: self.id_str.clone(),
            message: message.into(),
            retriable,
        }
    }
}

fn parse_usage(value: &serde_json::Value) -> Option<TokenUsage> {
    if !value.is_object() {
        return None;
    }
    let prompt = value["prompt_tokens"].as_u64().unwrap_or(0);
    let completion = value["completion_tokens"].as_u64().unwrap_or(0);
    let total = value["total_tokens"]
        .as_u64()
        .unwrap_or(prompt + completion);
    Some(TokenUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
    })
}

#[async_trait]
impl LanguageModel for OpenAICompatProvider {
    fn id(&self) -> &str {
        &self.id_str
    }

    fn supports_reasoning(&self) -> bool {
        self.reasoning
    }

    async fn generate(&self, request: ChatRequest) -> Result<ChatResponse, OptimizerError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.body(&request, false))
            .send()
            .await
            .map_err(|e| self.provider_error(e.to_string(), e.is_timeout()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(self.provider_error(
                format!("HTTP {status}: {error_body}"),
                status.is_server_error() || status.as_u16() == 429,
            ));
        }

        let resp: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.provider_error(e.to_string(), false))?;

        let message = &resp["choices"][0]["message"];
        Ok(ChatResponse {
            answer: message["content"].as_str().unwrap_or("").to_string(),
            thought: message["reasoning_content"]
                .as_str()
                .unwrap_or("")
                .to_string(),
            usage: parse_usage(&resp["usage"]).unwrap_or_default(),
        })
    }

    async fn generate_stream(&self, request: ChatRequest) -> Result<ChatStream, OptimizerError> {
        let request_builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.body(&request, true));

        let mut es = request_builder
            .eventsource()
            .map_err(|e| self.provider_error(e.to_string(), false))?;
        let provider_id = self.id_str.clone();

        let stream = async_stream::stream! {
            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(msg)) => {
                        if msg.data == "[DONE]" {
                            break;
                        }
                        let parsed: serde_json::Value = match serde_json::from_str(&msg.data) {
                            Ok(v) => v,
                            Err(e) => {
                                yield Err(OptimizerError::Provider {
                                    provider: provider_id.clone(),
                                    message: format!("Failed to parse SSE data: {e}"),
                                    retriable: false,
                                });
                                break;
                            }
                        };

                        let delta = &parsed["choices"][0]["delta"];
                        let chunk = ChatChunk {
                            answer_delta: delta["content"].as_str().unwrap_or("").to_string(),
                            thought_delta: delta["reasoning_content"]
                                .as_str()
                                .unwrap_or("")
                                .to_string(),
                            usage: parse_usage(&parsed["usage"]),
                        };

                        if !chunk.answer_delta.is_empty()
                            || !chunk.thought_delta.is_empty()
                            || chunk.usage.is_some()
                        {
                            yield Ok(chunk);
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        yield Err(OptimizerError::Provider {
                            provider: provider_id.clone(),
                            message: format!("SSE stream error: {e}"),
                            retriable: false,
                        });
                        break;
                    }
                }
            }
            es.close();
        };

        Ok(Box::pin(stream))
    }
}

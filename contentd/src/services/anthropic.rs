//! Anthropic Claude API client implementation
//!
//! Implements the LlmClient trait for Anthropic's Messages API. Both the
//! blocking and SSE-streaming paths return the same aggregated response;
//! streaming only changes how bytes arrive on the wire.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::llm::{ChatRequest, ChatResponse, LlmClient, LlmError, Message, Role, TokenUsage, ToolCall, model_pricing};
use crate::config::LlmConfig;

/// Anthropic Claude API client
pub struct AnthropicClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl AnthropicClient {
    /// Create a new client from configuration
    ///
    /// Reads the API key from the environment variable specified in config.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| LlmError::InvalidResponse(format!("Environment variable {} not set", config.api_key_env)))?;

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.clone(),
            http,
            max_tokens: config.max_tokens,
        })
    }

    fn model_for(&self, request: &ChatRequest) -> String {
        request.model.clone().unwrap_or_else(|| self.model.clone())
    }

    /// Build the request body for the Anthropic API
    fn build_request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let max_tokens = request.max_tokens.unwrap_or(self.max_tokens).min(self.max_tokens);
        let mut body = serde_json::json!({
            "model": self.model_for(request),
            "max_tokens": max_tokens,
            "messages": self.convert_messages(&request.messages),
        });

        if let Some(system) = &request.system_prompt {
            body["system"] = serde_json::json!(system);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(request.tools);
        }

        body
    }

    fn convert_messages(&self, messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                serde_json::json!({ "role": role, "content": msg.content })
            })
            .collect()
    }

    fn request_builder(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(body)
    }

    fn finalize(&self, model: &str, content: String, tool_calls: Vec<ToolCall>, usage: TokenUsage) -> ChatResponse {
        let (input_price, output_price) = model_pricing(model);
        let cost = (usage.prompt_tokens as f64 / 1_000_000.0) * input_price
            + (usage.completion_tokens as f64 / 1_000_000.0) * output_price;
        ChatResponse {
            content,
            tool_calls,
            usage,
            cost,
            model: model.to_string(),
        }
    }

    async fn chat_blocking(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = self.build_request_body(request);
        let response = self.request_builder(&body).send().await?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError { status, message: text });
        }

        let api_response: AnthropicResponse = response.json().await?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in api_response.content {
            match block {
                AnthropicContentBlock::Text { text } => content.push_str(&text),
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall { id, name, input });
                }
            }
        }

        let usage = TokenUsage::new(api_response.usage.input_tokens, api_response.usage.output_tokens);
        Ok(self.finalize(&self.model_for(request), content, tool_calls, usage))
    }

    async fn chat_streaming(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut body = self.build_request_body(request);
        body["stream"] = serde_json::json!(true);

        let mut es =
            EventSource::new(self.request_builder(&body)).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut current_tool: Option<(String, String, String)> = None; // (id, name, json_acc)
        let mut usage = TokenUsage::default();

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Message(msg)) => {
                    let data: serde_json::Value = serde_json::from_str(&msg.data).map_err(LlmError::Json)?;

                    match data["type"].as_str() {
                        Some("message_start") => {
                            if let Some(u) = data["message"].get("usage") {
                                usage.prompt_tokens = u["input_tokens"].as_u64().unwrap_or(0);
                            }
                        }
                        Some("content_block_start") => {
                            if let Some(block) = data.get("content_block")
                                && block["type"] == "tool_use"
                            {
                                let id = block["id"].as_str().unwrap_or("").to_string();
                                let name = block["name"].as_str().unwrap_or("").to_string();
                                current_tool = Some((id, name, String::new()));
                            }
                        }
                        Some("content_block_delta") => {
                            if let Some(delta) = data.get("delta") {
                                if let Some(text) = delta["text"].as_str() {
                                    content.push_str(text);
                                }
                                if let Some(json) = delta["partial_json"].as_str()
                                    && let Some((_, _, ref mut acc)) = current_tool
                                {
                                    acc.push_str(json);
                                }
                            }
                        }
                        Some("content_block_stop") => {
                            if let Some((id, name, json)) = current_tool.take() {
                                let input: serde_json::Value =
                                    serde_json::from_str(&json).unwrap_or(serde_json::json!({}));
                                tool_calls.push(ToolCall { id, name, input });
                            }
                        }
                        Some("message_delta") => {
                            if let Some(u) = data.get("usage") {
                                usage.completion_tokens = u["output_tokens"].as_u64().unwrap_or(0);
                            }
                        }
                        Some("message_stop") => break,
                        _ => {}
                    }
                }
                Ok(Event::Open) => {}
                Err(e) => return Err(LlmError::InvalidResponse(e.to_string())),
            }
        }

        usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
        Ok(self.finalize(&self.model_for(request), content, tool_calls, usage))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        debug!(
            task_id = request.task_id.as_deref().unwrap_or("-"),
            step = request.step_name.as_deref().unwrap_or("-"),
            stream = request.stream,
            "llm chat"
        );
        if request.stream {
            self.chat_streaming(&request).await
        } else {
            self.chat_blocking(&request).await
        }
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let probe = ChatRequest {
            messages: vec![Message::user("ping")],
            max_tokens: Some(1),
            ..Default::default()
        };
        self.chat_blocking(&probe).await.map(|_| ())
    }

    fn estimate_tokens(&self, text: &str) -> u64 {
        // Heuristic: ~4 ASCII chars per token, non-ASCII (CJK) ~1 per char
        let mut ascii = 0u64;
        let mut other = 0u64;
        for c in text.chars() {
            if c.is_ascii() { ascii += 1 } else { other += 1 }
        }
        ascii.div_ceil(4) + other
    }

    fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let (input_price, output_price) = model_pricing(&self.model);
        (input_tokens as f64 / 1_000_000.0) * input_price + (output_tokens as f64 / 1_000_000.0) * output_price
    }
}

// Anthropic API response types

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> AnthropicClient {
        AnthropicClient {
            model: "claude-sonnet-4-20250514".to_string(),
            api_key: "test-key".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            http: Client::new(),
            max_tokens: 8192,
        }
    }

    #[test]
    fn test_build_request_body_basic() {
        let client = test_client();
        let request = ChatRequest::text("You are helpful", "Hello");

        let body = client.build_request_body(&request);

        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["max_tokens"], 8192);
        assert_eq!(body["system"], "You are helpful");
        assert!(body["messages"].is_array());
        assert!(body.get("tools").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_build_request_body_overrides() {
        let client = test_client();
        let request = ChatRequest {
            model: Some("claude-haiku-3-5".to_string()),
            max_tokens: Some(1000),
            temperature: Some(0.3),
            messages: vec![Message::user("Hi")],
            ..Default::default()
        };

        let body = client.build_request_body(&request);

        assert_eq!(body["model"], "claude-haiku-3-5");
        assert_eq!(body["max_tokens"], 1000);
        assert!((body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_max_tokens_capped_at_config() {
        let client = test_client();
        let request = ChatRequest {
            max_tokens: Some(50_000),
            messages: vec![Message::user("Hi")],
            ..Default::default()
        };

        let body = client.build_request_body(&request);
        assert_eq!(body["max_tokens"], 8192);
    }

    #[test]
    fn test_estimate_tokens_mixed_script() {
        let client = test_client();
        // 8 ASCII chars -> 2 tokens
        assert_eq!(client.estimate_tokens("abcdefgh"), 2);
        // 4 CJK chars -> 4 tokens
        assert_eq!(client.estimate_tokens("人工智能"), 4);
    }

    #[test]
    fn test_estimate_cost_sonnet() {
        let client = test_client();
        // 1M input + 100k output on sonnet: $3 + $1.50
        let cost = client.estimate_cost(1_000_000, 100_000);
        assert!((cost - 4.5).abs() < 0.01);
    }

    #[test]
    fn test_finalize_computes_cost() {
        let client = test_client();
        let response = client.finalize(
            "claude-sonnet-4-20250514",
            "hello".to_string(),
            vec![],
            TokenUsage::new(1_000_000, 100_000),
        );
        assert!((response.cost - 4.5).abs() < 0.01);
        assert_eq!(response.usage.total_tokens, 1_100_000);
    }
}

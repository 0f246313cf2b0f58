//! LLM client contract and request/response types
//!
//! Streaming is an implementation detail of the adapter: callers always
//! receive the final aggregated content, never partial chunks. Adapters make
//! a single transparent attempt; multi-attempt logic lives in the workflow
//! engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Check if this is a rate limit error
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status >= 500,
            LlmError::Network(_) => true,
            LlmError::Timeout(_) => true,
            LlmError::InvalidResponse(_) => false,
            LlmError::Json(_) => false,
        }
    }

    /// Get the retry duration if this is a rate limit error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Tool definition offered to the model
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call requested by the model
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// A chat request - everything needed for one LLM call
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,

    /// Override the adapter's configured model
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,

    /// Stream internally; the caller still gets the aggregated result
    pub stream: bool,

    pub tools: Vec<ToolDefinition>,

    /// Accounting labels, threaded through for logging only
    pub task_id: Option<String>,
    pub step_name: Option<String>,
}

impl ChatRequest {
    /// One-shot request: a system prompt and a single user message
    pub fn text(system_prompt: impl Into<String>, user_text: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            messages: vec![Message::user(user_text)],
            ..Default::default()
        }
    }

    pub fn with_labels(mut self, task_id: impl Into<String>, step_name: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self.step_name = Some(step_name.into());
        self
    }

    pub fn streamed(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// Token usage for cost tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
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
}

/// Response from a chat request
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Final aggregated content
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    /// Cost in USD for this call
    pub cost: f64,
    pub model: String,
}

/// Per-model pricing in USD per million tokens: (input, output)
pub fn model_pricing(model: &str) -> (f64, f64) {
    match model {
        m if m.contains("opus") => (15.0, 75.0),
        m if m.contains("sonnet") => (3.0, 15.0),
        m if m.contains("haiku") => (0.25, 1.25),
        _ => (3.0, 15.0), // Default to sonnet pricing
    }
}

/// LLM chat client
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat request and return the final aggregated response
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Cheap reachability probe
    async fn health_check(&self) -> Result<(), LlmError>;

    /// Rough token estimate for prompt budgeting
    fn estimate_tokens(&self, text: &str) -> u64;

    /// Estimated cost in USD for the given token counts
    fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock LLM client for unit tests; replays canned responses in order
    pub struct MockLlmClient {
        responses: Vec<String>,
        call_count: AtomicUsize,
        requests: Mutex<Vec<ChatRequest>>,
        fail: bool,
    }

    impl MockLlmClient {
        pub fn new(responses: Vec<String>) -> Self {
            Self {
                responses,
                call_count: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        /// A client whose every call errors
        pub fn failing() -> Self {
            Self {
                responses: vec![],
                call_count: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Requests seen so far, for prompt assertions
        pub fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            if self.fail {
                return Err(LlmError::ApiError {
                    status: 500,
                    message: "mock failure".to_string(),
                });
            }
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            let content = self
                .responses
                .get(idx)
                .cloned()
                .ok_or_else(|| LlmError::InvalidResponse("No more mock responses".to_string()))?;
            let usage = TokenUsage::new(100, 200);
            Ok(ChatResponse {
                content,
                tool_calls: vec![],
                usage,
                cost: 0.001,
                model: "mock".to_string(),
            })
        }

        async fn health_check(&self) -> Result<(), LlmError> {
            Ok(())
        }

        fn estimate_tokens(&self, text: &str) -> u64 {
            (text.len() as u64).div_ceil(4)
        }

        fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
            let (input_price, output_price) = model_pricing("mock");
            (input_tokens as f64 / 1_000_000.0) * input_price + (output_tokens as f64 / 1_000_000.0) * output_price
        }
    }
}

//! External service adapters
//!
//! Three uniform contracts - LLM chat, web search, image generation - each
//! with a provider backing selected from configuration. Adapters never
//! retry visibly beyond a single transparent attempt; the workflow engine
//! owns all multi-attempt logic.

mod anthropic;
mod image;
mod llm;
mod search;

pub use anthropic::AnthropicClient;
pub use image::{ArkImageClient, GeneratedImage, ImageClient, ImageError, ImageRequest, download_image, try_download_image};
pub use llm::{
    ChatRequest, ChatResponse, LlmClient, LlmError, Message, Role, TokenUsage, ToolCall, ToolDefinition, model_pricing,
};
pub use search::{SearchClient, SearchError, SearchHit, SearchResponse, TavilyClient};

#[cfg(test)]
pub use image::mock as image_mock;
#[cfg(test)]
pub use llm::mock as llm_mock;
#[cfg(test)]
pub use search::mock as search_mock;

use std::sync::Arc;

use crate::config::Config;

/// The adapter set a workflow run needs
#[derive(Clone)]
pub struct Services {
    pub llm: Arc<dyn LlmClient>,
    pub search: Arc<dyn SearchClient>,
    /// None when image generation is disabled; the workflow continues
    /// without images
    pub image: Option<Arc<dyn ImageClient>>,
}

impl Services {
    /// Build the configured provider clients
    pub fn from_config(config: &Config) -> eyre::Result<Self> {
        let llm: Arc<dyn LlmClient> = match config.llm.provider.as_str() {
            "anthropic" => Arc::new(AnthropicClient::from_config(&config.llm)?),
            other => eyre::bail!("Unknown LLM provider: '{}'. Supported: anthropic", other),
        };

        let search: Arc<dyn SearchClient> = match config.search.provider.as_str() {
            "tavily" => Arc::new(TavilyClient::from_config(&config.search)?),
            other => eyre::bail!("Unknown search provider: '{}'. Supported: tavily", other),
        };

        let image: Option<Arc<dyn ImageClient>> = if config.image.enabled {
            match config.image.provider.as_str() {
                "ark" => Some(Arc::new(ArkImageClient::from_config(&config.image)?)),
                other => eyre::bail!("Unknown image provider: '{}'. Supported: ark", other),
            }
        } else {
            None
        };

        Ok(Self { llm, search, image })
    }
}

//! Web search client contract and Tavily-style backing

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::SearchConfig;

/// Errors that can occur during search operations
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// A single search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// Aggregated search response
///
/// Backends that cannot synthesize an answer leave it empty and populate
/// results only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub answer: String,
    pub results: Vec<SearchHit>,
}

/// Web search client
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchResponse, SearchError>;

    async fn health_check(&self) -> Result<(), SearchError>;
}

/// Tavily search API client
pub struct TavilyClient {
    api_key: String,
    base_url: String,
    http: Client,
}

impl TavilyClient {
    /// Create a new client from configuration
    pub fn from_config(config: &SearchConfig) -> Result<Self, SearchError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            SearchError::InvalidResponse(format!("Environment variable {} not set", config.api_key_env))
        })?;

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(SearchError::Network)?;

        Ok(Self {
            api_key,
            base_url: config.base_url.clone(),
            http,
        })
    }
}

#[async_trait]
impl SearchClient for TavilyClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchResponse, SearchError> {
        debug!(query, max_results, "search");

        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
            "include_answer": true,
        });

        let response = self.http.post(format!("{}/search", self.base_url)).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(SearchError::ApiError { status, message: text });
        }

        let api_response: TavilyResponse = response.json().await?;
        Ok(SearchResponse {
            answer: api_response.answer.unwrap_or_default(),
            results: api_response
                .results
                .into_iter()
                .map(|r| SearchHit {
                    title: r.title,
                    url: r.url,
                    content: r.content,
                    score: r.score.unwrap_or(0.0),
                    published_date: r.published_date,
                    author: None,
                })
                .collect(),
        })
    }

    async fn health_check(&self) -> Result<(), SearchError> {
        self.search("health check", 1).await.map(|_| ())
    }
}

// Tavily API response types

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    content: String,
    score: Option<f64>,
    published_date: Option<String>,
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock search client returning a fixed response
    pub struct MockSearchClient {
        response: SearchResponse,
        call_count: AtomicUsize,
        fail: bool,
    }

    impl MockSearchClient {
        pub fn new(response: SearchResponse) -> Self {
            Self {
                response,
                call_count: AtomicUsize::new(0),
                fail: false,
            }
        }

        pub fn with_hits(hits: Vec<SearchHit>) -> Self {
            Self::new(SearchResponse {
                answer: String::new(),
                results: hits,
            })
        }

        pub fn failing() -> Self {
            Self {
                response: SearchResponse::default(),
                call_count: AtomicUsize::new(0),
                fail: true,
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SearchClient for MockSearchClient {
        async fn search(&self, _query: &str, max_results: usize) -> Result<SearchResponse, SearchError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SearchError::ApiError {
                    status: 503,
                    message: "mock outage".to_string(),
                });
            }
            let mut response = self.response.clone();
            response.results.truncate(max_results);
            Ok(response)
        }

        async fn health_check(&self) -> Result<(), SearchError> {
            if self.fail {
                return Err(SearchError::InvalidResponse("mock outage".to_string()));
            }
            Ok(())
        }
    }

    /// A plausible hit for tests
    pub fn hit(title: &str) -> SearchHit {
        SearchHit {
            title: title.to_string(),
            url: format!("https://example.com/{}", title.to_lowercase().replace(' ', "-")),
            content: format!("Background on {}", title),
            score: 0.9,
            published_date: None,
            author: None,
        }
    }
}

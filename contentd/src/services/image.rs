//! Image generation client contract and Ark-style backing
//!
//! Sizes below the backend's pixel floor are snapped to the closest preset
//! before the request goes out; the adjustment is logged. Downloading a
//! generated image to disk is a separate, best-effort helper: a failed
//! download never fails generation, the remote URL stays usable.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ImageConfig;
use crate::domain::ImageSize;

/// Errors that can occur during image operations
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A generation request
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: ImageSize,
    pub watermark: bool,
    pub seed: Option<i64>,
}

/// A generated image reference
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub image_url: String,
    pub model: String,
    pub prompt: String,
    /// Size actually used, after the pixel-floor adjustment
    pub size: ImageSize,
    pub seed: Option<i64>,
}

/// Image generation client
#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn generate(&self, request: ImageRequest) -> Result<GeneratedImage, ImageError>;

    async fn health_check(&self) -> Result<(), ImageError>;
}

/// Ark (Volcengine) image generation client
pub struct ArkImageClient {
    model: String,
    api_key: String,
    base_url: String,
    watermark: bool,
    http: Client,
}

impl ArkImageClient {
    /// Create a new client from configuration
    pub fn from_config(config: &ImageConfig) -> Result<Self, ImageError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ImageError::InvalidResponse(format!("Environment variable {} not set", config.api_key_env))
        })?;

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(ImageError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.clone(),
            watermark: config.watermark,
            http,
        })
    }
}

#[async_trait]
impl ImageClient for ArkImageClient {
    async fn generate(&self, request: ImageRequest) -> Result<GeneratedImage, ImageError> {
        let size = request.size.adjusted();
        if size != request.size {
            info!(requested = %request.size, used = %size, "image size below pixel floor, adjusted");
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": request.prompt,
            "size": size.to_string(),
            "watermark": request.watermark || self.watermark,
            "response_format": "url",
        });
        if let Some(seed) = request.seed {
            body["seed"] = serde_json::json!(seed);
        }

        debug!(prompt_len = request.prompt.len(), %size, "image generate");

        let response = self
            .http
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(ImageError::ApiError { status, message: text });
        }

        let api_response: ArkImageResponse = response.json().await?;
        let url = api_response
            .data
            .into_iter()
            .next()
            .and_then(|d| d.url)
            .ok_or_else(|| ImageError::InvalidResponse("response carried no image url".to_string()))?;

        Ok(GeneratedImage {
            image_url: url,
            model: api_response.model.unwrap_or_else(|| self.model.clone()),
            prompt: request.prompt,
            size,
            seed: request.seed,
        })
    }

    async fn health_check(&self) -> Result<(), ImageError> {
        // Reachability only: an unauthorized/404 probe still proves the host
        // answers, so anything but a transport error passes.
        self.http.get(self.base_url.clone()).send().await?;
        Ok(())
    }
}

/// Download a remote image into `dir`, returning the local path
///
/// Best-effort by contract: callers log the error and keep the remote URL.
pub async fn download_image(http: &Client, url: &str, dir: &Path) -> Result<PathBuf, ImageError> {
    let response = http.get(url).send().await?;
    if !response.status().is_success() {
        return Err(ImageError::Download(format!("HTTP {} fetching {}", response.status(), url)));
    }

    let extension = url
        .rsplit('.')
        .next()
        .filter(|ext| matches!(*ext, "png" | "jpg" | "jpeg" | "webp"))
        .unwrap_or("png");
    let path = dir.join(format!("{}.{}", Uuid::now_v7(), extension));

    let bytes = response.bytes().await?;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, &bytes).await?;

    debug!(url, path = %path.display(), bytes = bytes.len(), "image downloaded");
    Ok(path)
}

/// Download with the error swallowed into a log line
pub async fn try_download_image(http: &Client, url: &str, dir: &Path) -> Option<PathBuf> {
    match download_image(http, url, dir).await {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(url, error = %e, "image download failed, keeping remote url");
            None
        }
    }
}

// Ark API response types

#[derive(Debug, Deserialize)]
struct ArkImageResponse {
    model: Option<String>,
    #[serde(default)]
    data: Vec<ArkImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ArkImageDatum {
    url: Option<String>,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ark_response_parse() {
        let json = r#"{"model": "seedream", "data": [{"url": "https://img.example/a.png"}]}"#;
        let parsed: ArkImageResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data[0].url.as_deref(), Some("https://img.example/a.png"));
    }

    #[test]
    fn test_ark_response_empty_data() {
        let parsed: ArkImageResponse = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert!(parsed.data.is_empty());
    }

    #[tokio::test]
    async fn test_mock_generate_adjusts_size() {
        use mock::MockImageClient;

        let client = MockImageClient::new();
        let image = client
            .generate(ImageRequest {
                prompt: "a lighthouse at dusk".to_string(),
                size: "800x800".parse().unwrap(),
                watermark: false,
                seed: None,
            })
            .await
            .unwrap();

        assert_eq!(image.size, ImageSize::new(1920, 1920));
        assert_eq!(image.prompt, "a lighthouse at dusk");
    }

    #[tokio::test]
    async fn test_download_failure_is_an_error_not_a_panic() {
        let http = Client::new();
        let dir = tempfile::tempdir().unwrap();
        // Unroutable address fails fast
        let result = download_image(&http, "http://127.0.0.1:1/img.png", dir.path()).await;
        assert!(result.is_err());

        // And the tolerant variant swallows it
        assert!(try_download_image(&http, "http://127.0.0.1:1/img.png", dir.path()).await.is_none());
    }
}

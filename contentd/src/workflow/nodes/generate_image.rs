//! generate_image node - produce one image per prompt

use async_trait::async_trait;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::GENERATE_IMAGE;
use crate::domain::ImageSize;
use crate::services::{ImageClient, ImageRequest, try_download_image};
use crate::workflow::error::WorkflowError;
use crate::workflow::node::WorkflowNode;
use crate::workflow::state::{StatePatch, WorkflowImage, WorkflowState};

/// Per-prompt image generation with best-effort downloads
///
/// Images are generated concurrently inside the node. Failures are
/// per-image and tolerable; a run that loses every image still continues
/// to post-processing with an empty list. A disabled image service (no
/// client) behaves the same way - it never fabricates data.
pub struct GenerateImageNode {
    image: Option<Arc<dyn ImageClient>>,
    http: reqwest::Client,
    download_dir: PathBuf,
}

impl GenerateImageNode {
    pub fn new(image: Option<Arc<dyn ImageClient>>, download_dir: PathBuf) -> Self {
        Self {
            image,
            http: reqwest::Client::new(),
            download_dir,
        }
    }

    fn size_for(state: &WorkflowState) -> ImageSize {
        state
            .image_size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

#[async_trait]
impl WorkflowNode for GenerateImageNode {
    fn name(&self) -> &'static str {
        GENERATE_IMAGE
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(180)
    }

    async fn execute(&self, state: &WorkflowState) -> Result<StatePatch, WorkflowError> {
        let Some(client) = &self.image else {
            debug!(task_id = %state.task_id, "image service disabled, continuing without images");
            return Ok(StatePatch {
                images: Some(Vec::new()),
                ..Default::default()
            });
        };
        if state.image_prompts.is_empty() {
            return Ok(StatePatch {
                images: Some(Vec::new()),
                ..Default::default()
            });
        }

        let size = Self::size_for(state);
        let generations = state.image_prompts.iter().map(|prompt| {
            let client = client.clone();
            let prompt = prompt.clone();
            async move {
                client
                    .generate(ImageRequest {
                        prompt,
                        size,
                        watermark: false,
                        seed: None,
                    })
                    .await
            }
        });

        let mut images = Vec::new();
        for (i, outcome) in join_all(generations).await.into_iter().enumerate() {
            match outcome {
                Ok(generated) => {
                    let local_path = try_download_image(&self.http, &generated.image_url, &self.download_dir)
                        .await
                        .map(|p| p.display().to_string());
                    let format = generated
                        .image_url
                        .rsplit('.')
                        .next()
                        .filter(|ext| matches!(*ext, "png" | "jpg" | "jpeg" | "webp"))
                        .unwrap_or("png")
                        .to_string();
                    images.push(WorkflowImage {
                        url: generated.image_url,
                        local_path,
                        prompt: generated.prompt,
                        width: generated.size.width,
                        height: generated.size.height,
                        format,
                    });
                }
                Err(e) => {
                    warn!(task_id = %state.task_id, index = i, error = %e, "image generation failed, skipping");
                }
            }
        }

        debug!(task_id = %state.task_id, generated = images.len(), requested = state.image_prompts.len(), "images ready");

        Ok(StatePatch {
            images: Some(images),
            ..Default::default()
        })
    }
}

//! post_process node - splice images into the article

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

use super::POST_PROCESS;
use crate::workflow::error::WorkflowError;
use crate::workflow::node::WorkflowNode;
use crate::workflow::state::{StatePatch, WorkflowImage, WorkflowState};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[image-placeholder-(\d+)\]").expect("static regex"));

/// Pure transform: replace `[image-placeholder-N]` markers with markdown
/// image links (local path preferred, remote URL otherwise). Markers with
/// no surviving image are removed.
pub struct PostProcessNode;

impl PostProcessNode {
    fn image_link(image: &WorkflowImage) -> String {
        let target = image.local_path.as_deref().unwrap_or(&image.url);
        format!("![{}]({})", image.prompt, target)
    }

    fn splice(article: &str, images: &[WorkflowImage]) -> String {
        PLACEHOLDER
            .replace_all(article, |caps: &regex::Captures<'_>| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|idx| images.get(idx))
                    .map(Self::image_link)
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

#[async_trait]
impl WorkflowNode for PostProcessNode {
    fn name(&self) -> &'static str {
        POST_PROCESS
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(&self, state: &WorkflowState) -> Result<StatePatch, WorkflowError> {
        let article = state
            .article_content
            .as_deref()
            .ok_or_else(|| WorkflowError::node(POST_PROCESS, "no article to post-process"))?;

        Ok(StatePatch {
            final_article_content: Some(Self::splice(article, &state.images)),
            ..Default::default()
        })
    }
}

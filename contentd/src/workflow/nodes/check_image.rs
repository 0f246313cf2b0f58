//! check_image node - gate the generated images

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::CHECK_IMAGE;
use crate::quality::{ImageForReview, QualityGate};
use crate::workflow::error::WorkflowError;
use crate::workflow::node::WorkflowNode;
use crate::workflow::state::{StatePatch, WorkflowState};

/// Image quality gate; a failed verdict consumes one regeneration retry
pub struct CheckImageNode {
    gate: Arc<QualityGate>,
}

impl CheckImageNode {
    pub fn new(gate: Arc<QualityGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl WorkflowNode for CheckImageNode {
    fn name(&self) -> &'static str {
        CHECK_IMAGE
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(150)
    }

    async fn execute(&self, state: &WorkflowState) -> Result<StatePatch, WorkflowError> {
        let for_review: Vec<ImageForReview> = state
            .images
            .iter()
            .map(|image| ImageForReview {
                prompt: image.prompt.clone(),
                url: image.url.clone(),
            })
            .collect();

        let result = self.gate.check_image(&state.task_id, &for_review).await?;

        debug!(
            task_id = %state.task_id,
            passed = result.report.passed,
            images = state.images.len(),
            "image gate verdict"
        );

        Ok(StatePatch {
            image_retry_count: (!result.report.passed).then(|| state.image_retry_count + 1),
            image_quality_report: Some(result.report),
            tokens_used: result.usage.total_tokens,
            cost: result.cost,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::Evaluator;
    use crate::services::llm_mock::MockLlmClient;
    use crate::workflow::state::WorkflowImage;
    use taskstore::{MemoryStore, NewTask, Task};

    fn gate(llm: MockLlmClient) -> Arc<QualityGate> {
        Arc::new(QualityGate::new(
            Evaluator::new(Arc::new(llm), 7.0),
            Arc::new(MemoryStore::new()),
            "v1",
        ))
    }

    fn state_with_images(count: usize) -> WorkflowState {
        let mut state = WorkflowState::from_task(&Task::new(NewTask {
            topic: "AI".to_string(),
            requirements: "intro".to_string(),
            ..Default::default()
        }));
        state.images = (0..count)
            .map(|i| WorkflowImage {
                url: format!("https://img.example/{}.png", i),
                local_path: None,
                prompt: format!("prompt {}", i),
                width: 2560,
                height: 1440,
                format: "png".to_string(),
            })
            .collect();
        state
    }

    #[tokio::test]
    async fn test_empty_image_set_passes() {
        let node = CheckImageNode::new(gate(MockLlmClient::new(vec![])));
        let patch = node.execute(&state_with_images(0)).await.unwrap();
        assert!(patch.image_quality_report.unwrap().passed);
        assert_eq!(patch.image_retry_count, None);
    }

    #[tokio::test]
    async fn test_failed_verdict_increments_retry() {
        let failing = serde_json::json!({
            "relevance": 3.0, "coherence": 3.0, "completeness": 3.0, "readability": 3.0,
            "strengths": [], "weaknesses": ["off-prompt"], "suggestions": ["regenerate"], "reasoning": "poor"
        })
        .to_string();
        let node = CheckImageNode::new(gate(MockLlmClient::new(vec![failing])));
        let patch = node.execute(&state_with_images(1)).await.unwrap();

        assert!(!patch.image_quality_report.unwrap().passed);
        assert_eq!(patch.image_retry_count, Some(1));
    }
}

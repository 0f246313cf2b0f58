//! check_text node - gate the draft

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::CHECK_TEXT;
use crate::quality::QualityGate;
use crate::workflow::error::WorkflowError;
use crate::workflow::node::WorkflowNode;
use crate::workflow::state::{StatePatch, WorkflowState};

/// Text quality gate; a failed verdict consumes one rewrite retry
pub struct CheckTextNode {
    gate: Arc<QualityGate>,
}

impl CheckTextNode {
    pub fn new(gate: Arc<QualityGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl WorkflowNode for CheckTextNode {
    fn name(&self) -> &'static str {
        CHECK_TEXT
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(180)
    }

    async fn execute(&self, state: &WorkflowState) -> Result<StatePatch, WorkflowError> {
        let content = state
            .article_content
            .as_deref()
            .ok_or_else(|| WorkflowError::node(CHECK_TEXT, "no article to check"))?;

        let result = self
            .gate
            .check_text(&state.task_id, content, state.hard_constraints.as_ref(), &state.requirements)
            .await?;

        debug!(
            task_id = %state.task_id,
            passed = result.report.passed,
            score = result.report.score,
            "text gate verdict"
        );

        Ok(StatePatch {
            text_retry_count: (!result.report.passed).then(|| state.text_retry_count + 1),
            text_quality_report: Some(result.report),
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
    use taskstore::{HardConstraints, MemoryStore, NewTask, Task};

    fn gate(llm: MockLlmClient) -> Arc<QualityGate> {
        Arc::new(QualityGate::new(
            Evaluator::new(Arc::new(llm), 7.0),
            Arc::new(MemoryStore::new()),
            "v1",
        ))
    }

    fn state_with_article(article: &str, constraints: Option<HardConstraints>) -> WorkflowState {
        let mut state = WorkflowState::from_task(&Task::new(NewTask {
            topic: "AI".to_string(),
            requirements: "intro".to_string(),
            hard_constraints: constraints,
            ..Default::default()
        }));
        state.article_content = Some(article.to_string());
        state
    }

    #[tokio::test]
    async fn test_failed_check_increments_retry() {
        let node = CheckTextNode::new(gate(MockLlmClient::new(vec![])));
        let state = state_with_article(
            "too short",
            Some(HardConstraints {
                min_words: Some(500),
                ..Default::default()
            }),
        );

        let patch = node.execute(&state).await.unwrap();
        assert_eq!(patch.text_retry_count, Some(1));
        assert!(!patch.text_quality_report.unwrap().passed);
    }

    #[tokio::test]
    async fn test_passed_check_leaves_retry_counter() {
        let verdict = serde_json::json!({
            "relevance": 9.0, "coherence": 9.0, "completeness": 9.0, "readability": 9.0,
            "strengths": [], "weaknesses": [], "suggestions": [], "reasoning": "ok"
        })
        .to_string();
        let node = CheckTextNode::new(gate(MockLlmClient::new(vec![verdict])));
        let state = state_with_article("a fine article body of reasonable length", None);

        let patch = node.execute(&state).await.unwrap();
        assert_eq!(patch.text_retry_count, None);
        assert!(patch.text_quality_report.unwrap().passed);
    }

    #[tokio::test]
    async fn test_missing_article_errors() {
        let node = CheckTextNode::new(gate(MockLlmClient::new(vec![])));
        let state = WorkflowState::from_task(&Task::new(NewTask {
            topic: "AI".to_string(),
            requirements: "intro".to_string(),
            ..Default::default()
        }));
        assert!(node.execute(&state).await.is_err());
    }
}

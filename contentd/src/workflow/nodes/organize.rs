//! organize node - distill search material into an outline

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::ORGANIZE;
use crate::quality::strip_code_fences;
use crate::services::{ChatRequest, LlmClient};
use crate::workflow::error::WorkflowError;
use crate::workflow::node::WorkflowNode;
use crate::workflow::state::{OrganizedInfo, StatePatch, WorkflowState};

const ORGANIZE_SYSTEM_PROMPT: &str = "You are a research editor. Distill the material into a writing plan. \
    Respond with ONLY a JSON object: {\"outline\": \"...\", \"key_points\": [\"...\"], \"summary\": \"...\"}. \
    No prose outside the JSON.";

/// LLM distillation of search results into {outline, key_points, summary}
///
/// The model must produce parseable JSON; one transparent retry covers a
/// malformed response before the node fails the task.
pub struct OrganizeNode {
    llm: Arc<dyn LlmClient>,
}

impl OrganizeNode {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn build_prompt(state: &WorkflowState) -> String {
        let mut prompt = format!("Topic: {}\nRequirements: {}\n", state.topic, state.requirements);
        if state.search_results.is_empty() {
            prompt.push_str("\nNo search material is available; plan from general knowledge.\n");
        } else {
            prompt.push_str("\nSearch material:\n");
            for (i, hit) in state.search_results.iter().enumerate() {
                let body: String = hit.content.chars().take(800).collect();
                prompt.push_str(&format!("{}. {} ({})\n{}\n\n", i + 1, hit.title, hit.url, body));
            }
        }
        prompt
    }
}

#[async_trait]
impl WorkflowNode for OrganizeNode {
    fn name(&self) -> &'static str {
        ORGANIZE
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(150)
    }

    fn transparent_retries(&self) -> u32 {
        1
    }

    async fn execute(&self, state: &WorkflowState) -> Result<StatePatch, WorkflowError> {
        let request = ChatRequest::text(ORGANIZE_SYSTEM_PROMPT, Self::build_prompt(state))
            .with_labels(state.task_id.clone(), ORGANIZE);

        let response = self.llm.chat(request).await.map_err(|e| WorkflowError::node(ORGANIZE, e))?;

        let organized: OrganizedInfo = serde_json::from_str(strip_code_fences(&response.content))
            .map_err(|e| WorkflowError::node(ORGANIZE, format!("unparseable plan: {}", e)))?;

        debug!(task_id = %state.task_id, key_points = organized.key_points.len(), "plan organized");

        Ok(StatePatch {
            organized_info: Some(organized),
            tokens_used: response.usage.total_tokens,
            cost: response.cost,
            ..Default::default()
        })
    }
}

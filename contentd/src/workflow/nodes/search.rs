//! search node - gather background material for the topic

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::SEARCH;
use crate::services::SearchClient;
use crate::workflow::error::WorkflowError;
use crate::workflow::node::WorkflowNode;
use crate::workflow::state::{StatePatch, WorkflowState};

/// Web search for the article topic
///
/// Search is a soft dependency: a provider outage degrades to empty
/// results and the run continues on the model's own knowledge.
pub struct SearchNode {
    search: Arc<dyn SearchClient>,
    max_results: usize,
}

impl SearchNode {
    pub fn new(search: Arc<dyn SearchClient>, max_results: usize) -> Self {
        Self { search, max_results }
    }

    fn query(state: &WorkflowState) -> String {
        if state.keywords.is_empty() {
            state.topic.clone()
        } else {
            format!("{} {}", state.topic, state.keywords.join(" "))
        }
    }
}

#[async_trait]
impl WorkflowNode for SearchNode {
    fn name(&self) -> &'static str {
        SEARCH
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(&self, state: &WorkflowState) -> Result<StatePatch, WorkflowError> {
        let query = Self::query(state);
        let results = match self.search.search(&query, self.max_results).await {
            Ok(response) => {
                debug!(task_id = %state.task_id, hits = response.results.len(), "search complete");
                response.results
            }
            Err(e) => {
                warn!(task_id = %state.task_id, error = %e, "search degraded to empty results");
                Vec::new()
            }
        };

        Ok(StatePatch {
            search_results: Some(results),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::search_mock::{MockSearchClient, hit};
    use taskstore::{NewTask, Task};

    fn state() -> WorkflowState {
        WorkflowState::from_task(&Task::new(NewTask {
            topic: "AI".to_string(),
            requirements: "intro".to_string(),
            keywords: vec!["ml".to_string(), "llm".to_string()],
            ..Default::default()
        }))
    }

    #[test]
    fn test_query_includes_keywords() {
        assert_eq!(SearchNode::query(&state()), "AI ml llm");
    }

    #[tokio::test]
    async fn test_produces_results_patch() {
        let node = SearchNode::new(Arc::new(MockSearchClient::with_hits(vec![hit("A"), hit("B")])), 5);
        let patch = node.execute(&state()).await.unwrap();
        assert_eq!(patch.search_results.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_provider_outage_degrades_to_empty() {
        let node = SearchNode::new(Arc::new(MockSearchClient::failing()), 5);
        let patch = node.execute(&state()).await.unwrap();
        assert_eq!(patch.search_results.unwrap().len(), 0);
    }
}

//! write node - draft (or redraft) the article

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

use super::WRITE;
use crate::quality::strip_code_fences;
use crate::services::{ChatRequest, LlmClient};
use crate::workflow::error::WorkflowError;
use crate::workflow::node::WorkflowNode;
use crate::workflow::state::{StatePatch, WorkflowState};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[image-placeholder-(\d+)\]").expect("static regex"));

const PROMPTS_MARKER: &str = "IMAGE-PROMPTS:";

const WRITER_SYSTEM_PROMPT: &str = "You are a professional content writer. Write the article in markdown. \
    Where an illustration belongs, insert a marker line [image-placeholder-N] with N counting from 1; use at most 3. \
    After the article, output a line reading exactly IMAGE-PROMPTS: followed by a JSON array holding one \
    image-generation prompt per marker, in order. Output nothing after that array.";

/// LLM article writer with two entry modes
///
/// Initial mode drafts from the organized plan. Rewrite mode is entered
/// when a failed text report and a prior draft are present: the previous
/// draft and the gate's fix suggestions go into the prompt, and the old
/// draft is preserved as `previous_content`.
pub struct WriteNode {
    llm: Arc<dyn LlmClient>,
}

impl WriteNode {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn is_rewrite(state: &WorkflowState) -> bool {
        state.article_content.is_some()
            && state.text_quality_report.as_ref().is_some_and(|report| !report.passed)
    }

    fn constraint_lines(state: &WorkflowState) -> String {
        let mut lines = String::new();
        if let Some(constraints) = &state.hard_constraints {
            if let Some(min) = constraints.min_words {
                lines.push_str(&format!("- at least {} words (characters for Chinese)\n", min));
            }
            if let Some(max) = constraints.max_words {
                lines.push_str(&format!("- at most {} words (characters for Chinese)\n", max));
            }
            if !constraints.keywords.is_empty() {
                lines.push_str(&format!("- mention: {}\n", constraints.keywords.join(", ")));
            }
            if !constraints.forbidden_words.is_empty() {
                lines.push_str(&format!("- never use: {}\n", constraints.forbidden_words.join(", ")));
            }
        }
        lines
    }

    fn build_prompt(state: &WorkflowState) -> String {
        let mut prompt = format!("Topic: {}\nRequirements: {}\n", state.topic, state.requirements);
        if let Some(audience) = &state.target_audience {
            prompt.push_str(&format!("Audience: {}\n", audience));
        }
        if let Some(tone) = &state.tone {
            prompt.push_str(&format!("Tone: {}\n", tone));
        }

        let constraints = Self::constraint_lines(state);
        if !constraints.is_empty() {
            prompt.push_str("Constraints:\n");
            prompt.push_str(&constraints);
        }

        if let Some(organized) = &state.organized_info {
            prompt.push_str(&format!(
                "\nOutline:\n{}\n\nKey points:\n{}\n\nSummary: {}\n",
                organized.outline,
                organized.key_points.join("\n"),
                organized.summary
            ));
        }

        if Self::is_rewrite(state) {
            let report = state.text_quality_report.as_ref().expect("checked in is_rewrite");
            prompt.push_str(&format!(
                "\nYour previous draft failed the quality check. Rewrite it, keeping what worked.\n\
                 Fix these problems:\n{}\n\nPrevious draft:\n{}\n",
                report
                    .fix_suggestions
                    .iter()
                    .map(|s| format!("- {}", s))
                    .collect::<Vec<_>>()
                    .join("\n"),
                state.article_content.as_deref().unwrap_or_default()
            ));
        }

        prompt
    }

    /// Split the raw model output into the article and its image prompts
    fn parse_output(raw: &str, topic: &str) -> (String, Vec<String>) {
        let (article_part, prompts_part) = match raw.rfind(PROMPTS_MARKER) {
            Some(idx) => (&raw[..idx], Some(&raw[idx + PROMPTS_MARKER.len()..])),
            None => (raw, None),
        };
        let article = article_part.trim().to_string();

        let placeholder_count = PLACEHOLDER.find_iter(&article).count();

        let mut prompts: Vec<String> = prompts_part
            .and_then(|p| serde_json::from_str::<Vec<String>>(strip_code_fences(p)).ok())
            .unwrap_or_default();

        // One prompt per marker, whatever the model actually emitted
        if prompts.len() != placeholder_count {
            warn!(
                prompts = prompts.len(),
                placeholders = placeholder_count,
                "image prompt count mismatch, reconciling"
            );
        }
        prompts.truncate(placeholder_count);
        while prompts.len() < placeholder_count {
            prompts.push(format!("Editorial illustration {} for an article about {}", prompts.len() + 1, topic));
        }

        (article, prompts)
    }
}

#[async_trait]
impl WorkflowNode for WriteNode {
    fn name(&self) -> &'static str {
        WRITE
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(240)
    }

    async fn execute(&self, state: &WorkflowState) -> Result<StatePatch, WorkflowError> {
        let rewrite = Self::is_rewrite(state);
        let request = ChatRequest::text(WRITER_SYSTEM_PROMPT, Self::build_prompt(state))
            .with_labels(state.task_id.clone(), WRITE)
            .streamed();

        let response = self.llm.chat(request).await.map_err(|e| WorkflowError::node(WRITE, e))?;
        if response.content.trim().is_empty() {
            return Err(WorkflowError::node(WRITE, "model returned an empty draft"));
        }

        let (article, prompts) = Self::parse_output(&response.content, &state.topic);
        debug!(
            task_id = %state.task_id,
            rewrite,
            chars = article.len(),
            image_prompts = prompts.len(),
            "draft produced"
        );

        Ok(StatePatch {
            previous_content: rewrite.then(|| state.article_content.clone().expect("rewrite implies a draft")),
            article_content: Some(article),
            image_prompts: Some(prompts),
            tokens_used: response.usage.total_tokens,
            cost: response.cost,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::QualityReport;
    use crate::services::llm_mock::MockLlmClient;
    use taskstore::{NewTask, Task};

    fn state() -> WorkflowState {
        WorkflowState::from_task(&Task::new(NewTask {
            topic: "AI".to_string(),
            requirements: "500-word intro".to_string(),
            ..Default::default()
        }))
    }

    fn failed_report(suggestions: Vec<&str>) -> QualityReport {
        QualityReport {
            passed: false,
            hard_constraints_passed: false,
            score: 0.0,
            fix_suggestions: suggestions.into_iter().map(str::to_string).collect(),
            details: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_parse_output_with_prompts() {
        let raw = "# Title\n\nBody.\n\n[image-placeholder-1]\n\nMore.\n\n[image-placeholder-2]\n\nIMAGE-PROMPTS: [\"a robot\", \"a chart\"]";
        let (article, prompts) = WriteNode::parse_output(raw, "AI");
        assert!(article.contains("# Title"));
        assert!(!article.contains("IMAGE-PROMPTS"));
        assert_eq!(prompts, vec!["a robot".to_string(), "a chart".to_string()]);
    }

    #[test]
    fn test_parse_output_reconciles_missing_prompts() {
        let raw = "Body with [image-placeholder-1] only, no prompt list.";
        let (_, prompts) = WriteNode::parse_output(raw, "AI");
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("AI"));
    }

    #[test]
    fn test_parse_output_truncates_excess_prompts() {
        let raw = "No markers here.\nIMAGE-PROMPTS: [\"one\", \"two\"]";
        let (article, prompts) = WriteNode::parse_output(raw, "AI");
        assert!(prompts.is_empty());
        assert!(!article.contains("one"));
    }

    #[test]
    fn test_rewrite_detection() {
        let mut s = state();
        assert!(!WriteNode::is_rewrite(&s));

        s.article_content = Some("draft".to_string());
        assert!(!WriteNode::is_rewrite(&s));

        s.text_quality_report = Some(failed_report(vec!["longer"]));
        assert!(WriteNode::is_rewrite(&s));
    }

    #[test]
    fn test_rewrite_prompt_carries_suggestions_and_draft() {
        let mut s = state();
        s.article_content = Some("the old draft".to_string());
        s.text_quality_report = Some(failed_report(vec!["add 200+ chars"]));

        let prompt = WriteNode::build_prompt(&s);
        assert!(prompt.contains("add 200+ chars"));
        assert!(prompt.contains("the old draft"));
    }

    #[test]
    fn test_initial_prompt_carries_constraints() {
        let mut s = state();
        s.hard_constraints = Some(taskstore::HardConstraints {
            min_words: Some(500),
            keywords: vec!["AI".to_string()],
            ..Default::default()
        });
        let prompt = WriteNode::build_prompt(&s);
        assert!(prompt.contains("at least 500"));
        assert!(prompt.contains("mention: AI"));
        assert!(!prompt.contains("previous draft"));
    }

    #[tokio::test]
    async fn test_execute_initial_mode() {
        let node = WriteNode::new(Arc::new(MockLlmClient::new(vec![
            "# AI\n\nBody.\n\n[image-placeholder-1]\n\nIMAGE-PROMPTS: [\"a robot\"]".to_string(),
        ])));
        let patch = node.execute(&state()).await.unwrap();

        assert!(patch.previous_content.is_none());
        assert!(patch.article_content.unwrap().starts_with("# AI"));
        assert_eq!(patch.image_prompts.unwrap(), vec!["a robot".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_rewrite_preserves_previous() {
        let mut s = state();
        s.article_content = Some("old draft".to_string());
        s.text_quality_report = Some(failed_report(vec!["longer"]));

        let node = WriteNode::new(Arc::new(MockLlmClient::new(vec!["new longer draft".to_string()])));
        let patch = node.execute(&s).await.unwrap();

        assert_eq!(patch.previous_content.as_deref(), Some("old draft"));
        assert_eq!(patch.article_content.as_deref(), Some("new longer draft"));
    }

    #[tokio::test]
    async fn test_empty_draft_errors() {
        let node = WriteNode::new(Arc::new(MockLlmClient::new(vec!["   ".to_string()])));
        assert!(node.execute(&state()).await.is_err());
    }
}

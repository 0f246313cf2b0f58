//! LLM soft scorer
//!
//! Asks the model to grade the article on four dimensions and return JSON.
//! The response is parsed tolerantly: markdown fences are stripped, missing
//! fields fall back to defaults, every dimension is clamped to [0, 10]. An
//! LLM failure yields a failed evaluation, never an error.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::services::{ChatRequest, LlmClient, TokenUsage};

const EVALUATOR_SYSTEM_PROMPT: &str = "You are a strict content quality evaluator. \
    Grade the article against the stated requirements. \
    Respond with ONLY a JSON object shaped as: \
    {\"relevance\": 0-10, \"coherence\": 0-10, \"completeness\": 0-10, \"readability\": 0-10, \
    \"strengths\": [..], \"weaknesses\": [..], \"suggestions\": [..], \"reasoning\": \"...\"}. \
    No prose outside the JSON.";

/// Per-dimension scores in [0, 10]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dimensions {
    pub relevance: f64,
    pub coherence: f64,
    pub completeness: f64,
    pub readability: f64,
}

impl Dimensions {
    fn clamped(self) -> Self {
        let clamp = |v: f64| v.clamp(0.0, 10.0);
        Self {
            relevance: clamp(self.relevance),
            coherence: clamp(self.coherence),
            completeness: clamp(self.completeness),
            readability: clamp(self.readability),
        }
    }

    /// Weighted mean: relevance 30%, coherence 30%, completeness 20%,
    /// readability 20%
    pub fn weighted_score(&self) -> f64 {
        self.relevance * 0.3 + self.coherence * 0.3 + self.completeness * 0.2 + self.readability * 0.2
    }
}

/// A soft-scoring verdict
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Evaluation {
    pub passed: bool,
    /// Weighted overall score in [0, 10]
    pub score: f64,
    pub dimensions: Dimensions,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
    pub reasoning: String,
    pub model_name: Option<String>,
    pub usage: TokenUsage,
    pub cost: f64,
}

/// Raw JSON shape the model is asked to produce
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawEvaluation {
    relevance: f64,
    coherence: f64,
    completeness: f64,
    readability: f64,
    strengths: Vec<String>,
    weaknesses: Vec<String>,
    suggestions: Vec<String>,
    reasoning: String,
}

/// Strip a leading/trailing markdown code fence, if any
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the fence line
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest.trim())
}

/// LLM-backed soft scorer
pub struct Evaluator {
    llm: Arc<dyn LlmClient>,
    pass_threshold: f64,
}

impl Evaluator {
    pub fn new(llm: Arc<dyn LlmClient>, pass_threshold: f64) -> Self {
        Self { llm, pass_threshold }
    }

    pub fn pass_threshold(&self) -> f64 {
        self.pass_threshold
    }

    /// Grade content against requirements; never errors
    pub async fn evaluate(&self, content: &str, requirements: &str, task_id: &str) -> Evaluation {
        let user_prompt = format!(
            "Requirements:\n{}\n\nArticle to evaluate:\n{}",
            requirements, content
        );
        let request =
            ChatRequest::text(EVALUATOR_SYSTEM_PROMPT, user_prompt).with_labels(task_id, "evaluate");

        let response = match self.llm.chat(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(task_id, error = %e, "evaluator unavailable");
                return Evaluation {
                    passed: false,
                    score: 0.0,
                    weaknesses: vec!["evaluator unavailable".to_string()],
                    ..Default::default()
                };
            }
        };

        let raw: RawEvaluation = serde_json::from_str(strip_code_fences(&response.content)).unwrap_or_else(|e| {
            warn!(task_id, error = %e, "evaluator returned unparseable verdict, using defaults");
            RawEvaluation::default()
        });

        let dimensions = Dimensions {
            relevance: raw.relevance,
            coherence: raw.coherence,
            completeness: raw.completeness,
            readability: raw.readability,
        }
        .clamped();
        let score = dimensions.weighted_score();

        Evaluation {
            passed: score >= self.pass_threshold,
            score,
            dimensions,
            strengths: raw.strengths,
            weaknesses: raw.weaknesses,
            suggestions: raw.suggestions,
            reasoning: raw.reasoning,
            model_name: Some(response.model),
            usage: response.usage,
            cost: response.cost,
        }
    }
}

//! Quality gate
//!
//! Hard rules first: a deterministic failure short-circuits with a zero
//! score and the rule suggestions. Only a clean article reaches the LLM
//! scorer. Every verdict is persisted as a QualityCheck record.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use taskstore::{CheckKind, HardConstraints, NewQualityCheck, ResultStore, StoreError};

use super::evaluator::Evaluator;
use super::hard_rules;
use crate::services::TokenUsage;

/// The gate verdict carried in workflow state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityReport {
    pub passed: bool,
    pub hard_constraints_passed: bool,
    /// Overall score in [0, 10]
    pub score: f64,
    pub fix_suggestions: Vec<String>,
    pub details: serde_json::Value,
}

/// Gate verdict plus the tokens the soft scorer burned
#[derive(Debug, Clone, Default)]
pub struct GateResult {
    pub report: QualityReport,
    pub usage: TokenUsage,
    pub cost: f64,
}

/// An image reference offered to the gate for review
#[derive(Debug, Clone, Serialize)]
pub struct ImageForReview {
    pub prompt: String,
    pub url: String,
}

/// Two-tier evaluator: deterministic rules, then LLM scoring
pub struct QualityGate {
    evaluator: Evaluator,
    results: Arc<dyn ResultStore>,
    rubric_version: String,
}

impl QualityGate {
    pub fn new(evaluator: Evaluator, results: Arc<dyn ResultStore>, rubric_version: impl Into<String>) -> Self {
        Self {
            evaluator,
            results,
            rubric_version: rubric_version.into(),
        }
    }

    /// Gate the article text
    pub async fn check_text(
        &self,
        task_id: &str,
        content: &str,
        constraints: Option<&HardConstraints>,
        requirements: &str,
    ) -> Result<GateResult, StoreError> {
        let default_constraints = HardConstraints::default();
        let constraints = constraints.unwrap_or(&default_constraints);

        let hard = hard_rules::check(content, constraints);
        if !hard.passed {
            debug!(task_id, issues = hard.issues.len(), "hard rules failed");
            let report = QualityReport {
                passed: false,
                hard_constraints_passed: false,
                score: 0.0,
                fix_suggestions: hard.issues.iter().map(|i| i.suggestion.clone()).collect(),
                details: hard.details(),
            };
            self.persist(task_id, CheckKind::Text, &report, None).await?;
            return Ok(GateResult {
                report,
                usage: TokenUsage::default(),
                cost: 0.0,
            });
        }

        let evaluation = self.evaluator.evaluate(content, requirements, task_id).await;
        let report = QualityReport {
            passed: evaluation.passed,
            hard_constraints_passed: true,
            score: evaluation.score,
            fix_suggestions: evaluation.suggestions.clone(),
            details: serde_json::json!({
                "dimensions": evaluation.dimensions,
                "strengths": evaluation.strengths,
                "weaknesses": evaluation.weaknesses,
                "reasoning": evaluation.reasoning,
                "hard": hard.details(),
            }),
        };
        self.persist(task_id, CheckKind::Text, &report, evaluation.model_name.as_deref()).await?;
        Ok(GateResult {
            report,
            usage: evaluation.usage,
            cost: evaluation.cost,
        })
    }

    /// Gate the generated images against their prompts
    ///
    /// An empty image set passes trivially: the workflow is allowed to ship
    /// an article without images.
    pub async fn check_image(&self, task_id: &str, images: &[ImageForReview]) -> Result<GateResult, StoreError> {
        if images.is_empty() {
            let report = QualityReport {
                passed: true,
                hard_constraints_passed: true,
                score: 10.0,
                fix_suggestions: vec![],
                details: serde_json::json!({ "note": "no images to review" }),
            };
            self.persist(task_id, CheckKind::Image, &report, None).await?;
            return Ok(GateResult {
                report,
                usage: TokenUsage::default(),
                cost: 0.0,
            });
        }

        // Hard tier: every image must carry a usable URL
        let broken: Vec<usize> = images
            .iter()
            .enumerate()
            .filter(|(_, img)| img.url.trim().is_empty())
            .map(|(i, _)| i)
            .collect();
        if !broken.is_empty() {
            let report = QualityReport {
                passed: false,
                hard_constraints_passed: false,
                score: 0.0,
                fix_suggestions: vec!["Regenerate the images that came back without a URL".to_string()],
                details: serde_json::json!({ "broken_indices": broken }),
            };
            self.persist(task_id, CheckKind::Image, &report, None).await?;
            return Ok(GateResult {
                report,
                usage: TokenUsage::default(),
                cost: 0.0,
            });
        }

        let manifest = serde_json::to_string_pretty(images).unwrap_or_default();
        let requirements = "Each generated image must plausibly match its prompt and suit an article illustration.";
        let evaluation = self.evaluator.evaluate(&manifest, requirements, task_id).await;

        let report = QualityReport {
            passed: evaluation.passed,
            hard_constraints_passed: true,
            score: evaluation.score,
            fix_suggestions: evaluation.suggestions.clone(),
            details: serde_json::json!({
                "dimensions": evaluation.dimensions,
                "weaknesses": evaluation.weaknesses,
                "reasoning": evaluation.reasoning,
                "image_count": images.len(),
            }),
        };
        self.persist(task_id, CheckKind::Image, &report, evaluation.model_name.as_deref()).await?;
        Ok(GateResult {
            report,
            usage: evaluation.usage,
            cost: evaluation.cost,
        })
    }

    async fn persist(
        &self,
        task_id: &str,
        kind: CheckKind,
        report: &QualityReport,
        model_name: Option<&str>,
    ) -> Result<(), StoreError> {
        self.results
            .create_quality_check(NewQualityCheck {
                task_id: task_id.to_string(),
                check_type: kind,
                score: report.score,
                passed: report.passed,
                hard_constraints_passed: report.hard_constraints_passed,
                details: report.details.clone(),
                fix_suggestions: report.fix_suggestions.clone(),
                rubric_version: self.rubric_version.clone(),
                model_name: model_name.map(str::to_string),
            })
            .await?;
        Ok(())
    }
}

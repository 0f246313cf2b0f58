//! Workflow state: the additive record flowing through the engine
//!
//! Each node returns a patch; the engine merges it and never hands two
//! nodes the state concurrently. Everything except `start_time` serializes
//! into the snapshot written after every node boundary.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use taskstore::{HardConstraints, Task, TaskMode};

use crate::quality::QualityReport;
use crate::services::SearchHit;

/// Output of the organize step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizedInfo {
    pub outline: String,
    pub key_points: Vec<String>,
    pub summary: String,
}

/// A generated image reference carried in state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowImage {
    pub url: String,
    pub local_path: Option<String>,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

/// In-memory value mutated across nodes and snapshotted between them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowState {
    // Identity carry-overs
    pub task_id: String,
    pub workflow_type: String,
    pub mode: TaskMode,

    // Inputs
    pub topic: String,
    pub requirements: String,
    pub target_audience: Option<String>,
    pub keywords: Vec<String>,
    pub tone: Option<String>,
    pub hard_constraints: Option<HardConstraints>,
    pub image_size: Option<String>,

    // Intermediate products
    pub search_results: Vec<SearchHit>,
    pub organized_info: Option<OrganizedInfo>,
    pub article_content: Option<String>,
    pub image_prompts: Vec<String>,
    pub images: Vec<WorkflowImage>,
    pub final_article_content: Option<String>,

    // Verdicts
    pub text_quality_report: Option<QualityReport>,
    pub image_quality_report: Option<QualityReport>,

    // Control
    pub current_step: Option<String>,
    pub steps_completed: Vec<String>,
    pub text_retry_count: u32,
    pub image_retry_count: u32,
    /// Draft preserved across rewrite loops
    pub previous_content: Option<String>,
    /// Mirrors the task row version at state construction
    pub version: i64,
    /// Non-empty signals abort
    pub error: Option<String>,

    // Accounting
    pub tokens_used: u64,
    pub cost: f64,

    /// Transient; never snapshotted
    #[serde(skip)]
    pub start_time: Option<Instant>,
}

impl WorkflowState {
    /// Initial state for a task, before any checkpoint restore
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            workflow_type: "article".to_string(),
            mode: task.mode,
            topic: task.topic.clone(),
            requirements: task.requirements.clone(),
            target_audience: task.target_audience.clone(),
            keywords: task.keywords.clone(),
            tone: task.tone.clone(),
            hard_constraints: task.hard_constraints.clone(),
            image_size: task.image_size.clone(),
            text_retry_count: task.text_retry_count,
            image_retry_count: task.image_retry_count,
            version: task.version,
            ..Default::default()
        }
    }

    /// Merge a node's patch
    pub fn apply(&mut self, patch: StatePatch) {
        if let Some(v) = patch.search_results {
            self.search_results = v;
        }
        if let Some(v) = patch.organized_info {
            self.organized_info = Some(v);
        }
        if let Some(v) = patch.article_content {
            self.article_content = Some(v);
        }
        if let Some(v) = patch.image_prompts {
            self.image_prompts = v;
        }
        if let Some(v) = patch.images {
            self.images = v;
        }
        if let Some(v) = patch.final_article_content {
            self.final_article_content = Some(v);
        }
        if let Some(v) = patch.text_quality_report {
            self.text_quality_report = Some(v);
        }
        if let Some(v) = patch.image_quality_report {
            self.image_quality_report = Some(v);
        }
        if let Some(v) = patch.previous_content {
            self.previous_content = Some(v);
        }
        if let Some(v) = patch.text_retry_count {
            self.text_retry_count = v;
        }
        if let Some(v) = patch.image_retry_count {
            self.image_retry_count = v;
        }
        self.tokens_used += patch.tokens_used;
        self.cost += patch.cost;
    }

    /// Serialized snapshot of the persistable subset
    pub fn snapshot(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Elapsed time since the run started, in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_millis() as u64).unwrap_or(0)
    }
}

/// Additive output of one node; `None` fields leave state untouched
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub search_results: Option<Vec<SearchHit>>,
    pub organized_info: Option<OrganizedInfo>,
    pub article_content: Option<String>,
    pub image_prompts: Option<Vec<String>>,
    pub images: Option<Vec<WorkflowImage>>,
    pub final_article_content: Option<String>,
    pub text_quality_report: Option<QualityReport>,
    pub image_quality_report: Option<QualityReport>,
    pub previous_content: Option<String>,
    pub text_retry_count: Option<u32>,
    pub image_retry_count: Option<u32>,
    /// Tokens this node consumed
    pub tokens_used: u64,
    /// USD this node cost
    pub cost: f64,
}

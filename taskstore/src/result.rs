//! Append-only per-task outputs: results and quality-check reports

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::now_ms;
use crate::task::CheckKind;

/// Kind of output a result row carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultType {
    #[serde(rename = "article")]
    Article,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "finalArticle")]
    FinalArticle,
    #[serde(rename = "text")]
    Text,
}

impl std::fmt::Display for ResultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Article => write!(f, "article"),
            Self::Image => write!(f, "image"),
            Self::FinalArticle => write!(f, "finalArticle"),
            Self::Text => write!(f, "text"),
        }
    }
}

impl std::str::FromStr for ResultType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "article" => Ok(Self::Article),
            "image" => Ok(Self::Image),
            "finalArticle" => Ok(Self::FinalArticle),
            "text" => Ok(Self::Text),
            _ => Err(format!("Unknown result type: {}", s)),
        }
    }
}

/// Input for appending a result row
#[derive(Debug, Clone)]
pub struct NewTaskResult {
    pub task_id: String,
    pub result_type: ResultType,
    pub content: Option<String>,
    /// Local path, e.g. for downloaded images
    pub file_path: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// An appended result row; never mutated after write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub task_id: String,
    pub result_type: ResultType,
    pub content: Option<String>,
    pub file_path: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
}

impl TaskResult {
    pub fn new(input: NewTaskResult) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            task_id: input.task_id,
            result_type: input.result_type,
            content: input.content,
            file_path: input.file_path,
            metadata: input.metadata,
            created_at: now_ms(),
        }
    }
}

/// Input for appending a quality-check record
#[derive(Debug, Clone)]
pub struct NewQualityCheck {
    pub task_id: String,
    pub check_type: CheckKind,
    /// Overall score in [0, 10]
    pub score: f64,
    pub passed: bool,
    pub hard_constraints_passed: bool,
    pub details: serde_json::Value,
    pub fix_suggestions: Vec<String>,
    pub rubric_version: String,
    pub model_name: Option<String>,
}

/// A persisted quality-check record; never mutated after write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheck {
    pub id: String,
    pub task_id: String,
    pub check_type: CheckKind,
    pub score: f64,
    pub passed: bool,
    pub hard_constraints_passed: bool,
    pub details: serde_json::Value,
    pub fix_suggestions: Vec<String>,
    pub rubric_version: String,
    pub model_name: Option<String>,
    pub created_at: i64,
}

impl QualityCheck {
    pub fn new(input: NewQualityCheck) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            task_id: input.task_id,
            check_type: input.check_type,
            score: input.score,
            passed: input.passed,
            hard_constraints_passed: input.hard_constraints_passed,
            details: input.details,
            fix_suggestions: input.fix_suggestions,
            rubric_version: input.rubric_version,
            model_name: input.model_name,
            created_at: now_ms(),
        }
    }
}

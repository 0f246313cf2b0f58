//! Task record and its lifecycle types
//!
//! The Task is the unit of work: a content-creation request plus the
//! lifecycle fields the store owns (status, worker, retry counters,
//! snapshot, version).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::now_ms;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not yet claimed by a worker
    #[default]
    Pending,
    /// Claimed and being processed
    Running,
    /// Parked (released by a worker, awaiting reclaim)
    Waiting,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled by the caller
    Cancelled,
}

impl TaskStatus {
    /// Check if this status is terminal (no further transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the transition `self -> to` is legal
    ///
    /// Terminals are sinks. Pending tasks can only start or be cancelled;
    /// running tasks can park, finish, fail, or be cancelled; waiting tasks
    /// can resume or reach any terminal.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, to) {
            (Pending, Running) | (Pending, Cancelled) => true,
            (Running, Waiting) | (Running, Completed) | (Running, Failed) | (Running, Cancelled) => true,
            (Waiting, Running) | (Waiting, Completed) | (Waiting, Failed) | (Waiting, Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Waiting => write!(f, "waiting"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "waiting" => Ok(Self::Waiting),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// Execution mode for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    /// Run inline, return when the workflow finishes
    Sync,
    /// Enqueue and return immediately
    #[default]
    Async,
}

impl std::fmt::Display for TaskMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
        }
    }
}

impl std::str::FromStr for TaskMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            _ => Err(format!("Unknown mode: {}. Use: sync or async", s)),
        }
    }
}

/// Priority level for queue ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// Numeric queue priority, lower dequeues first
    pub fn queue_value(&self) -> u8 {
        match self {
            Self::Urgent => 1,
            Self::High => 3,
            Self::Low => 5,
            Self::Normal => 7,
        }
    }

    /// Rank for pending-scan ordering, urgent first
    pub fn rank(&self) -> u8 {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// Which retry counter / quality check a record refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Text,
    Image,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
        }
    }
}

impl std::str::FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            _ => Err(format!("Unknown check kind: {}", s)),
        }
    }
}

/// Deterministic constraints the generated article must satisfy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct HardConstraints {
    pub min_words: Option<usize>,
    pub max_words: Option<usize>,
    /// Keywords the article must mention (case-insensitive substring)
    pub keywords: Vec<String>,
    /// When true, every keyword is required; otherwise any one suffices
    pub require_all_keywords: bool,
    pub require_title: bool,
    pub require_intro: bool,
    pub require_conclusion: bool,
    pub min_sections: Option<usize>,
    pub has_bullet_points: bool,
    pub has_numbered_list: bool,
    pub forbidden_words: Vec<String>,
}

impl HardConstraints {
    /// Check if no constraint is actually set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Input for creating a task row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub idempotency_key: Option<String>,
    pub mode: TaskMode,
    pub topic: String,
    pub requirements: String,
    pub target_audience: Option<String>,
    pub keywords: Vec<String>,
    pub tone: Option<String>,
    pub hard_constraints: Option<HardConstraints>,
    pub priority: Priority,
    pub image_size: Option<String>,
}

/// A task row: request fields plus store-owned lifecycle fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier (UUID v7)
    pub id: String,

    /// Caller-supplied dedup key, unique among non-deleted tasks
    pub idempotency_key: Option<String>,

    pub mode: TaskMode,
    pub topic: String,
    pub requirements: String,
    pub target_audience: Option<String>,
    pub keywords: Vec<String>,
    pub tone: Option<String>,
    pub hard_constraints: Option<HardConstraints>,
    pub priority: Priority,

    /// Requested image size as "WIDTHxHEIGHT" (adjusted at generation time)
    pub image_size: Option<String>,

    pub status: TaskStatus,
    pub current_step: Option<String>,

    /// Owning worker; non-null iff status is running
    pub worker_id: Option<String>,

    pub text_retry_count: u32,
    pub image_retry_count: u32,

    /// Opaque serialized workflow state for crash-resume
    pub state_snapshot: Option<String>,

    pub error_message: Option<String>,

    /// Optimistic-lock version; every mutation bumps it by one
    pub version: i64,

    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

impl Task {
    /// Build a fresh pending task from a creation input
    pub fn new(input: NewTask) -> Self {
        let now = now_ms();
        Self {
            id: Uuid::now_v7().to_string(),
            idempotency_key: input.idempotency_key,
            mode: input.mode,
            topic: input.topic,
            requirements: input.requirements,
            target_audience: input.target_audience,
            keywords: input.keywords,
            tone: input.tone,
            hard_constraints: input.hard_constraints,
            priority: input.priority,
            image_size: input.image_size,
            status: TaskStatus::Pending,
            current_step: None,
            worker_id: None,
            text_retry_count: 0,
            image_retry_count: 0,
            state_snapshot: None,
            error_message: None,
            version: 1,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            deleted_at: None,
        }
    }

    /// Check if the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Retry counter for the given kind
    pub fn retry_count(&self, kind: CheckKind) -> u32 {
        match kind {
            CheckKind::Text => self.text_retry_count,
            CheckKind::Image => self.image_retry_count,
        }
    }
}

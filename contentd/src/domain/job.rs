//! Queue job envelope

use serde::{Deserialize, Serialize};
use taskstore::{HardConstraints, Task, TaskMode};

/// Payload delivered through the job queue
///
/// Carries enough of the request to rebuild the initial workflow state
/// without refetching; the worker still fetches the task row for the
/// authoritative lifecycle fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub task_id: String,
    pub mode: TaskMode,
    pub topic: String,
    pub requirements: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard_constraints: Option<HardConstraints>,
}

impl JobPayload {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            mode: task.mode,
            topic: task.topic.clone(),
            requirements: task.requirements.clone(),
            image_size: task.image_size.clone(),
            hard_constraints: task.hard_constraints.clone(),
        }
    }
}

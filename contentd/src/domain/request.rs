//! Task creation request

use serde::{Deserialize, Serialize};
use taskstore::{HardConstraints, NewTask, Priority, TaskMode};

/// A content-creation request as submitted by a caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateTaskRequest {
    pub topic: String,
    pub requirements: String,
    pub target_audience: Option<String>,
    pub keywords: Vec<String>,
    pub tone: Option<String>,
    pub mode: TaskMode,
    pub priority: Priority,
    pub hard_constraints: Option<HardConstraints>,
    /// "WIDTHxHEIGHT"; validated at scheduling, adjusted at generation
    pub image_size: Option<String>,
    pub idempotency_key: Option<String>,
    /// Unix millis; a future value delays the enqueue
    pub schedule_at: Option<i64>,
}

impl CreateTaskRequest {
    pub fn into_new_task(self) -> NewTask {
        NewTask {
            idempotency_key: self.idempotency_key,
            mode: self.mode,
            topic: self.topic,
            requirements: self.requirements,
            target_audience: self.target_audience,
            keywords: self.keywords,
            tone: self.tone,
            hard_constraints: self.hard_constraints,
            priority: self.priority,
            image_size: self.image_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_new_task_preserves_fields() {
        let request = CreateTaskRequest {
            topic: "AI".to_string(),
            requirements: "500-word intro".to_string(),
            keywords: vec!["ml".to_string()],
            priority: Priority::Urgent,
            idempotency_key: Some("k1".to_string()),
            ..Default::default()
        };

        let input = request.into_new_task();
        assert_eq!(input.topic, "AI");
        assert_eq!(input.priority, Priority::Urgent);
        assert_eq!(input.idempotency_key.as_deref(), Some("k1"));
    }
}

//! Scheduler: validate, persist, enqueue
//!
//! The async front door. Requests are validated before anything touches the
//! store; an idempotency key maps repeat submissions to the existing task
//! without a second enqueue; future `schedule_at` values turn into delayed
//! queue entries.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use taskstore::{StoreError, TaskMode, TaskStatus, TaskStore, now_ms};

use crate::domain::{CreateTaskRequest, ImageSize, JobPayload};
use crate::queue::JobQueue;

/// Highest numeric priority, reserved for sync-mode jobs
const SYNC_PRIORITY: u8 = 1;

/// Errors a scheduling call can raise
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A batch stopped part-way: earlier tasks stay scheduled
#[derive(Debug, Error)]
#[error("batch scheduling stopped after {} tasks: {error}", scheduled.len())]
pub struct BatchScheduleError {
    pub scheduled: Vec<String>,
    #[source]
    pub error: ScheduleError,
}

/// Validates requests, writes task rows, enqueues jobs
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    queue: Arc<JobQueue>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskStore>, queue: Arc<JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Request sanity checks; nothing is persisted on failure
    pub fn validate_request(request: &CreateTaskRequest) -> Result<(), ScheduleError> {
        if request.topic.trim().is_empty() {
            return Err(ScheduleError::Validation("topic must not be empty".to_string()));
        }
        if request.requirements.trim().is_empty() {
            return Err(ScheduleError::Validation("requirements must not be empty".to_string()));
        }
        if let Some(constraints) = &request.hard_constraints
            && let (Some(min), Some(max)) = (constraints.min_words, constraints.max_words)
            && min > max
        {
            return Err(ScheduleError::Validation(format!(
                "min_words ({}) must not exceed max_words ({})",
                min, max
            )));
        }
        if let Some(size) = &request.image_size {
            size.parse::<ImageSize>().map_err(ScheduleError::Validation)?;
        }
        Ok(())
    }

    /// Create a task and enqueue its job; returns the task id
    pub async fn schedule_task(&self, request: CreateTaskRequest) -> Result<String, ScheduleError> {
        Self::validate_request(&request)?;

        // Repeat submission with the same key maps to the existing task
        if let Some(key) = &request.idempotency_key
            && let Some(existing) = self.store.find_by_idempotency_key(key).await?
        {
            debug!(task_id = %existing.id, key, "idempotent resubmission, reusing task");
            return Ok(existing.id);
        }

        let priority = if request.mode == TaskMode::Sync {
            SYNC_PRIORITY
        } else {
            request.priority.queue_value()
        };
        let schedule_at = request.schedule_at;

        let task = match self.store.create(request.into_new_task()).await {
            Ok(task) => task,
            // Lost a concurrent-create race on the key; the winner's task is it
            Err(StoreError::DuplicateIdempotencyKey(key)) => {
                warn!(key, "idempotency race lost, reusing winner");
                return self
                    .store
                    .find_by_idempotency_key(&key)
                    .await?
                    .map(|t| t.id)
                    .ok_or(StoreError::DuplicateIdempotencyKey(key))
                    .map_err(Into::into);
            }
            Err(e) => return Err(e.into()),
        };

        let payload = JobPayload::from_task(&task);
        let delay = schedule_at
            .map(|at| at - now_ms())
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64));

        match delay {
            Some(delay) => {
                info!(task_id = %task.id, ?delay, "task scheduled (delayed)");
                self.queue.add_delayed_task(payload, priority, delay);
            }
            None => {
                info!(task_id = %task.id, priority, "task scheduled");
                self.queue.add_task(payload, priority, None);
            }
        }

        Ok(task.id)
    }

    /// Schedule serially; a failure stops the batch but earlier tasks stay
    pub async fn schedule_batch_tasks(
        &self,
        requests: Vec<CreateTaskRequest>,
    ) -> Result<Vec<String>, BatchScheduleError> {
        let mut scheduled = Vec::with_capacity(requests.len());
        for request in requests {
            match self.schedule_task(request).await {
                Ok(id) => scheduled.push(id),
                Err(error) => return Err(BatchScheduleError { scheduled, error }),
            }
        }
        Ok(scheduled)
    }

    /// Cancel a pending task; its queued job is rejected at claim time
    ///
    /// Returns false when the task is missing or no longer pending.
    pub async fn cancel_task(&self, task_id: &str) -> Result<bool, ScheduleError> {
        // A few refetch rounds absorb version races with concurrent writers
        for _ in 0..3 {
            let Some(task) = self.store.find_by_id(task_id).await? else {
                return Ok(false);
            };
            if task.status != TaskStatus::Pending {
                debug!(task_id, status = %task.status, "cancel refused, not pending");
                return Ok(false);
            }
            if self.store.update_status(task_id, TaskStatus::Cancelled, task.version).await? {
                info!(task_id, "task cancelled");
                return Ok(true);
            }
        }
        Ok(false)
    }
}

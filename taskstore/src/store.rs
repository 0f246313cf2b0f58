//! Store trait contracts
//!
//! Every mutating task operation takes the caller's `expected_version` and
//! returns `Ok(false)` when the stored version differs or the status
//! transition is illegal. `Ok(true)` means the write landed and the version
//! was bumped by one.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::result::{NewQualityCheck, NewTaskResult, QualityCheck, TaskResult};
use crate::task::{CheckKind, NewTask, Priority, Task, TaskMode, TaskStatus};

/// Filter for task listing and counting
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub mode: Option<TaskMode>,
    pub priority: Option<Priority>,
    /// Include soft-deleted rows (default false)
    pub include_deleted: bool,
}

/// Offset/limit pagination for task listing
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}

/// Task lifecycle store with the optimistic-lock protocol
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task row
    ///
    /// Fails with [`StoreError::DuplicateIdempotencyKey`] when the input's
    /// idempotency key collides with a non-deleted task.
    async fn create(&self, input: NewTask) -> Result<Task, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, StoreError>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Task>, StoreError>;

    async fn find_many(&self, filter: &TaskFilter, page: &Pagination) -> Result<Vec<Task>, StoreError>;

    async fn count(&self, filter: &TaskFilter) -> Result<u64, StoreError>;

    /// Pending tasks ordered by priority (urgent first) then created_at
    async fn get_pending_tasks(&self, limit: usize) -> Result<Vec<Task>, StoreError>;

    /// Atomically claim a claimable task for a worker
    ///
    /// Requires the stored status to be `pending` (or `waiting`, the parked
    /// state a release leaves behind) and the version to match. On success
    /// sets status `running`, records the worker id, stamps `started_at`.
    async fn claim_task(&self, id: &str, worker_id: &str, expected_version: i64) -> Result<bool, StoreError>;

    /// Transition status per the lifecycle matrix
    ///
    /// Leaving `running` clears `worker_id`; entering a terminal stamps
    /// `completed_at`.
    async fn update_status(&self, id: &str, status: TaskStatus, expected_version: i64) -> Result<bool, StoreError>;

    async fn update_current_step(&self, id: &str, step: &str, expected_version: i64) -> Result<bool, StoreError>;

    async fn increment_retry_count(&self, id: &str, kind: CheckKind, expected_version: i64)
    -> Result<bool, StoreError>;

    async fn save_state_snapshot(&self, id: &str, snapshot: &str, expected_version: i64) -> Result<bool, StoreError>;

    async fn mark_as_completed(&self, id: &str, expected_version: i64) -> Result<bool, StoreError>;

    async fn mark_as_failed(&self, id: &str, error: &str, expected_version: i64) -> Result<bool, StoreError>;

    /// Release a running task back to `waiting`, clearing the worker id
    ///
    /// Requires the stored `worker_id` to match the releasing worker.
    async fn release_worker(&self, id: &str, worker_id: &str, expected_version: i64) -> Result<bool, StoreError>;

    /// Mark the row deleted without removing it; returns false when missing
    async fn soft_delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Remove the row permanently; returns false when missing
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// Append-only result and quality-check records
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn create_result(&self, input: NewTaskResult) -> Result<TaskResult, StoreError>;

    async fn find_results_by_task_id(&self, task_id: &str) -> Result<Vec<TaskResult>, StoreError>;

    async fn delete_results_by_task_id(&self, task_id: &str) -> Result<u64, StoreError>;

    async fn create_quality_check(&self, input: NewQualityCheck) -> Result<QualityCheck, StoreError>;

    async fn find_quality_checks_by_task_id(&self, task_id: &str) -> Result<Vec<QualityCheck>, StoreError>;
}

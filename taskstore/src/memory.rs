//! In-memory store backend
//!
//! A mutex-guarded map with the exact contract of the SQLite backend. Used
//! for tests and embedded single-process deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::now_ms;
use crate::result::{NewQualityCheck, NewTaskResult, QualityCheck, TaskResult};
use crate::store::{Pagination, ResultStore, TaskFilter, TaskStore};
use crate::task::{CheckKind, NewTask, Task, TaskStatus};

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Task>,
    results: Vec<TaskResult>,
    checks: Vec<QualityCheck>,
}

/// Mutex-guarded in-memory task store
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a guarded mutation: version must match and `f` must accept.
    ///
    /// `f` returns false to reject (illegal transition); on acceptance the
    /// version is bumped and `updated_at` stamped.
    fn mutate<F>(&self, id: &str, expected_version: i64, f: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Task) -> bool,
    {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let task = inner
            .tasks
            .get_mut(id)
            .filter(|t| t.deleted_at.is_none())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if task.version != expected_version {
            debug!(task_id = %id, stored = task.version, expected = expected_version, "version mismatch");
            return Ok(false);
        }

        // Terminals are sinks: nothing mutates a finished task
        if task.is_terminal() {
            return Ok(false);
        }

        if !f(task) {
            return Ok(false);
        }

        task.version += 1;
        task.updated_at = now_ms();
        Ok(true)
    }

    fn matches(task: &Task, filter: &TaskFilter) -> bool {
        if !filter.include_deleted && task.deleted_at.is_some() {
            return false;
        }
        if let Some(status) = filter.status
            && task.status != status
        {
            return false;
        }
        if let Some(mode) = filter.mode
            && task.mode != mode
        {
            return false;
        }
        if let Some(priority) = filter.priority
            && task.priority != priority
        {
            return false;
        }
        true
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create(&self, input: NewTask) -> Result<Task, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");

        if let Some(key) = &input.idempotency_key {
            let collision = inner
                .tasks
                .values()
                .any(|t| t.deleted_at.is_none() && t.idempotency_key.as_deref() == Some(key.as_str()));
            if collision {
                return Err(StoreError::DuplicateIdempotencyKey(key.clone()));
            }
        }

        let task = Task::new(input);
        inner.tasks.insert(task.id.clone(), task.clone());
        debug!(task_id = %task.id, "task created");
        Ok(task)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.tasks.get(id).filter(|t| t.deleted_at.is_none()).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Task>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .tasks
            .values()
            .find(|t| t.deleted_at.is_none() && t.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn find_many(&self, filter: &TaskFilter, page: &Pagination) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut tasks: Vec<Task> = inner.tasks.values().filter(|t| Self::matches(t, filter)).cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks.into_iter().skip(page.offset).take(page.limit).collect())
    }

    async fn count(&self, filter: &TaskFilter) -> Result<u64, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.tasks.values().filter(|t| Self::matches(t, filter)).count() as u64)
    }

    async fn get_pending_tasks(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut pending: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.deleted_at.is_none() && t.status == TaskStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|t| (t.priority.rank(), t.created_at));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn claim_task(&self, id: &str, worker_id: &str, expected_version: i64) -> Result<bool, StoreError> {
        let worker_id = worker_id.to_string();
        self.mutate(id, expected_version, |task| {
            if !matches!(task.status, TaskStatus::Pending | TaskStatus::Waiting) {
                return false;
            }
            task.status = TaskStatus::Running;
            task.worker_id = Some(worker_id);
            task.started_at.get_or_insert(now_ms());
            true
        })
    }

    async fn update_status(&self, id: &str, status: TaskStatus, expected_version: i64) -> Result<bool, StoreError> {
        self.mutate(id, expected_version, |task| {
            if !task.status.can_transition_to(status) {
                return false;
            }
            task.status = status;
            if status != TaskStatus::Running {
                task.worker_id = None;
            }
            if status.is_terminal() {
                task.completed_at = Some(now_ms());
            }
            true
        })
    }

    async fn update_current_step(&self, id: &str, step: &str, expected_version: i64) -> Result<bool, StoreError> {
        let step = step.to_string();
        self.mutate(id, expected_version, |task| {
            task.current_step = Some(step);
            true
        })
    }

    async fn increment_retry_count(
        &self,
        id: &str,
        kind: CheckKind,
        expected_version: i64,
    ) -> Result<bool, StoreError> {
        self.mutate(id, expected_version, |task| {
            match kind {
                CheckKind::Text => task.text_retry_count += 1,
                CheckKind::Image => task.image_retry_count += 1,
            }
            true
        })
    }

    async fn save_state_snapshot(&self, id: &str, snapshot: &str, expected_version: i64) -> Result<bool, StoreError> {
        let snapshot = snapshot.to_string();
        self.mutate(id, expected_version, |task| {
            task.state_snapshot = Some(snapshot);
            true
        })
    }

    async fn mark_as_completed(&self, id: &str, expected_version: i64) -> Result<bool, StoreError> {
        self.update_status(id, TaskStatus::Completed, expected_version).await
    }

    async fn mark_as_failed(&self, id: &str, error: &str, expected_version: i64) -> Result<bool, StoreError> {
        let error = error.to_string();
        self.mutate(id, expected_version, |task| {
            if !task.status.can_transition_to(TaskStatus::Failed) {
                return false;
            }
            task.status = TaskStatus::Failed;
            task.worker_id = None;
            task.error_message = Some(error);
            task.completed_at = Some(now_ms());
            true
        })
    }

    async fn release_worker(&self, id: &str, worker_id: &str, expected_version: i64) -> Result<bool, StoreError> {
        self.mutate(id, expected_version, |task| {
            if task.worker_id.as_deref() != Some(worker_id) {
                return false;
            }
            if !task.status.can_transition_to(TaskStatus::Waiting) {
                return false;
            }
            task.status = TaskStatus::Waiting;
            task.worker_id = None;
            true
        })
    }

    async fn soft_delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        match inner.tasks.get_mut(id) {
            Some(task) if task.deleted_at.is_none() => {
                task.deleted_at = Some(now_ms());
                task.updated_at = now_ms();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.tasks.remove(id).is_some())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn create_result(&self, input: NewTaskResult) -> Result<TaskResult, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let result = TaskResult::new(input);
        inner.results.push(result.clone());
        Ok(result)
    }

    async fn find_results_by_task_id(&self, task_id: &str) -> Result<Vec<TaskResult>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.results.iter().filter(|r| r.task_id == task_id).cloned().collect())
    }

    async fn delete_results_by_task_id(&self, task_id: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let before = inner.results.len();
        inner.results.retain(|r| r.task_id != task_id);
        Ok((before - inner.results.len()) as u64)
    }

    async fn create_quality_check(&self, input: NewQualityCheck) -> Result<QualityCheck, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let check = QualityCheck::new(input);
        inner.checks.push(check.clone());
        Ok(check)
    }

    async fn find_quality_checks_by_task_id(&self, task_id: &str) -> Result<Vec<QualityCheck>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.checks.iter().filter(|c| c.task_id == task_id).cloned().collect())
    }
}

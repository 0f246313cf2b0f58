//! Synchronous executor
//!
//! Runs the workflow inline in the caller's task and returns the final
//! state. Writes the same result and quality rows the worker pool writes,
//! so sync and async tasks are indistinguishable in the store.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use taskstore::{NewTaskResult, ResultStore, ResultType, StoreError, TaskStatus, TaskStore};

use crate::domain::CreateTaskRequest;
use crate::scheduler::{ScheduleError, Scheduler};
use crate::workflow::{ProgressCallback, RunOutcome, WorkflowEngine, WorkflowError, WorkflowState};

/// Errors an inline execution can raise
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("task conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl From<ScheduleError> for ExecuteError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::Validation(message) => Self::Validation(message),
            ScheduleError::Store(e) => Self::Store(e),
        }
    }
}

/// Run accounting surfaced to the caller
#[derive(Debug, Clone)]
pub struct ExecutionMetadata {
    pub steps_completed: usize,
    pub tokens_used: u64,
    pub cost: f64,
}

/// Outcome of an inline execution
#[derive(Debug)]
pub struct ExecutionResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub duration_ms: u64,
    pub final_state: WorkflowState,
    pub metadata: ExecutionMetadata,
}

/// Inline workflow driver for low-latency single requests
pub struct SyncExecutor {
    store: Arc<dyn TaskStore>,
    results: Arc<dyn ResultStore>,
    engine: Arc<WorkflowEngine>,
}

impl SyncExecutor {
    pub fn new(store: Arc<dyn TaskStore>, results: Arc<dyn ResultStore>, engine: Arc<WorkflowEngine>) -> Self {
        Self { store, results, engine }
    }

    /// Validate, create, claim, and drive the workflow to a terminal state
    pub async fn execute(
        &self,
        mut request: CreateTaskRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<ExecutionResult, ExecuteError> {
        request.mode = taskstore::TaskMode::Sync;
        Scheduler::validate_request(&request)?;

        let task = self.store.create(request.into_new_task()).await?;
        let executor_id = format!("sync-{}", Uuid::now_v7());

        if !self.store.claim_task(&task.id, &executor_id, task.version).await? {
            return Err(ExecuteError::Conflict(format!("task {} claimed elsewhere", task.id)));
        }
        let claimed = self
            .store
            .find_by_id(&task.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(task.id.clone()))?;

        info!(task_id = %task.id, "sync execution starting");
        let outcome = self
            .engine
            .run(&task.id, WorkflowState::from_task(&claimed), progress.as_ref())
            .await?;

        let (status, final_state) = finish_run(&self.store, &self.results, &task.id, outcome)
            .await?
            .ok_or_else(|| ExecuteError::Conflict(format!("task {} taken over mid-run", task.id)))?;
        self.engine.checkpoints().forget(&task.id).await;

        let duration_ms = final_state.elapsed_ms();
        Ok(ExecutionResult {
            task_id: task.id,
            status,
            duration_ms,
            metadata: ExecutionMetadata {
                steps_completed: final_state.steps_completed.len(),
                tokens_used: final_state.tokens_used,
                cost: final_state.cost,
            },
            final_state,
        })
    }
}

/// Persist a run's outputs and drive the task row to its terminal state
///
/// Shared by the sync executor and the worker pool. Returns None when the
/// run was abandoned to another worker.
pub(crate) async fn finish_run(
    store: &Arc<dyn TaskStore>,
    results: &Arc<dyn ResultStore>,
    task_id: &str,
    outcome: RunOutcome,
) -> Result<Option<(TaskStatus, WorkflowState)>, StoreError> {
    match outcome {
        RunOutcome::Completed(state) => {
            write_results(results, task_id, &state, true).await?;
            if !mark_terminal(store, task_id, None).await? {
                warn!(task_id, "completion lost the version race");
            }
            Ok(Some((TaskStatus::Completed, state)))
        }
        RunOutcome::Failed(state) => {
            // Keep whatever partial content the run produced
            write_results(results, task_id, &state, false).await?;
            let error = state.error.clone().unwrap_or_else(|| "workflow failed".to_string());
            if !mark_terminal(store, task_id, Some(&error)).await? {
                warn!(task_id, "failure mark lost the version race");
            }
            Ok(Some((TaskStatus::Failed, state)))
        }
        RunOutcome::Cancelled(state) => {
            debug!(task_id, "run ended by cancellation, nothing persisted");
            Ok(Some((TaskStatus::Cancelled, state)))
        }
        RunOutcome::Abandoned => Ok(None),
    }
}

/// Completed when `error` is None, failed otherwise; a few refetch rounds
/// absorb version races with checkpoint writers
async fn mark_terminal(store: &Arc<dyn TaskStore>, task_id: &str, error: Option<&str>) -> Result<bool, StoreError> {
    for _ in 0..3 {
        let Some(task) = store.find_by_id(task_id).await? else {
            return Ok(false);
        };
        if task.is_terminal() {
            return Ok(false);
        }
        let done = match error {
            None => store.mark_as_completed(task_id, task.version).await?,
            Some(error) => store.mark_as_failed(task_id, error, task.version).await?,
        };
        if done {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn write_results(
    results: &Arc<dyn ResultStore>,
    task_id: &str,
    state: &WorkflowState,
    completed: bool,
) -> Result<(), StoreError> {
    if let Some(article) = &state.article_content {
        results
            .create_result(NewTaskResult {
                task_id: task_id.to_string(),
                result_type: ResultType::Article,
                content: Some(article.clone()),
                file_path: None,
                metadata: Some(serde_json::json!({
                    "rewrites": state.text_retry_count,
                })),
            })
            .await?;
    }

    for image in &state.images {
        results
            .create_result(NewTaskResult {
                task_id: task_id.to_string(),
                result_type: ResultType::Image,
                content: Some(image.url.clone()),
                file_path: image.local_path.clone(),
                metadata: Some(serde_json::json!({
                    "prompt": image.prompt,
                    "width": image.width,
                    "height": image.height,
                    "format": image.format,
                })),
            })
            .await?;
    }

    if completed && let Some(final_article) = &state.final_article_content {
        results
            .create_result(NewTaskResult {
                task_id: task_id.to_string(),
                result_type: ResultType::FinalArticle,
                content: Some(final_article.clone()),
                file_path: None,
                metadata: Some(serde_json::json!({
                    "word_count": crate::quality::count_words(final_article).0,
                    "tokens_used": state.tokens_used,
                    "cost": state.cost,
                    "steps_completed": state.steps_completed,
                    "duration_ms": state.elapsed_ms(),
                })),
            })
            .await?;
    }

    Ok(())
}

//! Workflow engine
//!
//! A loop over named nodes: check cancellation, race the node body against
//! its timeout, merge the patch, write through the step/retry-counter/
//! snapshot mutations under the task's version, then route. Any versioned
//! write that returns false means another worker owns the task - the
//! engine abandons the run without further mutation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use taskstore::{CheckKind, TaskStatus, TaskStore};

use super::checkpoint::{CheckpointManager, SaveOutcome};
use super::error::WorkflowError;
use super::node::WorkflowNode;
use super::state::WorkflowState;
use crate::config::WorkflowConfig;

/// Rewrite/regenerate budget and the exhaustion escape hatch
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_text_retries: u32,
    pub max_image_retries: u32,
    pub force_pass_on_exhaustion: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_text_retries: 3,
            max_image_retries: 3,
            force_pass_on_exhaustion: false,
        }
    }
}

impl From<&WorkflowConfig> for RetryPolicy {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            max_text_retries: config.max_text_retries,
            max_image_retries: config.max_image_retries,
            force_pass_on_exhaustion: config.force_pass_on_exhaustion,
        }
    }
}

/// Where to go after a node completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Next(&'static str),
    Done,
    Fail(String),
}

/// Terminal outcome of a run
#[derive(Debug)]
pub enum RunOutcome {
    Completed(WorkflowState),
    /// `state.error` describes the failure
    Failed(WorkflowState),
    /// Cooperative cancellation observed at a node boundary
    Cancelled(WorkflowState),
    /// Another worker took the task over; nothing further was written
    Abandoned,
}

/// Node-boundary progress report
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub message: String,
    pub percentage: u8,
}

/// Invoked at node boundaries with coarse progress
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// A workflow definition: nodes plus pure routing
pub struct Workflow {
    entry: &'static str,
    nodes: HashMap<&'static str, Arc<dyn WorkflowNode>>,
    router: fn(&WorkflowState, &RetryPolicy) -> Route,
    progress_for: fn(&str) -> u8,
}

impl Workflow {
    pub fn new(
        entry: &'static str,
        router: fn(&WorkflowState, &RetryPolicy) -> Route,
        progress_for: fn(&str) -> u8,
    ) -> Self {
        Self {
            entry,
            nodes: HashMap::new(),
            router,
            progress_for,
        }
    }

    pub fn add_node(mut self, node: Arc<dyn WorkflowNode>) -> Self {
        self.nodes.insert(node.name(), node);
        self
    }

    fn node(&self, name: &str) -> Option<&Arc<dyn WorkflowNode>> {
        self.nodes.get(name)
    }
}

/// Drives a workflow to a terminal outcome for one task
pub struct WorkflowEngine {
    workflow: Workflow,
    store: Arc<dyn TaskStore>,
    checkpoints: CheckpointManager,
    policy: RetryPolicy,
}

impl WorkflowEngine {
    pub fn new(workflow: Workflow, store: Arc<dyn TaskStore>, policy: RetryPolicy) -> Self {
        let checkpoints = CheckpointManager::new(store.clone());
        Self {
            workflow,
            store,
            checkpoints,
            policy,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run from the state's current position to a terminal outcome
    ///
    /// `state` may come fresh from the task row or from a checkpoint
    /// restore; routing resumes after the last completed step.
    pub async fn run(
        &self,
        task_id: &str,
        mut state: WorkflowState,
        progress: Option<&ProgressCallback>,
    ) -> Result<RunOutcome, WorkflowError> {
        state.start_time = Some(Instant::now());

        // Resume after the last completed step, or enter fresh
        let mut current = if state.current_step.is_none() {
            self.workflow.entry
        } else {
            match (self.workflow.router)(&state, &self.policy) {
                Route::Next(next) => next,
                Route::Done => {
                    return Ok(RunOutcome::Completed(state));
                }
                Route::Fail(message) => {
                    state.error = Some(message);
                    return Ok(RunOutcome::Failed(state));
                }
            }
        };

        info!(task_id, entry = current, "workflow run starting");

        loop {
            // Cooperative cancellation check on the authoritative row
            let task = self
                .store
                .find_by_id(task_id)
                .await?
                .ok_or_else(|| WorkflowError::TaskNotFound(task_id.to_string()))?;
            if task.status == TaskStatus::Cancelled {
                info!(task_id, step = current, "cancellation observed, exiting");
                return Ok(RunOutcome::Cancelled(state));
            }
            let mut version = task.version;

            let node = self
                .workflow
                .node(current)
                .ok_or_else(|| WorkflowError::UnknownNode(current.to_string()))?
                .clone();

            if let Some(callback) = progress {
                callback(ProgressUpdate {
                    message: format!("running {}", current),
                    percentage: (self.workflow.progress_for)(current),
                });
            }

            let started = Instant::now();
            let patch = match self.execute_node(node.as_ref(), &state).await {
                Ok(patch) => patch,
                Err(e) => {
                    let message = format!("{} ({}ms)", e, started.elapsed().as_millis());
                    warn!(task_id, step = current, error = %message, "node failed");
                    state.error = Some(message);
                    // Best-effort final snapshot so the failure context survives
                    self.checkpoints.save_checkpoint(task_id, current, &state, version).await;
                    return Ok(RunOutcome::Failed(state));
                }
            };

            let text_retries_before = state.text_retry_count;
            let image_retries_before = state.image_retry_count;
            state.apply(patch);
            state.current_step = Some(current.to_string());
            state.steps_completed.push(current.to_string());
            debug!(task_id, step = current, elapsed_ms = started.elapsed().as_millis() as u64, "node complete");

            // Write-through: current step
            if !self.store.update_current_step(task_id, current, version).await? {
                return Ok(RunOutcome::Abandoned);
            }
            version += 1;

            // Write-through: retry counters the node consumed
            if state.text_retry_count > text_retries_before {
                if !self.store.increment_retry_count(task_id, CheckKind::Text, version).await? {
                    return Ok(RunOutcome::Abandoned);
                }
                version += 1;
            }
            if state.image_retry_count > image_retries_before {
                if !self.store.increment_retry_count(task_id, CheckKind::Image, version).await? {
                    return Ok(RunOutcome::Abandoned);
                }
                version += 1;
            }

            // Checkpoint after every node boundary
            match self.checkpoints.save_checkpoint(task_id, current, &state, version).await {
                SaveOutcome::Saved => {}
                SaveOutcome::Conflict => return Ok(RunOutcome::Abandoned),
                SaveOutcome::Skipped => {}
            }

            match (self.workflow.router)(&state, &self.policy) {
                Route::Next(next) => current = next,
                Route::Done => {
                    if let Some(callback) = progress {
                        callback(ProgressUpdate {
                            message: "done".to_string(),
                            percentage: 100,
                        });
                    }
                    info!(task_id, steps = state.steps_completed.len(), "workflow completed");
                    return Ok(RunOutcome::Completed(state));
                }
                Route::Fail(message) => {
                    warn!(task_id, error = %message, "workflow failed by routing");
                    state.error = Some(message);
                    return Ok(RunOutcome::Failed(state));
                }
            }
        }
    }

    /// One node: timeout race plus transparent retries
    async fn execute_node(
        &self,
        node: &dyn WorkflowNode,
        state: &WorkflowState,
    ) -> Result<super::state::StatePatch, WorkflowError> {
        let attempts = node.transparent_retries() + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match tokio::time::timeout(node.timeout(), node.execute(state)).await {
                Ok(Ok(patch)) => return Ok(patch),
                Ok(Err(e)) => {
                    warn!(node = node.name(), attempt, error = %e, "node attempt failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(node = node.name(), attempt, timeout = ?node.timeout(), "node attempt timed out");
                    last_error = Some(WorkflowError::NodeTimeout {
                        node: node.name(),
                        timeout: node.timeout(),
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| WorkflowError::node(node.name(), "no attempts executed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::StatePatch;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use taskstore::{MemoryStore, NewTask, Task};

    struct StubNode {
        name: &'static str,
        fail_first: AtomicU32,
        retries: u32,
        delay: Duration,
    }

    impl StubNode {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                fail_first: AtomicU32::new(0),
                retries: 0,
                delay: Duration::ZERO,
            }
        }

        fn flaky(name: &'static str, failures: u32, retries: u32) -> Self {
            Self {
                name,
                fail_first: AtomicU32::new(failures),
                retries,
                delay: Duration::ZERO,
            }
        }

        fn slow(name: &'static str, delay: Duration) -> Self {
            Self {
                name,
                fail_first: AtomicU32::new(0),
                retries: 0,
                delay,
            }
        }
    }

    #[async_trait]
    impl WorkflowNode for StubNode {
        fn name(&self) -> &'static str {
            self.name
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(50)
        }

        fn transparent_retries(&self) -> u32 {
            self.retries
        }

        async fn execute(&self, _state: &WorkflowState) -> Result<StatePatch, WorkflowError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(WorkflowError::node(self.name, "induced failure"));
            }
            Ok(StatePatch {
                article_content: Some(format!("after {}", self.name)),
                tokens_used: 10,
                ..Default::default()
            })
        }
    }

    fn two_step_router(state: &WorkflowState, _policy: &RetryPolicy) -> Route {
        match state.current_step.as_deref() {
            None => Route::Next("first"),
            Some("first") => Route::Next("second"),
            Some("second") => Route::Done,
            Some(other) => Route::Fail(format!("unexpected step {}", other)),
        }
    }

    fn flat_progress(_: &str) -> u8 {
        50
    }

    async fn task_in(store: &MemoryStore) -> Task {
        let task = store
            .create(NewTask {
                topic: "AI".to_string(),
                requirements: "intro".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        store.claim_task(&task.id, "w1", task.version).await.unwrap();
        store.find_by_id(&task.id).await.unwrap().unwrap()
    }

    fn engine_with(workflow: Workflow, store: Arc<MemoryStore>) -> WorkflowEngine {
        WorkflowEngine::new(workflow, store, RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_runs_to_completion_and_checkpoints() {
        let store = Arc::new(MemoryStore::new());
        let task = task_in(&store).await;

        let workflow = Workflow::new("first", two_step_router, flat_progress)
            .add_node(Arc::new(StubNode::ok("first")))
            .add_node(Arc::new(StubNode::ok("second")));
        let engine = engine_with(workflow, store.clone());

        let outcome = engine.run(&task.id, WorkflowState::from_task(&task), None).await.unwrap();
        let state = match outcome {
            RunOutcome::Completed(state) => state,
            other => panic!("expected completion, got {:?}", other),
        };

        assert_eq!(state.steps_completed, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(state.tokens_used, 20);

        let row = store.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(row.current_step.as_deref(), Some("second"));
        assert!(row.state_snapshot.is_some());
    }

    #[tokio::test]
    async fn test_transparent_retry_recovers() {
        let store = Arc::new(MemoryStore::new());
        let task = task_in(&store).await;

        let workflow = Workflow::new("first", two_step_router, flat_progress)
            .add_node(Arc::new(StubNode::flaky("first", 1, 1)))
            .add_node(Arc::new(StubNode::ok("second")));
        let engine = engine_with(workflow, store.clone());

        let outcome = engine.run(&task.id, WorkflowState::from_task(&task), None).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_exhausted_node_fails_run() {
        let store = Arc::new(MemoryStore::new());
        let task = task_in(&store).await;

        let workflow = Workflow::new("first", two_step_router, flat_progress)
            .add_node(Arc::new(StubNode::flaky("first", 5, 1)))
            .add_node(Arc::new(StubNode::ok("second")));
        let engine = engine_with(workflow, store.clone());

        let outcome = engine.run(&task.id, WorkflowState::from_task(&task), None).await.unwrap();
        let state = match outcome {
            RunOutcome::Failed(state) => state,
            other => panic!("expected failure, got {:?}", other),
        };
        assert!(state.error.as_deref().unwrap().contains("induced failure"));
    }

    #[tokio::test]
    async fn test_timeout_fails_node() {
        let store = Arc::new(MemoryStore::new());
        let task = task_in(&store).await;

        let workflow = Workflow::new("first", two_step_router, flat_progress)
            .add_node(Arc::new(StubNode::slow("first", Duration::from_millis(200))))
            .add_node(Arc::new(StubNode::ok("second")));
        let engine = engine_with(workflow, store.clone());

        let outcome = engine.run(&task.id, WorkflowState::from_task(&task), None).await.unwrap();
        let state = match outcome {
            RunOutcome::Failed(state) => state,
            other => panic!("expected failure, got {:?}", other),
        };
        assert!(state.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_observed_at_boundary() {
        let store = Arc::new(MemoryStore::new());
        let task = task_in(&store).await;
        // Cancel while "running" (claimed above)
        let row = store.find_by_id(&task.id).await.unwrap().unwrap();
        store.update_status(&task.id, TaskStatus::Cancelled, row.version).await.unwrap();

        let workflow = Workflow::new("first", two_step_router, flat_progress)
            .add_node(Arc::new(StubNode::ok("first")))
            .add_node(Arc::new(StubNode::ok("second")));
        let engine = engine_with(workflow, store.clone());

        let outcome = engine.run(&task.id, WorkflowState::from_task(&task), None).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled(_)));

        // No mutation after cancellation
        let row = store.find_by_id(&task.id).await.unwrap().unwrap();
        assert!(row.current_step.is_none());
    }

    #[tokio::test]
    async fn test_resume_skips_completed_steps() {
        let store = Arc::new(MemoryStore::new());
        let task = task_in(&store).await;

        let workflow = Workflow::new("first", two_step_router, flat_progress)
            .add_node(Arc::new(StubNode::flaky("first", 99, 0))) // would fail if re-entered
            .add_node(Arc::new(StubNode::ok("second")));
        let engine = engine_with(workflow, store.clone());

        let mut state = WorkflowState::from_task(&task);
        state.current_step = Some("first".to_string());

        let outcome = engine.run(&task.id, state, None).await.unwrap();
        let state = match outcome {
            RunOutcome::Completed(state) => state,
            other => panic!("expected completion, got {:?}", other),
        };
        assert_eq!(state.steps_completed, vec!["second".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_version_abandons() {
        let store = Arc::new(MemoryStore::new());
        let task = task_in(&store).await;

        struct Usurper {
            store: Arc<MemoryStore>,
            task_id: String,
        }

        #[async_trait]
        impl WorkflowNode for Usurper {
            fn name(&self) -> &'static str {
                "first"
            }
            fn timeout(&self) -> Duration {
                Duration::from_millis(100)
            }
            async fn execute(&self, _state: &WorkflowState) -> Result<StatePatch, WorkflowError> {
                // Another writer bumps the version mid-node
                let row = self.store.find_by_id(&self.task_id).await.unwrap().unwrap();
                self.store.update_current_step(&self.task_id, "elsewhere", row.version).await.unwrap();
                Ok(StatePatch::default())
            }
        }

        let workflow = Workflow::new("first", two_step_router, flat_progress)
            .add_node(Arc::new(Usurper {
                store: store.clone(),
                task_id: task.id.clone(),
            }))
            .add_node(Arc::new(StubNode::ok("second")));
        let engine = engine_with(workflow, store.clone());

        let outcome = engine.run(&task.id, WorkflowState::from_task(&task), None).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Abandoned));
    }

    #[tokio::test]
    async fn test_progress_callback_fires() {
        let store = Arc::new(MemoryStore::new());
        let task = task_in(&store).await;

        let workflow = Workflow::new("first", two_step_router, flat_progress)
            .add_node(Arc::new(StubNode::ok("first")))
            .add_node(Arc::new(StubNode::ok("second")));
        let engine = engine_with(workflow, store.clone());

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let callback: ProgressCallback = Arc::new(move |update: ProgressUpdate| {
            seen_clone.lock().unwrap().push(update.percentage);
        });

        engine.run(&task.id, WorkflowState::from_task(&task), Some(&callback)).await.unwrap();

        let percentages = seen.lock().unwrap().clone();
        assert_eq!(percentages.last(), Some(&100));
        assert!(percentages.len() >= 3);
    }
}

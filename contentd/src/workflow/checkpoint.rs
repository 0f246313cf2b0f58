//! Checkpoint manager
//!
//! Persists the workflow state snapshot to the task row under the caller's
//! version, with a per-process memory cache for same-worker fast reload.
//! Saving is best-effort: a transient store error is logged and swallowed
//! (the next boundary retries), but a version conflict is surfaced - it
//! means another worker owns the task now.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use taskstore::TaskStore;

use super::state::WorkflowState;

/// Outcome of a checkpoint save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Snapshot landed; the task version was bumped
    Saved,
    /// Version mismatch: another worker took over
    Conflict,
    /// Transient failure, swallowed; nothing was written
    Skipped,
}

#[derive(Clone)]
struct CachedCheckpoint {
    step_name: String,
    snapshot: String,
}

/// Reads and writes state snapshots for crash-resume
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn TaskStore>,
    cache: Arc<Mutex<HashMap<String, CachedCheckpoint>>>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Persist the state snapshot under the task's current version
    pub async fn save_checkpoint(
        &self,
        task_id: &str,
        step_name: &str,
        state: &WorkflowState,
        expected_version: i64,
    ) -> SaveOutcome {
        let snapshot = match state.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(task_id, step_name, error = %e, "checkpoint serialization failed, skipping");
                return SaveOutcome::Skipped;
            }
        };

        match self.store.save_state_snapshot(task_id, &snapshot, expected_version).await {
            Ok(true) => {
                debug!(task_id, step_name, "checkpoint saved");
                self.cache.lock().await.insert(
                    task_id.to_string(),
                    CachedCheckpoint {
                        step_name: step_name.to_string(),
                        snapshot,
                    },
                );
                SaveOutcome::Saved
            }
            Ok(false) => {
                warn!(task_id, step_name, "checkpoint version conflict, task owned elsewhere");
                SaveOutcome::Conflict
            }
            Err(e) => {
                warn!(task_id, step_name, error = %e, "checkpoint write failed, skipping");
                SaveOutcome::Skipped
            }
        }
    }

    /// Load the latest snapshot: memory first, then the store row
    pub async fn load_checkpoint(&self, task_id: &str) -> Option<WorkflowState> {
        if let Some(cached) = self.cache.lock().await.get(task_id) {
            match serde_json::from_str(&cached.snapshot) {
                Ok(state) => {
                    debug!(task_id, step = %cached.step_name, "checkpoint loaded from cache");
                    return Some(state);
                }
                Err(e) => warn!(task_id, error = %e, "cached checkpoint unparseable, falling back to store"),
            }
        }

        let snapshot = match self.store.find_by_id(task_id).await {
            Ok(Some(task)) => task.state_snapshot?,
            Ok(None) => return None,
            Err(e) => {
                warn!(task_id, error = %e, "checkpoint load failed");
                return None;
            }
        };

        match serde_json::from_str(&snapshot) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(task_id, error = %e, "stored checkpoint unparseable, replaying from scratch");
                None
            }
        }
    }

    /// Merge any stored snapshot into an initial state
    ///
    /// Identity fields always come from the initial state, so a snapshot
    /// can never redirect a task to a different request.
    pub async fn restore_state(&self, task_id: &str, initial: WorkflowState) -> WorkflowState {
        let Some(mut restored) = self.load_checkpoint(task_id).await else {
            return initial;
        };

        restored.task_id = initial.task_id;
        restored.workflow_type = initial.workflow_type;
        restored.mode = initial.mode;
        restored.topic = initial.topic;
        restored.requirements = initial.requirements;
        restored.hard_constraints = initial.hard_constraints;
        restored.image_size = initial.image_size;
        restored.version = initial.version;
        restored.start_time = initial.start_time;
        restored
    }

    /// Drop the memory entry once a task reaches a terminal state
    pub async fn forget(&self, task_id: &str) {
        self.cache.lock().await.remove(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskstore::{MemoryStore, NewTask, Task};

    async fn store_with_task() -> (Arc<MemoryStore>, Task) {
        let store = Arc::new(MemoryStore::new());
        let task = store
            .create(NewTask {
                topic: "AI".to_string(),
                requirements: "intro".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        (store, task)
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let (store, task) = store_with_task().await;
        let manager = CheckpointManager::new(store.clone());

        let mut state = WorkflowState::from_task(&task);
        state.article_content = Some("draft".to_string());
        state.current_step = Some("write".to_string());

        let outcome = manager.save_checkpoint(&task.id, "write", &state, task.version).await;
        assert_eq!(outcome, SaveOutcome::Saved);

        let loaded = manager.load_checkpoint(&task.id).await.unwrap();
        assert_eq!(loaded.article_content.as_deref(), Some("draft"));
        assert_eq!(loaded.current_step.as_deref(), Some("write"));
    }

    #[tokio::test]
    async fn test_save_conflict_surfaces() {
        let (store, task) = store_with_task().await;
        let manager = CheckpointManager::new(store.clone());
        let state = WorkflowState::from_task(&task);

        let outcome = manager.save_checkpoint(&task.id, "search", &state, 99).await;
        assert_eq!(outcome, SaveOutcome::Conflict);
    }

    #[tokio::test]
    async fn test_load_from_store_without_cache() {
        let (store, task) = store_with_task().await;

        let mut state = WorkflowState::from_task(&task);
        state.search_results = vec![crate::services::SearchHit {
            title: "hit".to_string(),
            url: "https://example.com".to_string(),
            content: "body".to_string(),
            score: 0.8,
            published_date: None,
            author: None,
        }];
        store.save_state_snapshot(&task.id, &state.snapshot().unwrap(), task.version).await.unwrap();

        // Fresh manager: simulates a different worker process
        let manager = CheckpointManager::new(store.clone());
        let loaded = manager.load_checkpoint(&task.id).await.unwrap();
        assert_eq!(loaded.search_results.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_preserves_identity_fields() {
        let (store, task) = store_with_task().await;
        let manager = CheckpointManager::new(store.clone());

        // A snapshot claiming a different topic must not win
        let mut snapshotted = WorkflowState::from_task(&task);
        snapshotted.topic = "tampered".to_string();
        snapshotted.article_content = Some("progress".to_string());
        manager.save_checkpoint(&task.id, "write", &snapshotted, task.version).await;

        let initial = WorkflowState::from_task(&store.find_by_id(&task.id).await.unwrap().unwrap());
        let restored = manager.restore_state(&task.id, initial).await;

        assert_eq!(restored.topic, "AI");
        assert_eq!(restored.article_content.as_deref(), Some("progress"));
    }

    #[tokio::test]
    async fn test_restore_without_snapshot_returns_initial() {
        let (store, task) = store_with_task().await;
        let manager = CheckpointManager::new(store.clone());

        let initial = WorkflowState::from_task(&task);
        let restored = manager.restore_state(&task.id, initial.clone()).await;
        assert_eq!(restored.topic, initial.topic);
        assert!(restored.article_content.is_none());
    }

    #[tokio::test]
    async fn test_forget_drops_cache_entry() {
        let (store, task) = store_with_task().await;
        let manager = CheckpointManager::new(store.clone());
        let state = WorkflowState::from_task(&task);

        manager.save_checkpoint(&task.id, "search", &state, task.version).await;
        manager.forget(&task.id).await;

        // Still loadable from the store row
        assert!(manager.load_checkpoint(&task.id).await.is_some());
    }
}

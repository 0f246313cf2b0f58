//! taskstore - task lifecycle store with optimistic locking
//!
//! A task row carries a monotonic `version`; every mutation takes the
//! caller's `expected_version` and succeeds only when it matches, bumping
//! the version by one. A mismatch returns `false` (not an error) so callers
//! can refetch and retry, or walk away when another worker owns the task.
//!
//! Two backends implement the same contract: [`SqliteStore`] for durable
//! deployments and [`MemoryStore`] for tests and embedded use. No behavior
//! may depend on which backend is underneath.

mod error;
mod memory;
mod result;
mod sqlite;
mod store;
mod task;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use result::{NewQualityCheck, NewTaskResult, QualityCheck, ResultType, TaskResult};
pub use sqlite::SqliteStore;
pub use store::{Pagination, ResultStore, TaskFilter, TaskStore};
pub use task::{CheckKind, HardConstraints, NewTask, Priority, Task, TaskMode, TaskStatus};

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

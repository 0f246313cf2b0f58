//! SQLite store backend
//!
//! One row per task; the optimistic lock rides in the row predicate of
//! every UPDATE (`WHERE id = ? AND version = ?`), so a stale writer changes
//! zero rows and the caller sees `false`. The connection is guarded by a
//! mutex; statements are short enough that blocking is negligible.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::now_ms;
use crate::result::{NewQualityCheck, NewTaskResult, QualityCheck, ResultType, TaskResult};
use crate::store::{Pagination, ResultStore, TaskFilter, TaskStore};
use crate::task::{CheckKind, NewTask, Task, TaskStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id                TEXT PRIMARY KEY,
    idempotency_key   TEXT,
    mode              TEXT NOT NULL,
    topic             TEXT NOT NULL,
    requirements      TEXT NOT NULL,
    target_audience   TEXT,
    keywords          TEXT NOT NULL,
    tone              TEXT,
    hard_constraints  TEXT,
    priority          TEXT NOT NULL,
    image_size        TEXT,
    status            TEXT NOT NULL,
    current_step      TEXT,
    worker_id         TEXT,
    text_retry_count  INTEGER NOT NULL DEFAULT 0,
    image_retry_count INTEGER NOT NULL DEFAULT 0,
    state_snapshot    TEXT,
    error_message     TEXT,
    version           INTEGER NOT NULL DEFAULT 1,
    created_at        INTEGER NOT NULL,
    updated_at        INTEGER NOT NULL,
    started_at        INTEGER,
    completed_at      INTEGER,
    deleted_at        INTEGER
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_idempotency
    ON tasks(idempotency_key)
    WHERE idempotency_key IS NOT NULL AND deleted_at IS NULL;

CREATE INDEX IF NOT EXISTS idx_tasks_pending
    ON tasks(status, priority, created_at);

CREATE TABLE IF NOT EXISTS task_results (
    id          TEXT PRIMARY KEY,
    task_id     TEXT NOT NULL,
    result_type TEXT NOT NULL,
    content     TEXT,
    file_path   TEXT,
    metadata    TEXT,
    created_at  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_results_task ON task_results(task_id);

CREATE TABLE IF NOT EXISTS quality_checks (
    id                      TEXT PRIMARY KEY,
    task_id                 TEXT NOT NULL,
    check_type              TEXT NOT NULL,
    score                   REAL NOT NULL,
    passed                  INTEGER NOT NULL,
    hard_constraints_passed INTEGER NOT NULL,
    details                 TEXT NOT NULL,
    fix_suggestions         TEXT NOT NULL,
    rubric_version          TEXT NOT NULL,
    model_name              TEXT,
    created_at              INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_checks_task ON quality_checks(task_id);
"#;

/// Pending-scan ordering: urgent first, then FIFO within a priority
const PRIORITY_ORDER: &str =
    "CASE priority WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 WHEN 'normal' THEN 2 ELSE 3 END, created_at ASC";

/// SQLite-backed task store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database and run schema migration
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.as_ref().display(), "sqlite store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory database, handy for tests
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
        let keywords: String = row.get("keywords")?;
        let constraints: Option<String> = row.get("hard_constraints")?;
        let status: String = row.get("status")?;
        let mode: String = row.get("mode")?;
        let priority: String = row.get("priority")?;

        Ok(Task {
            id: row.get("id")?,
            idempotency_key: row.get("idempotency_key")?,
            mode: mode.parse().unwrap_or_default(),
            topic: row.get("topic")?,
            requirements: row.get("requirements")?,
            target_audience: row.get("target_audience")?,
            keywords: serde_json::from_str(&keywords).unwrap_or_default(),
            tone: row.get("tone")?,
            hard_constraints: constraints.and_then(|c| serde_json::from_str(&c).ok()),
            priority: priority.parse().unwrap_or_default(),
            image_size: row.get("image_size")?,
            status: status.parse().unwrap_or_default(),
            current_step: row.get("current_step")?,
            worker_id: row.get("worker_id")?,
            text_retry_count: row.get("text_retry_count")?,
            image_retry_count: row.get("image_retry_count")?,
            state_snapshot: row.get("state_snapshot")?,
            error_message: row.get("error_message")?,
            version: row.get("version")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }

    fn get_task(conn: &Connection, id: &str) -> Result<Option<Task>, StoreError> {
        let task = conn
            .query_row(
                "SELECT * FROM tasks WHERE id = ?1 AND deleted_at IS NULL",
                params![id],
                Self::row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Current status of a live row, for transition legality checks
    fn current_status(conn: &Connection, id: &str) -> Result<TaskStatus, StoreError> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM tasks WHERE id = ?1 AND deleted_at IS NULL",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        status
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?
            .parse()
            .map_err(|_| StoreError::NotFound(id.to_string()))
    }

    fn filter_clause(filter: &TaskFilter) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut args = Vec::new();
        if !filter.include_deleted {
            clauses.push("deleted_at IS NULL".to_string());
        }
        if let Some(status) = filter.status {
            clauses.push(format!("status = ?{}", args.len() + 1));
            args.push(status.to_string());
        }
        if let Some(mode) = filter.mode {
            clauses.push(format!("mode = ?{}", args.len() + 1));
            args.push(mode.to_string());
        }
        if let Some(priority) = filter.priority {
            clauses.push(format!("priority = ?{}", args.len() + 1));
            args.push(priority.to_string());
        }
        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (sql, args)
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create(&self, input: NewTask) -> Result<Task, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let task = Task::new(input);

        let result = conn.execute(
            "INSERT INTO tasks (
                id, idempotency_key, mode, topic, requirements, target_audience,
                keywords, tone, hard_constraints, priority, image_size, status,
                text_retry_count, image_retry_count, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, 0, 1, ?13, ?14)",
            params![
                task.id,
                task.idempotency_key,
                task.mode.to_string(),
                task.topic,
                task.requirements,
                task.target_audience,
                serde_json::to_string(&task.keywords)?,
                task.tone,
                task.hard_constraints.as_ref().map(serde_json::to_string).transpose()?,
                task.priority.to_string(),
                task.image_size,
                task.status.to_string(),
                task.created_at,
                task.updated_at,
            ],
        );

        match result {
            Ok(_) => {
                debug!(task_id = %task.id, "task created");
                Ok(task)
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation && task.idempotency_key.is_some() =>
            {
                Err(StoreError::DuplicateIdempotencyKey(task.idempotency_key.unwrap_or_default()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        Self::get_task(&conn, id)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let task = conn
            .query_row(
                "SELECT * FROM tasks WHERE idempotency_key = ?1 AND deleted_at IS NULL",
                params![key],
                Self::row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    async fn find_many(&self, filter: &TaskFilter, page: &Pagination) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let (clause, args) = Self::filter_clause(filter);
        let sql = format!(
            "SELECT * FROM tasks{} ORDER BY created_at ASC LIMIT {} OFFSET {}",
            clause, page.limit, page.offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), Self::row_to_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    async fn count(&self, filter: &TaskFilter) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let (clause, args) = Self::filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM tasks{}", clause);
        let count: i64 = conn.query_row(&sql, rusqlite::params_from_iter(args.iter()), |row| row.get(0))?;
        Ok(count as u64)
    }

    async fn get_pending_tasks(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let sql = format!(
            "SELECT * FROM tasks WHERE status = 'pending' AND deleted_at IS NULL ORDER BY {} LIMIT {}",
            PRIORITY_ORDER, limit
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    async fn claim_task(&self, id: &str, worker_id: &str, expected_version: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = now_ms();
        let changed = conn.execute(
            "UPDATE tasks SET
                status = 'running', worker_id = ?1,
                started_at = COALESCE(started_at, ?2), updated_at = ?2,
                version = version + 1
             WHERE id = ?3 AND version = ?4
               AND status IN ('pending', 'waiting') AND deleted_at IS NULL",
            params![worker_id, now, id, expected_version],
        )?;
        Ok(changed == 1)
    }

    async fn update_status(&self, id: &str, status: TaskStatus, expected_version: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let current = Self::current_status(&conn, id)?;
        if !current.can_transition_to(status) {
            debug!(task_id = %id, from = %current, to = %status, "illegal transition rejected");
            return Ok(false);
        }

        let now = now_ms();
        let completed_at = if status.is_terminal() { Some(now) } else { None };
        // Any change in another process bumps version, so the stale predicate
        // also covers a stale `current` read.
        let changed = conn.execute(
            "UPDATE tasks SET
                status = ?1,
                worker_id = CASE WHEN ?1 = 'running' THEN worker_id ELSE NULL END,
                completed_at = COALESCE(?2, completed_at),
                updated_at = ?3, version = version + 1
             WHERE id = ?4 AND version = ?5 AND status = ?6 AND deleted_at IS NULL",
            params![status.to_string(), completed_at, now, id, expected_version, current.to_string()],
        )?;
        Ok(changed == 1)
    }

    async fn update_current_step(&self, id: &str, step: &str, expected_version: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let changed = conn.execute(
            "UPDATE tasks SET current_step = ?1, updated_at = ?2, version = version + 1
             WHERE id = ?3 AND version = ?4 AND status IN ('pending', 'running', 'waiting') AND deleted_at IS NULL",
            params![step, now_ms(), id, expected_version],
        )?;
        Ok(changed == 1)
    }

    async fn increment_retry_count(
        &self,
        id: &str,
        kind: CheckKind,
        expected_version: i64,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let column = match kind {
            CheckKind::Text => "text_retry_count",
            CheckKind::Image => "image_retry_count",
        };
        let sql = format!(
            "UPDATE tasks SET {col} = {col} + 1, updated_at = ?1, version = version + 1
             WHERE id = ?2 AND version = ?3 AND status IN ('pending', 'running', 'waiting') AND deleted_at IS NULL",
            col = column
        );
        let changed = conn.execute(&sql, params![now_ms(), id, expected_version])?;
        Ok(changed == 1)
    }

    async fn save_state_snapshot(&self, id: &str, snapshot: &str, expected_version: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let changed = conn.execute(
            "UPDATE tasks SET state_snapshot = ?1, updated_at = ?2, version = version + 1
             WHERE id = ?3 AND version = ?4 AND status IN ('pending', 'running', 'waiting') AND deleted_at IS NULL",
            params![snapshot, now_ms(), id, expected_version],
        )?;
        Ok(changed == 1)
    }

    async fn mark_as_completed(&self, id: &str, expected_version: i64) -> Result<bool, StoreError> {
        self.update_status(id, TaskStatus::Completed, expected_version).await
    }

    async fn mark_as_failed(&self, id: &str, error: &str, expected_version: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let current = Self::current_status(&conn, id)?;
        if !current.can_transition_to(TaskStatus::Failed) {
            return Ok(false);
        }
        let now = now_ms();
        let changed = conn.execute(
            "UPDATE tasks SET
                status = 'failed', worker_id = NULL, error_message = ?1,
                completed_at = ?2, updated_at = ?2, version = version + 1
             WHERE id = ?3 AND version = ?4 AND status = ?5 AND deleted_at IS NULL",
            params![error, now, id, expected_version, current.to_string()],
        )?;
        Ok(changed == 1)
    }

    async fn release_worker(&self, id: &str, worker_id: &str, expected_version: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let changed = conn.execute(
            "UPDATE tasks SET status = 'waiting', worker_id = NULL, updated_at = ?1, version = version + 1
             WHERE id = ?2 AND version = ?3 AND status = 'running' AND worker_id = ?4 AND deleted_at IS NULL",
            params![now_ms(), id, expected_version, worker_id],
        )?;
        Ok(changed == 1)
    }

    async fn soft_delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = now_ms();
        let changed = conn.execute(
            "UPDATE tasks SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![now, id],
        )?;
        Ok(changed == 1)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let changed = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(changed == 1)
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn create_result(&self, input: NewTaskResult) -> Result<TaskResult, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let result = TaskResult::new(input);
        conn.execute(
            "INSERT INTO task_results (id, task_id, result_type, content, file_path, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                result.id,
                result.task_id,
                result.result_type.to_string(),
                result.content,
                result.file_path,
                result.metadata.as_ref().map(serde_json::to_string).transpose()?,
                result.created_at,
            ],
        )?;
        Ok(result)
    }

    async fn find_results_by_task_id(&self, task_id: &str) -> Result<Vec<TaskResult>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT * FROM task_results WHERE task_id = ?1 ORDER BY created_at ASC")?;
        let rows = stmt.query_map(params![task_id], |row| {
            let result_type: String = row.get("result_type")?;
            let metadata: Option<String> = row.get("metadata")?;
            Ok(TaskResult {
                id: row.get("id")?,
                task_id: row.get("task_id")?,
                result_type: result_type.parse().unwrap_or(ResultType::Text),
                content: row.get("content")?,
                file_path: row.get("file_path")?,
                metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                created_at: row.get("created_at")?,
            })
        })?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn delete_results_by_task_id(&self, task_id: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let changed = conn.execute("DELETE FROM task_results WHERE task_id = ?1", params![task_id])?;
        Ok(changed as u64)
    }

    async fn create_quality_check(&self, input: NewQualityCheck) -> Result<QualityCheck, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let check = QualityCheck::new(input);
        conn.execute(
            "INSERT INTO quality_checks (
                id, task_id, check_type, score, passed, hard_constraints_passed,
                details, fix_suggestions, rubric_version, model_name, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                check.id,
                check.task_id,
                check.check_type.to_string(),
                check.score,
                check.passed,
                check.hard_constraints_passed,
                serde_json::to_string(&check.details)?,
                serde_json::to_string(&check.fix_suggestions)?,
                check.rubric_version,
                check.model_name,
                check.created_at,
            ],
        )?;
        Ok(check)
    }

    async fn find_quality_checks_by_task_id(&self, task_id: &str) -> Result<Vec<QualityCheck>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT * FROM quality_checks WHERE task_id = ?1 ORDER BY created_at ASC")?;
        let rows = stmt.query_map(params![task_id], |row| {
            let check_type: String = row.get("check_type")?;
            let details: String = row.get("details")?;
            let fix_suggestions: String = row.get("fix_suggestions")?;
            Ok(QualityCheck {
                id: row.get("id")?,
                task_id: row.get("task_id")?,
                check_type: check_type.parse().unwrap_or(CheckKind::Text),
                score: row.get("score")?,
                passed: row.get("passed")?,
                hard_constraints_passed: row.get("hard_constraints_passed")?,
                details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
                fix_suggestions: serde_json::from_str(&fix_suggestions).unwrap_or_default(),
                rubric_version: row.get("rubric_version")?,
                model_name: row.get("model_name")?,
                created_at: row.get("created_at")?,
            })
        })?;
        let mut checks = Vec::new();
        for row in rows {
            checks.push(row?);
        }
        Ok(checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;

    fn new_task(topic: &str) -> NewTask {
        NewTask {
            topic: topic.to_string(),
            requirements: "write it".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_find_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = store
            .create(NewTask {
                keywords: vec!["ai".to_string()],
                hard_constraints: Some(crate::HardConstraints {
                    min_words: Some(500),
                    ..Default::default()
                }),
                priority: Priority::High,
                image_size: Some("2560x1440".to_string()),
                ..new_task("AI")
            })
            .await
            .unwrap();

        let found = store.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(found.topic, "AI");
        assert_eq!(found.keywords, vec!["ai".to_string()]);
        assert_eq!(found.hard_constraints.unwrap().min_words, Some(500));
        assert_eq!(found.priority, Priority::High);
        assert_eq!(found.image_size.as_deref(), Some("2560x1440"));
        assert_eq!(found.version, 1);
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        let input = NewTask {
            idempotency_key: Some("key-1".to_string()),
            ..new_task("AI")
        };
        store.create(input.clone()).await.unwrap();

        let err = store.create(input).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdempotencyKey(_)));
    }

    #[tokio::test]
    async fn test_claim_protocol() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = store.create(new_task("AI")).await.unwrap();

        assert!(!store.claim_task(&task.id, "w1", 99).await.unwrap());
        assert!(store.claim_task(&task.id, "w1", 1).await.unwrap());
        // Pre-claim version no longer matches
        assert!(!store.claim_task(&task.id, "w2", 1).await.unwrap());

        let claimed = store.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, TaskStatus::Running);
        assert_eq!(claimed.worker_id.as_deref(), Some("w1"));
        assert_eq!(claimed.version, 2);
    }

    #[tokio::test]
    async fn test_terminal_is_sink() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = store.create(new_task("AI")).await.unwrap();
        store.claim_task(&task.id, "w1", 1).await.unwrap();
        assert!(store.mark_as_completed(&task.id, 2).await.unwrap());

        assert!(!store.mark_as_completed(&task.id, 3).await.unwrap());
        assert!(!store.claim_task(&task.id, "w2", 3).await.unwrap());
        assert!(!store.mark_as_failed(&task.id, "late", 3).await.unwrap());

        let done = store.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.worker_id.is_none());
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_rejects_every_mutation() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = store.create(new_task("AI")).await.unwrap();
        store.claim_task(&task.id, "w1", 1).await.unwrap();
        store.mark_as_completed(&task.id, 2).await.unwrap();

        let current = store.find_by_id(&task.id).await.unwrap().unwrap().version;
        assert!(!store.save_state_snapshot(&task.id, "{}", current).await.unwrap());
        assert!(!store.update_current_step(&task.id, "late", current).await.unwrap());
        assert!(!store.increment_retry_count(&task.id, CheckKind::Text, current).await.unwrap());
    }

    #[tokio::test]
    async fn test_pending_scan_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (topic, priority) in [("a", Priority::Low), ("b", Priority::Urgent), ("c", Priority::Normal)] {
            store
                .create(NewTask {
                    priority,
                    ..new_task(topic)
                })
                .await
                .unwrap();
        }

        let pending = store.get_pending_tasks(10).await.unwrap();
        let topics: Vec<&str> = pending.iter().map(|t| t.topic.as_str()).collect();
        assert_eq!(topics, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_snapshot_and_retry_updates() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = store.create(new_task("AI")).await.unwrap();

        assert!(store.save_state_snapshot(&task.id, r#"{"current_step":"search"}"#, 1).await.unwrap());
        assert!(store.update_current_step(&task.id, "organize", 2).await.unwrap());
        assert!(store.increment_retry_count(&task.id, CheckKind::Text, 3).await.unwrap());

        let updated = store.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(updated.state_snapshot.as_deref(), Some(r#"{"current_step":"search"}"#));
        assert_eq!(updated.current_step.as_deref(), Some("organize"));
        assert_eq!(updated.text_retry_count, 1);
        assert_eq!(updated.version, 4);
    }

    #[tokio::test]
    async fn test_release_and_reclaim() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = store.create(new_task("AI")).await.unwrap();
        store.claim_task(&task.id, "w1", 1).await.unwrap();

        assert!(!store.release_worker(&task.id, "w2", 2).await.unwrap());
        assert!(store.release_worker(&task.id, "w1", 2).await.unwrap());

        let waiting = store.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(waiting.status, TaskStatus::Waiting);
        assert!(waiting.worker_id.is_none());

        assert!(store.claim_task(&task.id, "w2", 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_soft_delete_frees_idempotency_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = store
            .create(NewTask {
                idempotency_key: Some("k".to_string()),
                ..new_task("AI")
            })
            .await
            .unwrap();

        assert!(store.soft_delete(&task.id).await.unwrap());
        assert!(store.find_by_id(&task.id).await.unwrap().is_none());

        // Partial unique index releases the key for reuse
        store
            .create(NewTask {
                idempotency_key: Some("k".to_string()),
                ..new_task("again")
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");

        let id = {
            let store = SqliteStore::open(&path).unwrap();
            store.create(new_task("durable")).await.unwrap().id
        };

        let store = SqliteStore::open(&path).unwrap();
        let found = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(found.topic, "durable");
    }

    #[tokio::test]
    async fn test_quality_check_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .create_quality_check(NewQualityCheck {
                task_id: "t1".to_string(),
                check_type: CheckKind::Text,
                score: 7.4,
                passed: true,
                hard_constraints_passed: true,
                details: serde_json::json!({"relevance": 8.0}),
                fix_suggestions: vec!["tighten intro".to_string()],
                rubric_version: "v1".to_string(),
                model_name: None,
            })
            .await
            .unwrap();

        let checks = store.find_quality_checks_by_task_id("t1").await.unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].fix_suggestions, vec!["tighten intro".to_string()]);
        assert!((checks[0].score - 7.4).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_results_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .create_result(NewTaskResult {
                task_id: "t1".to_string(),
                result_type: ResultType::Image,
                content: Some("https://img.example/1.png".to_string()),
                file_path: Some("/tmp/1.png".to_string()),
                metadata: Some(serde_json::json!({"width": 2560, "height": 1440})),
            })
            .await
            .unwrap();

        let results = store.find_results_by_task_id("t1").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result_type, ResultType::Image);
        assert_eq!(results[0].metadata.as_ref().unwrap()["width"], 2560);

        assert_eq!(store.delete_results_by_task_id("t1").await.unwrap(), 1);
    }
}

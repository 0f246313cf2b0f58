//! In-process job queue: FIFO within numeric priority, with delayed entries
//!
//! Delivery is at-least-once: a handler failure re-enqueues the job with
//! exponential backoff until the attempt cap, and a crashed worker simply
//! never acks - the optimistic claim protocol makes the redelivery safe.
//! Queue-level retries never touch the workflow's rewrite budget.

use rand::Rng;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::domain::JobPayload;

/// Queue counters, Bull-style
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub delayed: usize,
    /// Redeliveries caused by handler failures
    pub repeat: u64,
}

#[derive(Debug)]
struct QueuedJob {
    payload: JobPayload,
    priority: u8,
    seq: u64,
    attempt: u32,
}

impl Eq for QueuedJob {}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: lower priority value dequeues first, then FIFO by seq
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct DelayedJob {
    ready_at: Instant,
    job: QueuedJob,
}

/// A job leased to a worker; must be returned via complete/fail/discard
#[derive(Debug)]
pub struct LeasedJob {
    pub payload: JobPayload,
    /// Zero-based delivery attempt
    pub attempt: u32,
    priority: u8,
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<QueuedJob>,
    delayed: Vec<DelayedJob>,
    seq: u64,
    paused: bool,
    closed: bool,
    active: usize,
    completed: u64,
    failed: u64,
    repeat: u64,
    progress: HashMap<String, u8>,
}

/// Priority job queue with delayed execution and server-side retry
pub struct JobQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            config,
        }
    }

    /// Enqueue a job, optionally delayed
    pub fn add_task(&self, payload: JobPayload, priority: u8, delay: Option<Duration>) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.closed {
            warn!(task_id = %payload.task_id, "enqueue on closed queue dropped");
            return;
        }
        inner.seq += 1;
        let job = QueuedJob {
            payload,
            priority,
            seq: inner.seq,
            attempt: 0,
        };
        match delay {
            Some(delay) if !delay.is_zero() => {
                debug!(task_id = %job.payload.task_id, ?delay, "job delayed");
                inner.delayed.push(DelayedJob {
                    ready_at: Instant::now() + delay,
                    job,
                });
            }
            _ => {
                debug!(task_id = %job.payload.task_id, priority, "job enqueued");
                inner.heap.push(job);
            }
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Enqueue for execution after `delay`
    pub fn add_delayed_task(&self, payload: JobPayload, priority: u8, delay: Duration) {
        self.add_task(payload, priority, Some(delay));
    }

    /// Enqueue a batch in order
    pub fn add_batch_tasks(&self, jobs: Vec<(JobPayload, u8)>) {
        for (payload, priority) in jobs {
            self.add_task(payload, priority, None);
        }
    }

    /// Wait for the next deliverable job; None once the queue is closed
    pub async fn next_job(&self) -> Option<LeasedJob> {
        loop {
            let next_ready = {
                let mut inner = self.inner.lock().expect("queue mutex poisoned");
                let now = Instant::now();

                // Promote due delayed jobs
                let mut i = 0;
                while i < inner.delayed.len() {
                    if inner.delayed[i].ready_at <= now {
                        let delayed = inner.delayed.swap_remove(i);
                        inner.heap.push(delayed.job);
                    } else {
                        i += 1;
                    }
                }

                if !inner.paused
                    && let Some(job) = inner.heap.pop()
                {
                    inner.active += 1;
                    return Some(LeasedJob {
                        payload: job.payload,
                        attempt: job.attempt,
                        priority: job.priority,
                    });
                }

                if inner.closed {
                    return None;
                }

                inner.delayed.iter().map(|d| d.ready_at).min()
            };

            // Re-check periodically; notifications cover the common path
            let tick = Duration::from_millis(500);
            match next_ready {
                Some(ready_at) => {
                    let sleep = ready_at.saturating_duration_since(Instant::now()).min(tick);
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(sleep) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(tick) => {}
                    }
                }
            }
        }
    }

    /// Ack a finished job
    pub fn complete_job(&self, job: LeasedJob) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.active = inner.active.saturating_sub(1);
        inner.completed += 1;
        inner.progress.remove(&job.payload.task_id);
    }

    /// Handler failed: redeliver with backoff, or drop at the attempt cap
    pub fn fail_job(&self, job: LeasedJob, error: &str) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.active = inner.active.saturating_sub(1);

        let next_attempt = job.attempt + 1;
        if next_attempt >= self.config.max_attempts || inner.closed {
            warn!(task_id = %job.payload.task_id, attempts = next_attempt, error, "job failed permanently");
            inner.failed += 1;
            inner.progress.remove(&job.payload.task_id);
            return;
        }

        let backoff = self.backoff(job.attempt);
        warn!(task_id = %job.payload.task_id, attempt = next_attempt, ?backoff, error, "job redelivery scheduled");
        inner.repeat += 1;
        inner.seq += 1;
        let seq = inner.seq;
        inner.delayed.push(DelayedJob {
            ready_at: Instant::now() + backoff,
            job: QueuedJob {
                payload: job.payload,
                priority: job.priority,
                seq,
                attempt: next_attempt,
            },
        });
        drop(inner);
        self.notify.notify_one();
    }

    /// Drop a job permanently, no redelivery
    pub fn discard_job(&self, job: LeasedJob) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.active = inner.active.saturating_sub(1);
        inner.failed += 1;
        inner.progress.remove(&job.payload.task_id);
    }

    pub fn get_stats(&self) -> QueueStats {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        QueueStats {
            waiting: inner.heap.len(),
            active: inner.active,
            completed: inner.completed,
            failed: inner.failed,
            delayed: inner.delayed.len(),
            repeat: inner.repeat,
        }
    }

    /// Stop deliveries; enqueues still accepted
    pub fn pause(&self) {
        self.inner.lock().expect("queue mutex poisoned").paused = true;
    }

    pub fn resume(&self) {
        self.inner.lock().expect("queue mutex poisoned").paused = false;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Remove every waiting and delayed job
    pub fn drain(&self) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        let dropped = inner.heap.len() + inner.delayed.len();
        inner.heap.clear();
        inner.delayed.clear();
        debug!(dropped, "queue drained");
    }

    /// Stop accepting and delivering; waiting consumers get None
    pub fn close(&self) {
        self.inner.lock().expect("queue mutex poisoned").closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Record coarse progress for observability
    pub fn report_progress(&self, task_id: &str, percentage: u8) {
        self.inner
            .lock()
            .expect("queue mutex poisoned")
            .progress
            .insert(task_id.to_string(), percentage.min(100));
    }

    pub fn progress(&self, task_id: &str) -> Option<u8> {
        self.inner.lock().expect("queue mutex poisoned").progress.get(task_id).copied()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_ms.max(1);
        let exp = base.saturating_mul(1u64 << attempt.min(16));
        let capped = exp.min(self.config.backoff_max_ms.max(base));
        let jitter = rand::rng().random_range(0..=capped / 4);
        Duration::from_millis(capped + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskstore::TaskMode;

    fn payload(task_id: &str) -> JobPayload {
        JobPayload {
            task_id: task_id.to_string(),
            mode: TaskMode::Async,
            topic: "AI".to_string(),
            requirements: "intro".to_string(),
            image_size: None,
            hard_constraints: None,
        }
    }

    fn queue() -> JobQueue {
        JobQueue::new(QueueConfig {
            max_attempts: 3,
            backoff_base_ms: 1,
            backoff_max_ms: 4,
        })
    }

    async fn pop(queue: &JobQueue) -> LeasedJob {
        tokio::time::timeout(Duration::from_secs(2), queue.next_job())
            .await
            .expect("queue pop timed out")
            .expect("queue closed unexpectedly")
    }

    #[tokio::test]
    async fn test_priority_before_fifo() {
        let q = queue();
        q.add_task(payload("normal-1"), 7, None);
        q.add_task(payload("urgent"), 1, None);
        q.add_task(payload("normal-2"), 7, None);

        assert_eq!(pop(&q).await.payload.task_id, "urgent");
        assert_eq!(pop(&q).await.payload.task_id, "normal-1");
        assert_eq!(pop(&q).await.payload.task_id, "normal-2");
    }

    #[tokio::test]
    async fn test_delayed_job_promotes_when_due() {
        let q = queue();
        q.add_delayed_task(payload("later"), 7, Duration::from_millis(30));
        q.add_task(payload("now"), 7, None);

        assert_eq!(pop(&q).await.payload.task_id, "now");
        assert_eq!(q.get_stats().delayed, 1);

        let leased = pop(&q).await;
        assert_eq!(leased.payload.task_id, "later");
        assert_eq!(q.get_stats().delayed, 0);
    }

    #[tokio::test]
    async fn test_failure_redelivers_with_attempt_bump() {
        let q = queue();
        q.add_task(payload("flaky"), 7, None);

        let first = pop(&q).await;
        assert_eq!(first.attempt, 0);
        q.fail_job(first, "boom");

        let second = pop(&q).await;
        assert_eq!(second.attempt, 1);
        assert_eq!(q.get_stats().repeat, 1);
        q.complete_job(second);

        let stats = q.get_stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_attempt_cap_drops_job() {
        let q = queue();
        q.add_task(payload("doomed"), 7, None);

        let mut leased = pop(&q).await;
        loop {
            let attempt = leased.attempt;
            q.fail_job(leased, "boom");
            if attempt + 1 >= 3 {
                break;
            }
            leased = pop(&q).await;
        }

        let stats = q.get_stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.delayed, 0);
    }

    #[tokio::test]
    async fn test_pause_holds_resume_releases() {
        let q = queue();
        q.pause();
        q.add_task(payload("held"), 7, None);

        assert!(tokio::time::timeout(Duration::from_millis(50), q.next_job()).await.is_err());

        q.resume();
        assert_eq!(pop(&q).await.payload.task_id, "held");
    }

    #[tokio::test]
    async fn test_close_returns_none() {
        let q = queue();
        q.close();
        assert!(q.next_job().await.is_none());

        // Enqueue after close is dropped
        q.add_task(payload("late"), 7, None);
        assert_eq!(q.get_stats().waiting, 0);
    }

    #[tokio::test]
    async fn test_drain_clears_pending_work() {
        let q = queue();
        q.add_task(payload("a"), 7, None);
        q.add_delayed_task(payload("b"), 7, Duration::from_secs(60));

        q.drain();
        let stats = q.get_stats();
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.delayed, 0);
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let q = queue();
        q.add_batch_tasks(vec![(payload("a"), 7), (payload("b"), 7)]);
        assert_eq!(pop(&q).await.payload.task_id, "a");
        assert_eq!(pop(&q).await.payload.task_id, "b");
    }

    #[tokio::test]
    async fn test_progress_tracking() {
        let q = queue();
        q.report_progress("t1", 50);
        assert_eq!(q.progress("t1"), Some(50));
        q.report_progress("t1", 150);
        assert_eq!(q.progress("t1"), Some(100));

        q.add_task(payload("t1"), 7, None);
        let leased = pop(&q).await;
        q.complete_job(leased);
        assert_eq!(q.progress("t1"), None);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let q = JobQueue::new(QueueConfig {
            max_attempts: 10,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
        });
        let first = q.backoff(0);
        let fifth = q.backoff(5);
        assert!(first >= Duration::from_millis(100));
        // Cap plus at most 25% jitter
        assert!(fifth <= Duration::from_millis(1_250));
    }
}

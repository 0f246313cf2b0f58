//! Worker pool
//!
//! Concurrent slots share one worker identity and a sliding-window rate
//! limiter on job starts. A slot claims its task before touching it; a
//! failed claim means another worker (or a cancellation) got there first
//! and the delivery is acked silently. Graceful shutdown lets active jobs
//! finish, then closes the queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use taskstore::{ResultStore, TaskStore};

use crate::executor::finish_run;
use crate::queue::{JobQueue, LeasedJob};
use crate::workflow::{ProgressCallback, ProgressUpdate, WorkflowEngine, WorkflowState};

/// Sliding-window cap on job starts per second
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn per_second(max_per_second: u32) -> Self {
        Self {
            max_per_window: max_per_second.max(1),
            window: Duration::from_secs(1),
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a start slot is free, then take it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut starts = self.starts.lock().await;
                let now = Instant::now();
                while starts.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
                    starts.pop_front();
                }
                if starts.len() < self.max_per_window as usize {
                    starts.push_back(now);
                    return;
                }
                // Oldest entry leaving the window frees a slot
                self.window - now.duration_since(*starts.front().expect("non-empty"))
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// A pool of concurrent job slots under one worker identity
pub struct WorkerPool {
    worker_id: String,
    concurrency: usize,
    limiter: RateLimiter,
    queue: Arc<JobQueue>,
    store: Arc<dyn TaskStore>,
    results: Arc<dyn ResultStore>,
    engine: Arc<WorkflowEngine>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn new(
        concurrency: usize,
        rate_limit_per_sec: u32,
        queue: Arc<JobQueue>,
        store: Arc<dyn TaskStore>,
        results: Arc<dyn ResultStore>,
        engine: Arc<WorkflowEngine>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::now_v7()),
            concurrency: concurrency.max(1),
            limiter: RateLimiter::per_second(rate_limit_per_sec),
            queue,
            store,
            results,
            engine,
            shutdown_tx,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Signal shutdown: active jobs drain, then slots exit
    pub fn shutdown(&self) {
        info!(worker_id = %self.worker_id, "worker shutdown requested");
        let _ = self.shutdown_tx.send(true);
        self.queue.close();
    }

    /// Run all slots until shutdown
    pub async fn run(self: Arc<Self>) {
        info!(worker_id = %self.worker_id, concurrency = self.concurrency, "worker pool starting");
        let mut slots = JoinSet::new();
        for slot in 0..self.concurrency {
            let pool = self.clone();
            slots.spawn(async move { pool.run_slot(slot).await });
        }
        while slots.join_next().await.is_some() {}
        info!(worker_id = %self.worker_id, "worker pool stopped");
    }

    async fn run_slot(&self, slot: usize) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        debug!(worker_id = %self.worker_id, slot, "slot started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            self.limiter.acquire().await;

            let job = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                job = self.queue.next_job() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            self.process(job).await;
        }
        debug!(worker_id = %self.worker_id, slot, "slot stopped");
    }

    /// One delivery: claim, restore, run, persist, ack
    async fn process(&self, job: LeasedJob) {
        let task_id = job.payload.task_id.clone();

        let task = match self.store.find_by_id(&task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(task_id, "task row missing, discarding job");
                self.queue.discard_job(job);
                return;
            }
            Err(e) => {
                warn!(task_id, error = %e, "store unavailable, redelivering");
                self.queue.fail_job(job, &e.to_string());
                return;
            }
        };

        match self.store.claim_task(&task_id, &self.worker_id, task.version).await {
            Ok(true) => {}
            Ok(false) => {
                // Claimed elsewhere or cancelled before dispatch; ack and move on
                debug!(task_id, "claim refused, acking silently");
                self.queue.complete_job(job);
                return;
            }
            Err(e) => {
                warn!(task_id, error = %e, "claim errored, redelivering");
                self.queue.fail_job(job, &e.to_string());
                return;
            }
        }
        self.queue.report_progress(&task_id, 10);

        // Rebuild state from the claimed row plus any checkpoint
        let claimed = match self.store.find_by_id(&task_id).await {
            Ok(Some(task)) => task,
            _ => {
                warn!(task_id, "task vanished after claim, discarding");
                self.queue.discard_job(job);
                return;
            }
        };
        let initial = WorkflowState::from_task(&claimed);
        let state = self.engine.checkpoints().restore_state(&task_id, initial).await;

        let progress: ProgressCallback = {
            let queue = self.queue.clone();
            let task_id = task_id.clone();
            Arc::new(move |update: ProgressUpdate| {
                queue.report_progress(&task_id, update.percentage);
            })
        };

        let outcome = match self.engine.run(&task_id, state, Some(&progress)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Infrastructure failure: park the task and let the queue retry
                warn!(task_id, error = %e, "engine errored, releasing task");
                self.release(&task_id).await;
                self.queue.fail_job(job, &e.to_string());
                return;
            }
        };

        match finish_run(&self.store, &self.results, &task_id, outcome).await {
            Ok(Some((status, state))) => {
                self.engine.checkpoints().forget(&task_id).await;
                if status == taskstore::TaskStatus::Failed {
                    let error = state.error.unwrap_or_else(|| "workflow failed".to_string());
                    self.queue.fail_job(job, &error);
                } else {
                    self.queue.report_progress(&task_id, 100);
                    self.queue.complete_job(job);
                }
            }
            Ok(None) => {
                debug!(task_id, "run abandoned to another worker, acking");
                self.queue.complete_job(job);
            }
            Err(e) => {
                warn!(task_id, error = %e, "persisting outcome failed, redelivering");
                self.queue.fail_job(job, &e.to_string());
            }
        }
    }

    async fn release(&self, task_id: &str) {
        for _ in 0..3 {
            match self.store.find_by_id(task_id).await {
                Ok(Some(task)) => {
                    match self.store.release_worker(task_id, &self.worker_id, task.version).await {
                        Ok(true) => return,
                        Ok(false) if task.worker_id.as_deref() != Some(&self.worker_id) => return,
                        Ok(false) => continue,
                        Err(e) => {
                            warn!(task_id, error = %e, "release failed");
                            return;
                        }
                    }
                }
                _ => return,
            }
        }
    }
}

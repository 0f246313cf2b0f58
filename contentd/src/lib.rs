//! contentd - AI content-creation task orchestrator
//!
//! Users submit a request (topic, requirements, constraints) and the system
//! drives a multi-stage pipeline - search, organize, write, quality check,
//! image generation, image check, post-process - producing an article with
//! embedded images. External services run under per-stage timeouts and
//! quality gates with bounded rewrite retries.
//!
//! # Core pieces
//!
//! - [`workflow`] - typed state machine with per-node timeouts, pure
//!   routing on gate verdicts, and a checkpoint after every node
//! - [`taskstore`] (sibling crate) - task lifecycle rows under an
//!   optimistic-lock protocol; the only concurrent-mutation surface
//! - [`queue`] + [`worker`] - at-least-once delivery into a claim-first
//!   worker pool
//! - [`executor`] - the inline path for low-latency sync requests
//! - [`quality`] - deterministic hard rules plus LLM soft scoring
//! - [`services`] - uniform LLM / search / image adapter contracts

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod executor;
pub mod quality;
pub mod queue;
pub mod scheduler;
pub mod services;
pub mod worker;
pub mod workflow;

// Re-export commonly used types
pub use config::Config;
pub use domain::{CreateTaskRequest, ImageSize, JobPayload};
pub use executor::{ExecuteError, ExecutionResult, SyncExecutor};
pub use quality::{Evaluator, QualityGate, QualityReport};
pub use queue::{JobQueue, QueueStats};
pub use scheduler::{ScheduleError, Scheduler};
pub use services::Services;
pub use worker::WorkerPool;
pub use workflow::{
    RetryPolicy, RunOutcome, Workflow, WorkflowEngine, WorkflowError, WorkflowState, article_workflow,
};

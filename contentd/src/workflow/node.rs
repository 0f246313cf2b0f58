//! Workflow node contract

use async_trait::async_trait;
use std::time::Duration;

use super::error::WorkflowError;
use super::state::{StatePatch, WorkflowState};

/// A named step in the workflow
///
/// Bodies request asynchronous work only at external-service calls; state
/// mutation happens in the engine when the returned patch is merged.
#[async_trait]
pub trait WorkflowNode: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deadline for one execution attempt
    fn timeout(&self) -> Duration;

    /// Extra attempts the engine grants transparently. These never consume
    /// the task's rewrite retry budget.
    fn transparent_retries(&self) -> u32 {
        0
    }

    async fn execute(&self, state: &WorkflowState) -> Result<StatePatch, WorkflowError>;
}

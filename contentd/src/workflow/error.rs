//! Workflow error types

use std::time::Duration;
use thiserror::Error;

use taskstore::StoreError;

/// Errors raised while driving a workflow
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("node {node} timed out after {timeout:?}")]
    NodeTimeout { node: &'static str, timeout: Duration },

    #[error("node {node} failed: {message}")]
    NodeFailed { node: &'static str, message: String },

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("unknown workflow node: {0}")]
    UnknownNode(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("snapshot serialization: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl WorkflowError {
    pub fn node(node: &'static str, message: impl std::fmt::Display) -> Self {
        Self::NodeFailed {
            node,
            message: message.to_string(),
        }
    }
}

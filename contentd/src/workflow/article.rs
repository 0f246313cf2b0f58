//! The article-creation workflow: node wiring and routing

use std::sync::Arc;
use tracing::warn;

use super::engine::{RetryPolicy, Route, Workflow};
use super::nodes::{
    CHECK_IMAGE, CHECK_TEXT, CheckImageNode, CheckTextNode, GENERATE_IMAGE, GenerateImageNode, ORGANIZE, OrganizeNode,
    POST_PROCESS, PostProcessNode, SEARCH, SearchNode, WRITE, WriteNode,
};
use super::state::WorkflowState;
use crate::config::Config;
use crate::quality::QualityGate;
use crate::services::Services;

/// Wire the canonical article pipeline
pub fn article_workflow(services: &Services, gate: Arc<QualityGate>, config: &Config) -> Workflow {
    Workflow::new(SEARCH, route, progress_for)
        .add_node(Arc::new(SearchNode::new(services.search.clone(), config.search.max_results)))
        .add_node(Arc::new(OrganizeNode::new(services.llm.clone())))
        .add_node(Arc::new(WriteNode::new(services.llm.clone())))
        .add_node(Arc::new(CheckTextNode::new(gate.clone())))
        .add_node(Arc::new(GenerateImageNode::new(
            services.image.clone(),
            config.image.download_dir.clone(),
        )))
        .add_node(Arc::new(CheckImageNode::new(gate)))
        .add_node(Arc::new(PostProcessNode))
}

/// Coarse completion percentage per step, reported at node entry
pub fn progress_for(step: &str) -> u8 {
    match step {
        SEARCH => 10,
        ORGANIZE => 20,
        WRITE => 50,
        CHECK_TEXT => 60,
        GENERATE_IMAGE => 70,
        CHECK_IMAGE => 80,
        POST_PROCESS => 90,
        _ => 0,
    }
}

/// Pure routing over state: which node follows the last completed step
pub fn route(state: &WorkflowState, policy: &RetryPolicy) -> Route {
    match state.current_step.as_deref() {
        None => Route::Next(SEARCH),
        Some(SEARCH) => Route::Next(ORGANIZE),
        Some(ORGANIZE) => Route::Next(WRITE),
        Some(WRITE) => Route::Next(CHECK_TEXT),
        Some(CHECK_TEXT) => route_text(state, policy),
        Some(GENERATE_IMAGE) => Route::Next(CHECK_IMAGE),
        Some(CHECK_IMAGE) => route_image(state, policy),
        Some(POST_PROCESS) => Route::Done,
        Some(other) => Route::Fail(format!("unknown workflow step: {}", other)),
    }
}

fn route_text(state: &WorkflowState, policy: &RetryPolicy) -> Route {
    let Some(report) = &state.text_quality_report else {
        return Route::Fail("text check completed without a report".to_string());
    };
    if report.passed {
        return Route::Next(GENERATE_IMAGE);
    }
    if state.text_retry_count < policy.max_text_retries {
        return Route::Next(WRITE);
    }
    if policy.force_pass_on_exhaustion {
        warn!(task_id = %state.task_id, "text retry budget exhausted, forced past the gate");
        return Route::Next(GENERATE_IMAGE);
    }
    Route::Fail(format!(
        "text quality check failed after {} rewrites (score {:.1}): {}",
        state.text_retry_count,
        report.score,
        report.fix_suggestions.join("; ")
    ))
}

fn route_image(state: &WorkflowState, policy: &RetryPolicy) -> Route {
    let Some(report) = &state.image_quality_report else {
        return Route::Fail("image check completed without a report".to_string());
    };
    if report.passed {
        return Route::Next(POST_PROCESS);
    }
    if state.image_retry_count < policy.max_image_retries {
        return Route::Next(GENERATE_IMAGE);
    }
    if policy.force_pass_on_exhaustion {
        warn!(task_id = %state.task_id, "image retry budget exhausted, forced past the gate");
        return Route::Next(POST_PROCESS);
    }
    Route::Fail(format!(
        "image quality check failed after {} regenerations (score {:.1})",
        state.image_retry_count, report.score
    ))
}

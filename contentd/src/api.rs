//! Minimal HTTP API surface
//!
//! `{success, data}` envelopes on the happy path, `{success:false,
//! error:{message}}` with a matching status code otherwise. Sync creates
//! run inline and return the article; async creates return the task id
//! for polling.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use taskstore::{ResultStore, ResultType, TaskMode, TaskStore};

use crate::domain::CreateTaskRequest;
use crate::executor::SyncExecutor;
use crate::scheduler::{ScheduleError, Scheduler};

/// Shared handler state
pub struct ApiState {
    pub executor: Arc<SyncExecutor>,
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<dyn TaskStore>,
    pub results: Arc<dyn ResultStore>,
}

/// Build the API router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/content/create", post(create_content))
        .route("/api/v1/tasks/{task_id}", get(get_task))
        .with_state(state)
}

/// Serve the API on the given listener until the process exits
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<ApiState>) -> eyre::Result<()> {
    info!(addr = %listener.local_addr()?, "http api listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn ok(data: serde_json::Value) -> ApiResponse {
    (StatusCode::OK, Json(serde_json::json!({ "success": true, "data": data })))
}

fn fail(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": { "message": message.into() } })),
    )
}

fn rfc3339(millis: i64) -> Option<String> {
    chrono::DateTime::from_timestamp_millis(millis).map(|t| t.to_rfc3339())
}

async fn health() -> ApiResponse {
    ok(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
struct CreateContentBody {
    topic: Option<String>,
    requirements: Option<String>,
    target_audience: Option<String>,
    tone: Option<String>,
    mode: Option<TaskMode>,
}

async fn create_content(State(state): State<Arc<ApiState>>, Json(body): Json<CreateContentBody>) -> ApiResponse {
    let Some(topic) = body.topic.filter(|t| !t.trim().is_empty()) else {
        return fail(StatusCode::BAD_REQUEST, "topic is required");
    };

    let mode = body.mode.unwrap_or(TaskMode::Sync);
    let request = CreateTaskRequest {
        requirements: body.requirements.unwrap_or_else(|| format!("Write an article about {}", topic)),
        topic,
        target_audience: body.target_audience,
        tone: body.tone,
        mode,
        ..Default::default()
    };

    if mode == TaskMode::Async {
        return match state.scheduler.schedule_task(request).await {
            Ok(task_id) => ok(serde_json::json!({ "task_id": task_id, "status": "pending" })),
            Err(ScheduleError::Validation(message)) => fail(StatusCode::BAD_REQUEST, message),
            Err(e) => {
                error!(error = %e, "async create failed");
                fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
    }

    let topic = request.topic.clone();
    match state.executor.execute(request, None).await {
        Ok(result) => {
            let content = result
                .final_state
                .final_article_content
                .clone()
                .or_else(|| result.final_state.article_content.clone())
                .unwrap_or_default();
            ok(serde_json::json!({
                "task_id": result.task_id,
                "content": content,
                "html_content": markdown_to_html(&content),
                "images": result.final_state.images,
                "metadata": {
                    "topic": topic,
                    "word_count": crate::quality::count_words(&content).0,
                    "steps_completed": result.metadata.steps_completed,
                    "tokens_used": result.metadata.tokens_used,
                    "cost": result.metadata.cost,
                    "duration": result.duration_ms,
                },
            }))
        }
        Err(crate::executor::ExecuteError::Validation(message)) => fail(StatusCode::BAD_REQUEST, message),
        Err(e) => {
            error!(error = %e, "sync create failed");
            fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn get_task(State(state): State<Arc<ApiState>>, Path(task_id): Path<String>) -> ApiResponse {
    let task = match state.store.find_by_id(&task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => return fail(StatusCode::NOT_FOUND, format!("task not found: {}", task_id)),
        Err(e) => return fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let rows = match state.results.find_results_by_task_id(&task_id).await {
        Ok(rows) => rows,
        Err(e) => return fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let final_row = rows.iter().find(|r| r.result_type == ResultType::FinalArticle);
    let article_row = rows.iter().find(|r| r.result_type == ResultType::Article);
    let content = final_row.or(article_row).and_then(|r| r.content.clone());
    let images: Vec<serde_json::Value> = rows
        .iter()
        .filter(|r| r.result_type == ResultType::Image)
        .map(|r| {
            serde_json::json!({
                "url": r.content,
                "local_path": r.file_path,
                "metadata": r.metadata,
            })
        })
        .collect();

    ok(serde_json::json!({
        "task_id": task.id,
        "status": task.status.to_string(),
        "topic": task.topic,
        "result": {
            "content": content,
            "images": images,
            "metadata": final_row.and_then(|r| r.metadata.clone()),
        },
        "error": task.error_message,
        "created_at": rfc3339(task.created_at),
        "updated_at": rfc3339(task.updated_at),
        "completed_at": task.completed_at.and_then(rfc3339),
    }))
}

/// Render article markdown for HTML consumers
pub fn markdown_to_html(markdown: &str) -> String {
    let parser = pulldown_cmark::Parser::new(markdown);
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

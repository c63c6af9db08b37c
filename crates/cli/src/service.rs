//! HTTP service wrapper: a thin axum shell over the orchestrator for
//! benchmark harnesses. Tasks run in background workers; the registry
//! keeps status, result, and a cancel handle per task.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use mf_domain::config::RunConfig;
use mf_domain::trace::TaskStatus;
use mf_orchestrator::{CancelToken, Orchestrator, RunOutcome};

#[derive(Clone)]
struct AppState {
    config: RunConfig,
    log_dir: PathBuf,
    tasks: Arc<RwLock<HashMap<String, TaskEntry>>>,
}

#[derive(Clone)]
struct TaskEntry {
    status: TaskStatus,
    cancel: CancelToken,
    outcome: Option<Arc<RunOutcome>>,
}

#[derive(Deserialize)]
struct SubmitRequest {
    task: String,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Serialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Serialize)]
struct TaskView {
    task_id: String,
    status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    boxed_answer: Option<String>,
}

pub async fn serve(addr: &str, config: RunConfig, log_dir: PathBuf) -> Result<()> {
    let state = AppState {
        config,
        log_dir,
        tasks: Arc::new(RwLock::new(HashMap::new())),
    };

    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/v1/tasks", post(submit_task))
        .route("/v1/tasks/:id", get(get_task))
        .route("/v1/tasks/:id/cancel", post(cancel_task))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "miroflow service listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn submit_task(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, (StatusCode, String)> {
    let task_id = req
        .task_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if state.tasks.read().contains_key(&task_id) {
        return Err((
            StatusCode::CONFLICT,
            format!("task '{task_id}' already exists"),
        ));
    }

    let trace_path = state.log_dir.join(format!("{task_id}.json"));
    let mut orchestrator =
        Orchestrator::from_config(state.config.clone(), task_id.as_str(), Some(trace_path))
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let cancel = orchestrator.cancel_token();

    state.tasks.write().insert(
        task_id.clone(),
        TaskEntry {
            status: TaskStatus::Running,
            cancel,
            outcome: None,
        },
    );

    let tasks = state.tasks.clone();
    let id = task_id.clone();
    tokio::spawn(async move {
        let outcome = orchestrator.run_task(&req.task, req.file_path.as_deref()).await;
        let mut registry = tasks.write();
        if let Some(entry) = registry.get_mut(&id) {
            entry.status = outcome.trajectory.status;
            entry.outcome = Some(Arc::new(outcome));
        }
    });

    Ok(Json(SubmitResponse { task_id }))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskView>, StatusCode> {
    let tasks = state.tasks.read();
    let entry = tasks.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(TaskView {
        task_id: id,
        status: entry.status,
        final_summary: entry.outcome.as_ref().map(|o| o.final_summary.clone()),
        boxed_answer: entry.outcome.as_ref().map(|o| o.boxed_answer.clone()),
    }))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let tasks = state.tasks.read();
    let entry = tasks.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    entry.cancel.cancel();
    Ok(StatusCode::ACCEPTED)
}

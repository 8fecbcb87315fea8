//! Removal task API endpoints
//!
//! Tasks are created, approved and edited here; the reconciler picks up every
//! change on its next cycle.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::info;

use crate::{
    db::TaskRepository,
    models::{CreateTaskRequest, NodeCleanupSpec, RemovalTask, TaskPhase, UpdateNodesRequest},
    utils::{
        validation::{validate_device_name, validate_node_name, validate_task_name},
        AppError, AppResult,
    },
    AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/{name}", get(get_task).delete(delete_task))
        .route("/{name}/nodes", put(update_nodes))
        .route("/{name}/approve", post(approve_task))
        .route("/{name}/resolve", post(resolve_task))
}

fn validate_nodes(nodes: &BTreeMap<String, NodeCleanupSpec>) -> AppResult<()> {
    for (node, spec) in nodes {
        if !validate_node_name(node) {
            return Err(AppError::ValidationError(format!(
                "invalid node name '{}'",
                node
            )));
        }
        if let Some(device) = spec
            .cleanup_by_device
            .iter()
            .find(|d| !validate_device_name(&d.device))
        {
            return Err(AppError::ValidationError(format!(
                "invalid device '{}' for node '{}'",
                device.device, node
            )));
        }
    }
    Ok(())
}

async fn load_task(repo: &TaskRepository, name: &str) -> AppResult<RemovalTask> {
    repo.get(name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("task '{}' not found", name)))
}

/// List all tasks, oldest first
async fn list_tasks(State(state): State<AppState>) -> AppResult<Json<Vec<RemovalTask>>> {
    let repo = TaskRepository::new(state.db.clone());
    Ok(Json(repo.list().await?))
}

async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> AppResult<(StatusCode, Json<RemovalTask>)> {
    if !validate_task_name(&request.name) {
        return Err(AppError::ValidationError(format!(
            "invalid task name '{}'",
            request.name
        )));
    }
    validate_nodes(&request.spec.nodes)?;

    let repo = TaskRepository::new(state.db.clone());
    if repo.exists(&request.name).await? {
        return Err(AppError::Conflict(format!(
            "task '{}' already exists",
            request.name
        )));
    }
    let task = repo.create(&request.name, &request.spec).await?;
    info!("task '{}' created", task.name);
    state.reconcile_wake.notify_one();

    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<RemovalTask>> {
    let repo = TaskRepository::new(state.db.clone());
    Ok(Json(load_task(&repo, &name).await?))
}

/// Replace the nodes section of a task
async fn update_nodes(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<UpdateNodesRequest>,
) -> AppResult<Json<RemovalTask>> {
    validate_nodes(&request.nodes)?;

    let repo = TaskRepository::new(state.db.clone());
    let mut task = load_task(&repo, &name).await?;
    task.spec.nodes = request.nodes;
    repo.update_spec(&name, &task.spec).await?;
    info!("task '{}' nodes updated", name);
    state.reconcile_wake.notify_one();

    Ok(Json(load_task(&repo, &name).await?))
}

async fn approve_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<RemovalTask>> {
    let repo = TaskRepository::new(state.db.clone());
    let mut task = load_task(&repo, &name).await?;
    if !task.is_active() {
        return Err(AppError::Conflict(format!(
            "task '{}' is already finished",
            name
        )));
    }
    if !task.spec.approve {
        task.spec.approve = true;
        repo.update_spec(&name, &task.spec).await?;
        info!("task '{}' approved", name);
        state.reconcile_wake.notify_one();
    }

    Ok(Json(load_task(&repo, &name).await?))
}

/// Acknowledge a failed task
async fn resolve_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<RemovalTask>> {
    let repo = TaskRepository::new(state.db.clone());
    let mut task = load_task(&repo, &name).await?;
    if task.phase() != Some(TaskPhase::Failed) {
        return Err(AppError::Conflict(format!(
            "task '{}' is not failed, nothing to resolve",
            name
        )));
    }
    task.spec.resolved = true;
    repo.update_spec(&name, &task.spec).await?;
    info!("task '{}' marked as resolved", name);
    state.reconcile_wake.notify_one();

    Ok(Json(load_task(&repo, &name).await?))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<StatusCode> {
    let repo = TaskRepository::new(state.db.clone());
    if !repo.delete(&name).await? {
        return Err(AppError::NotFound(format!("task '{}' not found", name)));
    }
    info!("task '{}' deleted", name);
    state.reconcile_wake.notify_one();
    Ok(StatusCode::NO_CONTENT)
}

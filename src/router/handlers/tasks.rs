//! Task queue handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::database::{DatabaseError, TaskRecord, TaskStatus};
use crate::error::{ApiError, InvalidInputKind, Result};
use crate::router::AppState;

fn map_db(e: DatabaseError) -> ApiError {
    match e {
        DatabaseError::NotFound(message) => ApiError::NotFound(message),
        DatabaseError::InvalidTransition(message) => {
            ApiError::invalid(InvalidInputKind::Other, message)
        }
        other => ApiError::Internal(other.to_string()),
    }
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskRecord>,
    pub count: usize,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<TaskListResponse>> {
    state.orchestrator.get(&container_id).await?;
    let conn = state.db.conn().await;
    let tasks = state.db.tasks.list(&conn, &container_id).map_err(map_db)?;
    let count = tasks.len();
    Ok(Json(TaskListResponse { tasks, count }))
}

#[derive(Debug, Deserialize)]
pub struct AddTaskRequest {
    pub text: String,
}

pub async fn add_task(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
    Json(request): Json<AddTaskRequest>,
) -> Result<(StatusCode, Json<TaskRecord>)> {
    if request.text.trim().is_empty() {
        return Err(ApiError::invalid(
            InvalidInputKind::Other,
            "task text must not be empty",
        ));
    }

    state.orchestrator.get(&container_id).await?;
    let id = uuid::Uuid::new_v4().to_string();
    let conn = state.db.conn().await;
    let task = state
        .db
        .tasks
        .add(&conn, &container_id, &id, request.text.trim())
        .map_err(map_db)?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn next_pending(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<Option<TaskRecord>>> {
    state.orchestrator.get(&container_id).await?;
    let conn = state.db.conn().await;
    Ok(Json(
        state
            .db
            .tasks
            .next_pending(&conn, &container_id)
            .map_err(map_db)?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn update_task(
    State(state): State<AppState>,
    Path((container_id, task_id)): Path<(String, String)>,
    Json(request): Json<UpdateTaskRequest>,
) -> Result<Json<TaskRecord>> {
    state.orchestrator.get(&container_id).await?;
    let conn = state.db.conn().await;

    let existing = state
        .db
        .tasks
        .get(&conn, &task_id)
        .map_err(map_db)?
        .filter(|task| task.container_id == container_id)
        .ok_or_else(|| ApiError::NotFound(format!("task {}", task_id)))?;

    if let Some(text) = &request.text {
        state
            .db
            .tasks
            .update_text(&conn, &existing.id, text.trim())
            .map_err(map_db)?;
    }

    if let Some(status) = &request.status {
        let status = TaskStatus::parse(status).ok_or_else(|| {
            ApiError::invalid(
                InvalidInputKind::Other,
                format!("unknown task status {:?}", status),
            )
        })?;
        state
            .db
            .tasks
            .transition(&conn, &existing.id, status)
            .map_err(map_db)?;
    }

    state
        .db
        .tasks
        .get(&conn, &task_id)
        .map_err(map_db)?
        .ok_or_else(|| ApiError::NotFound(format!("task {}", task_id)))
        .map(Json)
}

pub async fn remove_task(
    State(state): State<AppState>,
    Path((container_id, task_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.orchestrator.get(&container_id).await?;
    let conn = state.db.conn().await;
    let removed = state
        .db
        .tasks
        .remove(&conn, &container_id, &task_id)
        .map_err(map_db)?;
    if !removed {
        return Err(ApiError::NotFound(format!("task {}", task_id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub task_ids: Vec<String>,
}

pub async fn reorder_tasks(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
    Json(request): Json<ReorderRequest>,
) -> Result<Json<TaskListResponse>> {
    state.orchestrator.get(&container_id).await?;
    let mut conn = state.db.conn().await;

    state
        .db
        .tasks
        .reorder(&mut conn, &container_id, &request.task_ids)
        .map_err(|e| match e {
            DatabaseError::Other(message) => ApiError::invalid(InvalidInputKind::Other, message),
            other => map_db(other),
        })?;

    let tasks = state.db.tasks.list(&conn, &container_id).map_err(map_db)?;
    let count = tasks.len();
    Ok(Json(TaskListResponse { tasks, count }))
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: usize,
}

pub async fn clear_tasks(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<ClearResponse>> {
    state.orchestrator.get(&container_id).await?;
    let conn = state.db.conn().await;
    let removed = state.db.tasks.clear(&conn, &container_id).map_err(map_db)?;
    Ok(Json(ClearResponse { removed }))
}

pub async fn clear_completed(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<ClearResponse>> {
    state.orchestrator.get(&container_id).await?;
    let conn = state.db.conn().await;
    let removed = state
        .db
        .tasks
        .clear_completed(&conn, &container_id)
        .map_err(map_db)?;
    Ok(Json(ClearResponse { removed }))
}

pub async fn complete_current(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<Option<TaskRecord>>> {
    state.orchestrator.get(&container_id).await?;
    let conn = state.db.conn().await;

    let Some(current) = state
        .db
        .tasks
        .current(&conn, &container_id)
        .map_err(map_db)?
    else {
        return Ok(Json(None));
    };

    let task = state
        .db
        .tasks
        .transition(&conn, &current.id, TaskStatus::Completed)
        .map_err(map_db)?;
    Ok(Json(Some(task)))
}

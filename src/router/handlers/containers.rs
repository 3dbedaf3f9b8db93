//! Container lifecycle handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::database::{ContainerRecord, InitLogEntry};
use crate::docker::ContainerStats;
use crate::error::{ApiError, Result};
use crate::orchestrator::CreateContainerSpec;
use crate::pty::SessionInfo;
use crate::router::AppState;

pub async fn list_containers(
    State(state): State<AppState>,
) -> Result<Json<Vec<ContainerRecord>>> {
    Ok(Json(state.orchestrator.list().await?))
}

pub async fn create_container(
    State(state): State<AppState>,
    Json(spec): Json<CreateContainerSpec>,
) -> Result<(StatusCode, Json<ContainerRecord>)> {
    let record = state.orchestrator.create(spec).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn get_container(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<ContainerRecord>> {
    Ok(Json(state.orchestrator.get(&container_id).await?))
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub container_id: String,
    pub action: String,
    pub success: bool,
}

pub async fn start_container(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<ActionResponse>> {
    state.orchestrator.start(&container_id).await?;
    Ok(Json(ActionResponse {
        container_id,
        action: "start".into(),
        success: true,
    }))
}

pub async fn stop_container(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<ActionResponse>> {
    state.orchestrator.stop(&container_id).await?;
    Ok(Json(ActionResponse {
        container_id,
        action: "stop".into(),
        success: true,
    }))
}

pub async fn delete_container(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<ActionResponse>> {
    state.orchestrator.remove(&container_id).await?;
    Ok(Json(ActionResponse {
        container_id,
        action: "remove".into(),
        success: true,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub argv: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecResponse {
    pub exit_code: i64,
    pub output: String,
}

pub async fn exec_container(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
    Json(request): Json<ExecRequest>,
) -> Result<Json<ExecResponse>> {
    let output = state.orchestrator.exec(&container_id, request.argv).await?;
    Ok(Json(ExecResponse {
        exit_code: output.exit_code,
        output: output.output,
    }))
}

pub async fn init_logs(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<Vec<InitLogEntry>>> {
    state.orchestrator.get(&container_id).await?;
    let conn = state.db.conn().await;
    Ok(Json(state.db.init_logs.list(&conn, &container_id)?))
}

pub async fn container_stats(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<ContainerStats>> {
    let record = state.orchestrator.get(&container_id).await?;
    let docker_id = record
        .docker_id
        .ok_or_else(|| ApiError::PreconditionFailed("container has no engine container".into()))?;
    Ok(Json(state.docker.container_stats(&docker_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub output: String,
}

pub async fn container_logs(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>> {
    let record = state.orchestrator.get(&container_id).await?;
    let docker_id = record
        .docker_id
        .ok_or_else(|| ApiError::PreconditionFailed("container has no engine container".into()))?;
    let output = state
        .docker
        .container_logs(&docker_id, query.tail.unwrap_or(100))
        .await?;
    Ok(Json(LogsResponse { output }))
}

pub async fn terminal_sessions(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<Vec<SessionInfo>>> {
    state.orchestrator.get(&container_id).await?;
    Ok(Json(state.pty.list_for_container(&container_id)))
}

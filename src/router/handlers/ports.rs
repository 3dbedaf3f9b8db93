//! Published-port handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::database::PortRecord;
use crate::error::Result;
use crate::router::AppState;

pub async fn list_ports(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<Vec<PortRecord>>> {
    Ok(Json(state.orchestrator.list_ports(&container_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct AddPortRequest {
    pub port: u16,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

pub async fn add_port(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
    Json(request): Json<AddPortRequest>,
) -> Result<(StatusCode, Json<PortRecord>)> {
    let record = state
        .orchestrator
        .add_port(&container_id, request.port, request.name, request.protocol)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn remove_port(
    State(state): State<AppState>,
    Path((container_id, port)): Path<(String, u16)>,
) -> Result<StatusCode> {
    state.orchestrator.remove_port(&container_id, port).await?;
    Ok(StatusCode::NO_CONTENT)
}

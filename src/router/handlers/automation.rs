//! Automation log handlers

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::database::{AutomationLogEntry, AutomationLogFilter};
use crate::error::Result;
use crate::router::AppState;

const MAX_PER_PAGE: usize = 200;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default)]
    pub until: Option<i64>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub per_page: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub entries: Vec<AutomationLogEntry>,
    pub page: usize,
    pub per_page: usize,
}

pub async fn query_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>> {
    let filter = AutomationLogFilter {
        container_id: query.container,
        session_id: query.session,
        strategy: query.strategy,
        since: query.since,
        until: query.until,
    };
    let page = query.page.unwrap_or(0);
    let per_page = query.per_page.unwrap_or(50).min(MAX_PER_PAGE).max(1);

    let conn = state.db.conn().await;
    let entries = state.db.automation_logs.query(&conn, &filter, page, per_page)?;
    Ok(Json(LogsResponse {
        entries,
        page,
        per_page,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    #[serde(default)]
    pub retention_days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub deleted: usize,
}

pub async fn cleanup_logs(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<CleanupResponse>> {
    let retention_days = query.retention_days.unwrap_or(30).max(0);
    let cutoff = chrono::Utc::now().timestamp() - retention_days * 24 * 3600;

    let conn = state.db.conn().await;
    let deleted = state.db.automation_logs.cleanup(&conn, cutoff)?;
    Ok(Json(CleanupResponse { deleted }))
}

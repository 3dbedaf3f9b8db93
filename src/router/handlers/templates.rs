//! Config template handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::database::{TemplateRecord, TemplateType};
use crate::error::{ApiError, InvalidInputKind, Result};
use crate::router::AppState;
use crate::templates::validate_template;

pub async fn list_templates(
    State(state): State<AppState>,
) -> Result<Json<Vec<TemplateRecord>>> {
    let conn = state.db.conn().await;
    Ok(Json(state.db.templates.all(&conn)?))
}

#[derive(Debug, Deserialize)]
pub struct TemplateRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub template_type: String,
    pub content: String,
    #[serde(default)]
    pub archive: Option<String>,
}

fn parse_request(request: &TemplateRequest) -> Result<TemplateType> {
    let template_type = TemplateType::parse(&request.template_type).ok_or_else(|| {
        ApiError::invalid(
            InvalidInputKind::Other,
            format!("unknown template type {:?}", request.template_type),
        )
    })?;

    if request.name.trim().is_empty()
        || request
            .name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
    {
        return Err(ApiError::invalid(
            InvalidInputKind::Other,
            "template name must be non-empty alphanumeric, dash, or underscore",
        ));
    }

    validate_template(template_type, &request.content)?;
    Ok(template_type)
}

pub async fn create_template(
    State(state): State<AppState>,
    Json(request): Json<TemplateRequest>,
) -> Result<(StatusCode, Json<TemplateRecord>)> {
    let template_type = parse_request(&request)?;

    let record = TemplateRecord {
        id: uuid::Uuid::new_v4().to_string(),
        name: request.name.trim().to_string(),
        template_type,
        content: request.content,
        archive: request.archive,
        created_at: 0,
        updated_at: 0,
    };

    let conn = state.db.conn().await;
    state.db.templates.insert(&conn, &record).map_err(|e| match e {
        crate::database::DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            ApiError::AlreadyExists(format!(
                "template {} of type {}",
                record.name, record.template_type
            ))
        }
        other => ApiError::Internal(other.to_string()),
    })?;

    let stored = state
        .db
        .templates
        .get(&conn, &record.id)?
        .ok_or_else(|| ApiError::Internal("freshly created template vanished".into()))?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> Result<Json<TemplateRecord>> {
    let conn = state.db.conn().await;
    state
        .db
        .templates
        .get(&conn, &template_id)?
        .ok_or_else(|| ApiError::NotFound(format!("template {}", template_id)))
        .map(Json)
}

pub async fn update_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
    Json(request): Json<TemplateRequest>,
) -> Result<Json<TemplateRecord>> {
    let template_type = parse_request(&request)?;

    let conn = state.db.conn().await;
    let existing = state
        .db
        .templates
        .get(&conn, &template_id)?
        .ok_or_else(|| ApiError::NotFound(format!("template {}", template_id)))?;

    let record = TemplateRecord {
        id: existing.id,
        name: request.name.trim().to_string(),
        template_type,
        content: request.content,
        archive: request.archive,
        created_at: existing.created_at,
        updated_at: 0,
    };
    state.db.templates.update(&conn, &record)?;

    state
        .db
        .templates
        .get(&conn, &template_id)?
        .ok_or_else(|| ApiError::NotFound(format!("template {}", template_id)))
        .map(Json)
}

pub async fn delete_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> Result<StatusCode> {
    let conn = state.db.conn().await;
    if !state.db.templates.delete(&conn, &template_id)? {
        return Err(ApiError::NotFound(format!("template {}", template_id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

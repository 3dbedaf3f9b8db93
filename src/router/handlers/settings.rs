//! Credential store handlers
//!
//! Three kinds share one shape: GitHub tokens (encrypted at rest), env-var
//! profiles, and startup-command profiles. Setting a default is exclusive
//! within a kind. Responses never carry token plaintext or ciphertext.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::database::{CredentialKind, CredentialRecord, DatabaseError};
use crate::error::{ApiError, InvalidInputKind, Result};
use crate::router::AppState;

#[derive(Debug, Serialize)]
pub struct CredentialView {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub created_at: i64,
}

impl From<CredentialRecord> for CredentialView {
    fn from(record: CredentialRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            is_default: record.is_default,
            created_at: record.created_at,
        }
    }
}

fn map_db(e: DatabaseError) -> ApiError {
    match e {
        DatabaseError::NotFound(message) => ApiError::NotFound(message),
        DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            ApiError::AlreadyExists("credential name already in use".into())
        }
        other => ApiError::Internal(other.to_string()),
    }
}

async fn list(state: &AppState, kind: CredentialKind) -> Result<Json<Vec<CredentialView>>> {
    let conn = state.db.conn().await;
    let records = state.db.credentials.list(&conn, kind).map_err(map_db)?;
    Ok(Json(records.into_iter().map(CredentialView::from).collect()))
}

async fn insert(
    state: &AppState,
    kind: CredentialKind,
    name: &str,
    payload: String,
) -> Result<(StatusCode, Json<CredentialView>)> {
    if name.trim().is_empty() {
        return Err(ApiError::invalid(
            InvalidInputKind::Other,
            "name must not be empty",
        ));
    }

    let record = CredentialRecord {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.trim().to_string(),
        payload,
        is_default: false,
        created_at: 0,
    };

    let conn = state.db.conn().await;
    state
        .db
        .credentials
        .insert(&conn, kind, &record)
        .map_err(map_db)?;
    let stored = state
        .db
        .credentials
        .get(&conn, kind, &record.id)
        .map_err(map_db)?
        .ok_or_else(|| ApiError::Internal("freshly created credential vanished".into()))?;
    Ok((StatusCode::CREATED, Json(stored.into())))
}

async fn delete(state: &AppState, kind: CredentialKind, id: &str) -> Result<StatusCode> {
    let conn = state.db.conn().await;
    if !state.db.credentials.delete(&conn, kind, id).map_err(map_db)? {
        return Err(ApiError::NotFound(format!("credential {}", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn set_default(state: &AppState, kind: CredentialKind, id: &str) -> Result<StatusCode> {
    let mut conn = state.db.conn().await;
    state
        .db
        .credentials
        .set_default(&mut conn, kind, id)
        .map_err(map_db)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- GitHub tokens ---

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
    pub token: String,
}

pub async fn list_github_tokens(
    State(state): State<AppState>,
) -> Result<Json<Vec<CredentialView>>> {
    list(&state, CredentialKind::GithubToken).await
}

pub async fn create_github_token(
    State(state): State<AppState>,
    Json(request): Json<CreateTokenRequest>,
) -> Result<(StatusCode, Json<CredentialView>)> {
    if request.token.trim().is_empty() {
        return Err(ApiError::invalid(
            InvalidInputKind::Other,
            "token must not be empty",
        ));
    }

    let ciphertext = state
        .crypto
        .encrypt(request.token.trim().as_bytes())
        .map_err(|_| ApiError::Internal("token encryption failed".into()))?;
    insert(&state, CredentialKind::GithubToken, &request.name, ciphertext).await
}

pub async fn delete_github_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    delete(&state, CredentialKind::GithubToken, &id).await
}

pub async fn default_github_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    set_default(&state, CredentialKind::GithubToken, &id).await
}

// --- Env profiles ---

#[derive(Debug, Deserialize)]
pub struct CreateEnvProfileRequest {
    pub name: String,
    pub vars: HashMap<String, String>,
}

pub async fn list_env_profiles(
    State(state): State<AppState>,
) -> Result<Json<Vec<CredentialView>>> {
    list(&state, CredentialKind::EnvProfile).await
}

pub async fn create_env_profile(
    State(state): State<AppState>,
    Json(request): Json<CreateEnvProfileRequest>,
) -> Result<(StatusCode, Json<CredentialView>)> {
    for key in request.vars.keys() {
        let valid = !key.is_empty()
            && !key.contains('=')
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !key.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true);
        if !valid {
            return Err(ApiError::invalid(
                InvalidInputKind::EnvVarFormat,
                format!("invalid environment variable name {:?}", key),
            ));
        }
    }

    let payload = serde_json::to_string(&request.vars)
        .map_err(|e| ApiError::Internal(format!("profile serialization: {}", e)))?;
    insert(&state, CredentialKind::EnvProfile, &request.name, payload).await
}

pub async fn delete_env_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    delete(&state, CredentialKind::EnvProfile, &id).await
}

pub async fn default_env_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    set_default(&state, CredentialKind::EnvProfile, &id).await
}

// --- Startup profiles ---

#[derive(Debug, Deserialize)]
pub struct CreateStartupProfileRequest {
    pub name: String,
    pub command: String,
}

pub async fn list_startup_profiles(
    State(state): State<AppState>,
) -> Result<Json<Vec<CredentialView>>> {
    list(&state, CredentialKind::StartupProfile).await
}

pub async fn create_startup_profile(
    State(state): State<AppState>,
    Json(request): Json<CreateStartupProfileRequest>,
) -> Result<(StatusCode, Json<CredentialView>)> {
    if request.command.trim().is_empty() {
        return Err(ApiError::invalid(
            InvalidInputKind::Other,
            "command must not be empty",
        ));
    }
    insert(
        &state,
        CredentialKind::StartupProfile,
        &request.name,
        request.command.trim().to_string(),
    )
    .await
}

pub async fn delete_startup_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    delete(&state, CredentialKind::StartupProfile, &id).await
}

pub async fn default_startup_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    set_default(&state, CredentialKind::StartupProfile, &id).await
}

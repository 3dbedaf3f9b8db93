//! Operator login

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ApiError, Result};
use crate::router::middleware::auth::issue_token;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
}

/// Compare credentials through hex-encoded SHA-256 digests.
fn digest_eq(a: &str, b: &str) -> bool {
    hex::encode(Sha256::digest(a.as_bytes())) == hex::encode(Sha256::digest(b.as_bytes()))
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let username_ok = digest_eq(&request.username, &state.config.admin_username);
    let password_ok = digest_eq(&request.password, &state.config.admin_password);

    if !(username_ok && password_ok) {
        return Err(ApiError::Unauthorized("invalid credentials".into()));
    }

    let token = issue_token(&state.config.jwt_secret, &request.username)?;
    Ok(Json(LoginResponse {
        token,
        username: request.username,
    }))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub username: String,
}

pub async fn me(State(state): State<AppState>) -> Json<MeResponse> {
    Json(MeResponse {
        username: state.config.admin_username.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_eq() {
        assert!(digest_eq("hunter2", "hunter2"));
        assert!(!digest_eq("hunter2", "hunter3"));
        assert!(!digest_eq("", "hunter2"));
        assert!(digest_eq("", ""));
    }
}

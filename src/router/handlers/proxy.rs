//! Proxy sidecar handlers

use axum::{extract::State, Json};

use crate::error::Result;
use crate::proxy::ProxyStatus;
use crate::router::AppState;

pub async fn proxy_status(State(state): State<AppState>) -> Result<Json<ProxyStatus>> {
    Ok(Json(state.proxy.status().await?))
}

pub async fn proxy_ensure(State(state): State<AppState>) -> Result<Json<ProxyStatus>> {
    Ok(Json(state.proxy.ensure().await?))
}

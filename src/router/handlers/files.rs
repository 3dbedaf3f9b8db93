//! In-container file browser
//!
//! Listing and content access run through the exec and tar-copy engine
//! APIs. Paths are validated against traversal before any engine call.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, InvalidInputKind, Result};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: i64,
}

fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || path.split('/').any(|part| part == "..") {
        return Err(ApiError::invalid(
            InvalidInputKind::PathTraversal,
            format!("invalid path {:?}", path),
        ));
    }
    Ok(())
}

async fn running_docker_id(state: &AppState, container_id: &str) -> Result<String> {
    let record = state.orchestrator.get(container_id).await?;
    let docker_id = record
        .docker_id
        .ok_or_else(|| ApiError::PreconditionFailed("container has no engine container".into()))?;
    if !state.docker.is_running(&docker_id).await? {
        return Err(ApiError::PreconditionFailed(format!(
            "container {} is not running",
            record.name
        )));
    }
    Ok(docker_id)
}

pub async fn list_dir(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<DirEntry>>> {
    validate_path(&query.path)?;
    let docker_id = running_docker_id(&state, &container_id).await?;

    // One stat line per entry: type|size|mtime|name
    let script = format!(
        "cd {} && find . -mindepth 1 -maxdepth 1 -printf '%y|%s|%T@|%f\\n'",
        shell_words::quote(&query.path)
    );
    let output = state
        .docker
        .exec_collect(
            &docker_id,
            vec!["sh".to_string(), "-c".to_string(), script],
            None,
            None,
        )
        .await?;

    if !output.success() {
        return Err(ApiError::NotFound(format!(
            "directory {} not readable",
            query.path
        )));
    }

    let mut entries: Vec<DirEntry> = output
        .output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(4, '|');
            let kind = parts.next()?;
            let size = parts.next()?.parse().ok()?;
            let modified = parts.next()?.parse::<f64>().ok()? as i64;
            let name = parts.next()?.trim().to_string();
            Some(DirEntry {
                name,
                is_dir: kind == "d",
                size,
                modified,
            })
        })
        .collect();

    // Directories first, then by name
    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Ok(Json(entries))
}

#[derive(Debug, Serialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

pub async fn read_file(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<FileContent>> {
    validate_path(&query.path)?;
    let docker_id = running_docker_id(&state, &container_id).await?;

    let tar_bytes = state.docker.download_tar(&docker_id, &query.path).await?;

    let mut archive = tar::Archive::new(tar_bytes.as_ref());
    let entries = archive
        .entries()
        .map_err(|e| ApiError::Internal(format!("tar read: {}", e)))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| ApiError::Internal(format!("tar entry: {}", e)))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let mut content = String::new();
        use std::io::Read;
        entry
            .read_to_string(&mut content)
            .map_err(|_| ApiError::invalid(InvalidInputKind::Other, "file is not valid UTF-8"))?;
        return Ok(Json(FileContent {
            path: query.path,
            content,
        }));
    }

    Err(ApiError::NotFound(format!("file {}", query.path)))
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
}

pub async fn write_file(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
    Json(request): Json<WriteFileRequest>,
) -> Result<Json<FileContent>> {
    validate_path(&request.path)?;
    let docker_id = running_docker_id(&state, &container_id).await?;

    let relative = request.path.trim_start_matches('/');
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(request.content.len() as u64);
    header.set_mode(0o644);
    header.set_uid(1000);
    header.set_gid(1000);
    header.set_mtime(chrono::Utc::now().timestamp() as u64);
    header.set_cksum();
    builder
        .append_data(&mut header, relative, request.content.as_bytes())
        .map_err(|e| ApiError::Internal(format!("tar build: {}", e)))?;
    let data = builder
        .into_inner()
        .map_err(|e| ApiError::Internal(format!("tar finish: {}", e)))?;

    state
        .docker
        .upload_tar(&docker_id, "/", bytes::Bytes::from(data))
        .await?;

    Ok(Json(FileContent {
        path: request.path,
        content: request.content,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/workspace/app/src").is_ok());
        assert!(validate_path("relative").is_err());
        assert!(validate_path("/workspace/../etc/shadow").is_err());
    }
}

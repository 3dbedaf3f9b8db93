//! Template injection into a running container
//!
//! Materializes a batch of stored templates into the container filesystem:
//! project docs and slash commands as single files, skills as directories
//! with optional extracted archives, and MCP servers merged into one
//! `~/.claude.json` written once at the end of the batch. A failing template
//! is recorded and never aborts the batch.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use serde_json::json;
use tracing::{debug, warn};

use crate::database::{InjectionFailure, InjectionResult, TemplateRecord, TemplateType};
use crate::docker::DockerService;
use crate::error::{ApiError, Result};

use super::validate::{parse_frontmatter, parse_mcp_config};
use super::CONTAINER_HOME;

pub struct TemplateInjector<'a> {
    docker: &'a DockerService,
    docker_id: &'a str,
}

impl<'a> TemplateInjector<'a> {
    pub fn new(docker: &'a DockerService, docker_id: &'a str) -> Self {
        Self { docker, docker_id }
    }

    /// Inject the batch. Per-template failures are collected into the
    /// result; only a completely unreachable engine aborts.
    pub async fn inject_batch(&self, templates: &[TemplateRecord]) -> InjectionResult {
        let mut result = InjectionResult {
            timestamp: chrono::Utc::now().timestamp(),
            ..Default::default()
        };

        let mut mcp_servers: Vec<(String, serde_json::Value)> = Vec::new();

        for template in templates {
            let outcome: Result<()> = match template.template_type {
                TemplateType::ProjectDoc => {
                    self.inject_file(
                        &format!("{}/.claude/CLAUDE.md", CONTAINER_HOME),
                        template.content.as_bytes(),
                    )
                    .await
                }
                TemplateType::SlashCommand => {
                    self.inject_file(
                        &format!("{}/.claude/commands/{}.md", CONTAINER_HOME, template.name),
                        template.content.as_bytes(),
                    )
                    .await
                }
                TemplateType::Skill => self.inject_skill(template).await,
                TemplateType::McpServer => match parse_mcp_config(&template.content) {
                    Ok(config) => {
                        // Accumulated; written once after the loop
                        mcp_servers.push((
                            template.name.clone(),
                            serde_json::to_value(config).unwrap_or(serde_json::Value::Null),
                        ));
                        result.succeeded.push(template.name.clone());
                        continue;
                    }
                    Err(e) => Err(e),
                },
            };

            match outcome {
                Ok(()) => result.succeeded.push(template.name.clone()),
                Err(e) => {
                    warn!(
                        "Template {} ({}) failed to inject: {}",
                        template.name, template.template_type, e
                    );
                    result.failed.push(InjectionFailure {
                        name: template.name.clone(),
                        template_type: template.template_type.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !mcp_servers.is_empty() {
            let names: Vec<String> = mcp_servers.iter().map(|(name, _)| name.clone()).collect();
            if let Err(e) = self.write_mcp_config(mcp_servers).await {
                warn!("MCP config write failed: {}", e);
                // All-or-none per batch write: demote the accumulated names
                result.succeeded.retain(|name| !names.contains(name));
                for name in names {
                    result.failed.push(InjectionFailure {
                        name,
                        template_type: TemplateType::McpServer.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        result
    }

    /// Write a single file, creating parent directories via tar entries.
    async fn inject_file(&self, absolute_path: &str, content: &[u8]) -> Result<()> {
        let tar = build_tar(absolute_path, content)?;
        self.docker.upload_tar(self.docker_id, "/", tar).await
    }

    async fn inject_skill(&self, template: &TemplateRecord) -> Result<()> {
        // Frontmatter revalidated at injection time
        parse_frontmatter(&template.content)?;

        let skill_dir = format!("{}/.claude/skills/{}", CONTAINER_HOME, template.name);
        let tar = build_tar(
            &format!("{}/SKILL.md", skill_dir),
            template.content.as_bytes(),
        )?;
        self.docker.upload_tar(self.docker_id, "/", tar).await?;

        if let Some(archive) = &template.archive {
            self.extract_archive(template, archive, &skill_dir).await?;
        }

        Ok(())
    }

    /// Ship the archive blob to a temp path and extract it in-container.
    async fn extract_archive(
        &self,
        template: &TemplateRecord,
        archive_b64: &str,
        skill_dir: &str,
    ) -> Result<()> {
        let archive = BASE64.decode(archive_b64.trim()).map_err(|e| {
            ApiError::invalid(
                crate::error::InvalidInputKind::Other,
                format!("skill archive is not valid base64: {}", e),
            )
        })?;

        let tmp_path = format!("/tmp/drydock-skill-{}.tar.gz", template.id);
        let tar = build_tar(&tmp_path, &archive)?;
        self.docker.upload_tar(self.docker_id, "/", tar).await?;

        let extract = self
            .docker
            .exec_collect(
                self.docker_id,
                vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    format!(
                        "tar xzf {} -C {} && rm -f {}",
                        shell_words::quote(&tmp_path),
                        shell_words::quote(skill_dir),
                        shell_words::quote(&tmp_path),
                    ),
                ],
                None,
                None,
            )
            .await?;

        if !extract.success() {
            return Err(ApiError::Internal(format!(
                "skill archive extraction exited {}",
                extract.exit_code
            )));
        }

        debug!("Extracted skill archive for {}", template.name);
        Ok(())
    }

    /// Read-merge-write of `~/.claude.json`: all selected MCP templates
    /// coalesce into one file written once.
    async fn write_mcp_config(
        &self,
        servers: Vec<(String, serde_json::Value)>,
    ) -> Result<()> {
        let path = format!("{}/.claude.json", CONTAINER_HOME);

        let existing = self
            .docker
            .exec_collect(
                self.docker_id,
                vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    format!("cat {} 2>/dev/null || true", shell_words::quote(&path)),
                ],
                None,
                None,
            )
            .await?;

        let mut root = match serde_json::from_str(existing.output.trim()) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };

        let servers_entry = root
            .entry("mcpServers".to_string())
            .or_insert_with(|| json!({}));
        if !servers_entry.is_object() {
            *servers_entry = json!({});
        }
        if let Some(map) = servers_entry.as_object_mut() {
            for (name, server) in servers {
                map.insert(name, server);
            }
        }

        let rendered = serde_json::to_string_pretty(&serde_json::Value::Object(root))
            .map_err(|e| ApiError::Internal(format!("mcp config serialization: {}", e)))?;
        let tar = build_tar(&path, rendered.as_bytes())?;
        self.docker.upload_tar(self.docker_id, "/", tar).await
    }
}

/// Build an in-memory tar archive carrying one file at an absolute path.
/// Parent directories materialize on extraction.
fn build_tar(absolute_path: &str, content: &[u8]) -> Result<Bytes> {
    let relative = absolute_path.trim_start_matches('/');
    if relative.is_empty() || relative.split('/').any(|part| part == "..") {
        return Err(ApiError::invalid(
            crate::error::InvalidInputKind::PathTraversal,
            format!("refusing template path {:?}", absolute_path),
        ));
    }

    let mut builder = tar::Builder::new(Vec::new());

    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_uid(1000);
    header.set_gid(1000);
    header.set_mtime(chrono::Utc::now().timestamp() as u64);
    header.set_cksum();

    builder
        .append_data(&mut header, relative, content)
        .map_err(|e| ApiError::Internal(format!("tar build: {}", e)))?;

    let data = builder
        .into_inner()
        .map_err(|e| ApiError::Internal(format!("tar finish: {}", e)))?;
    Ok(Bytes::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_tar_contains_entry() {
        let tar_bytes = build_tar("/home/dev/.claude/CLAUDE.md", b"# Docs").unwrap();

        let mut archive = tar::Archive::new(tar_bytes.as_ref());
        let entries: Vec<_> = archive.entries().unwrap().collect();
        assert_eq!(entries.len(), 1);

        let entry = entries.into_iter().next().unwrap().unwrap();
        assert_eq!(
            entry.path().unwrap().to_string_lossy(),
            "home/dev/.claude/CLAUDE.md"
        );
    }

    #[test]
    fn test_build_tar_rejects_traversal() {
        let err = build_tar("/home/dev/../../etc/passwd", b"x").unwrap_err();
        assert_eq!(err.kind(), "invalid-input/path-traversal");
        assert!(build_tar("/", b"x").is_err());
    }
}

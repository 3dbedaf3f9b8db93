//! Template content validation
//!
//! Validation runs when a template is saved and again before injection.
//! project-doc and slash-command require non-empty content; skills may carry
//! YAML frontmatter with a recognized key set; MCP server templates must be
//! strict JSON with a string `command` and array `args`.

use serde::Deserialize;
use std::collections::HashMap;

use crate::database::TemplateType;
use crate::error::{ApiError, InvalidInputKind, Result};

/// Recognized skill frontmatter keys.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SkillFrontmatter {
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub disable_model_invocation: Option<bool>,
}

/// Strict MCP server definition merged into `~/.claude.json`.
#[derive(Debug, Clone, Deserialize, serde::Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct McpServerConfig {
    pub command: String,
    pub args: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Validate template content for its type.
pub fn validate_template(template_type: TemplateType, content: &str) -> Result<()> {
    match template_type {
        TemplateType::ProjectDoc | TemplateType::SlashCommand => {
            if content.trim().is_empty() {
                return Err(ApiError::invalid(
                    InvalidInputKind::Other,
                    format!("{} content must not be empty", template_type),
                ));
            }
            Ok(())
        }
        TemplateType::Skill => {
            parse_frontmatter(content)?;
            Ok(())
        }
        TemplateType::McpServer => {
            parse_mcp_config(content)?;
            Ok(())
        }
    }
}

/// Parse optional skill frontmatter. Content not opening with a `---` fence
/// has none; a fence that opens but never closes is rejected.
pub fn parse_frontmatter(content: &str) -> Result<Option<SkillFrontmatter>> {
    let Some(rest) = content.strip_prefix("---") else {
        return Ok(None);
    };

    // The opening fence must be its own line
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"));
    let Some(rest) = rest else {
        return Ok(None);
    };

    let Some(end) = rest.find("\n---").map(|i| i + 1).or_else(|| {
        // Frontmatter closing as the very first line of rest
        rest.starts_with("---").then_some(0)
    }) else {
        return Err(ApiError::invalid(
            InvalidInputKind::Frontmatter,
            "skill frontmatter opens but never closes",
        ));
    };

    let yaml = &rest[..end];
    if yaml.trim().is_empty() {
        return Ok(Some(SkillFrontmatter::default()));
    }

    let frontmatter: SkillFrontmatter = serde_yaml::from_str(yaml).map_err(|e| {
        ApiError::invalid(
            InvalidInputKind::Frontmatter,
            format!("skill frontmatter: {}", e),
        )
    })?;

    Ok(Some(frontmatter))
}

/// Parse strict MCP server JSON.
pub fn parse_mcp_config(content: &str) -> Result<McpServerConfig> {
    // Pre-check the required shapes so the error names the actual problem
    let value: serde_json::Value = serde_json::from_str(content).map_err(|e| {
        ApiError::invalid(InvalidInputKind::McpConfig, format!("mcp config: {}", e))
    })?;

    let object = value.as_object().ok_or_else(|| {
        ApiError::invalid(InvalidInputKind::McpConfig, "mcp config must be a JSON object")
    })?;

    match object.get("command") {
        Some(serde_json::Value::String(_)) => {}
        _ => {
            return Err(ApiError::invalid(
                InvalidInputKind::McpConfig,
                "mcp config requires a string \"command\"",
            ))
        }
    }
    match object.get("args") {
        Some(serde_json::Value::Array(_)) => {}
        _ => {
            return Err(ApiError::invalid(
                InvalidInputKind::McpConfig,
                "mcp config requires an array \"args\"",
            ))
        }
    }

    serde_json::from_value(value).map_err(|e| {
        ApiError::invalid(InvalidInputKind::McpConfig, format!("mcp config: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_doc_non_empty() {
        assert!(validate_template(TemplateType::ProjectDoc, "# Project").is_ok());
        assert!(validate_template(TemplateType::ProjectDoc, "  \n ").is_err());
        assert!(validate_template(TemplateType::SlashCommand, "").is_err());
    }

    #[test]
    fn test_skill_without_frontmatter() {
        assert_eq!(parse_frontmatter("# Just markdown").unwrap(), None);
        assert!(validate_template(TemplateType::Skill, "plain skill body").is_ok());
    }

    #[test]
    fn test_skill_frontmatter_parsed() {
        let content = "---\nallowed_tools:\n  - bash\n  - edit\ndisable_model_invocation: true\n---\n# Skill";
        let frontmatter = parse_frontmatter(content).unwrap().unwrap();
        assert_eq!(
            frontmatter.allowed_tools,
            Some(vec!["bash".to_string(), "edit".to_string()])
        );
        assert_eq!(frontmatter.disable_model_invocation, Some(true));
    }

    #[test]
    fn test_skill_unclosed_frontmatter_rejected() {
        let content = "---\nallowed_tools: [bash]\n# never closed";
        let err = parse_frontmatter(content).unwrap_err();
        assert_eq!(err.kind(), "invalid-input/frontmatter");
    }

    #[test]
    fn test_skill_unknown_keys_rejected() {
        let content = "---\nallowed_tools: [bash]\nmystery_key: 1\n---\nbody";
        assert!(parse_frontmatter(content).is_err());
    }

    #[test]
    fn test_mcp_valid() {
        let config =
            parse_mcp_config(r#"{"command": "node", "args": ["s1.js"]}"#).unwrap();
        assert_eq!(config.command, "node");
        assert_eq!(config.args.len(), 1);

        let full = parse_mcp_config(
            r#"{"command": "python", "args": ["-m", "s2"], "env": {"DEBUG": "1"},
                "transport": "stdio", "url": "http://localhost:9000"}"#,
        )
        .unwrap();
        assert_eq!(full.transport.as_deref(), Some("stdio"));
    }

    #[test]
    fn test_mcp_missing_command() {
        let err = parse_mcp_config(r#"{"args": []}"#).unwrap_err();
        assert_eq!(err.kind(), "invalid-input/mcp-config");
    }

    #[test]
    fn test_mcp_wrong_types() {
        assert!(parse_mcp_config(r#"{"command": 7, "args": []}"#).is_err());
        assert!(parse_mcp_config(r#"{"command": "node", "args": "s1.js"}"#).is_err());
        assert!(parse_mcp_config(r#"["not", "an", "object"]"#).is_err());
        assert!(parse_mcp_config("not json at all").is_err());
    }

    #[test]
    fn test_mcp_unknown_field_rejected() {
        assert!(
            parse_mcp_config(r#"{"command": "node", "args": [], "extra": true}"#).is_err()
        );
    }
}

//! Config templates
//!
//! Validation of the four template types and injection of a template batch
//! into a container's filesystem under `~/.claude/`.

mod inject;
mod validate;

pub use inject::TemplateInjector;
pub use validate::{validate_template, McpServerConfig, SkillFrontmatter};

/// Home directory of the workspace user inside containers.
pub const CONTAINER_HOME: &str = "/home/dev";

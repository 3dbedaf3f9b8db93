//! Process configuration loaded from environment variables.

mod config;

pub use config::{Config, ConfigError, PtyConfig, TraefikConfig};

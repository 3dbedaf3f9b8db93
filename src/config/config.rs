//! Configuration structures and loading
//!
//! All process configuration comes from environment variables. Secrets that
//! are absent on first boot are generated once, persisted to
//! `<DATA_DIR>/secrets.toml`, and reused on subsequent boots.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Secrets file error: {0}")]
    Secrets(String),
}

/// Main daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP API listens on
    pub port: u16,

    /// Operator credentials
    pub admin_username: String,
    pub admin_password: String,

    /// HS256 signing secret for bearer tokens
    pub jwt_secret: String,

    /// Passphrase for credential encryption
    pub encryption_key: String,

    /// SQLite database location
    pub database_path: PathBuf,

    /// Root data directory (secrets, traefik dynamic config)
    pub data_dir: PathBuf,

    /// Pre-built workspace image user containers run
    pub base_image: String,

    /// Traefik sidecar settings
    pub traefik: TraefikConfig,

    /// Base domain for subdomain routing, e.g. `dev.example.com`
    pub base_domain: Option<String>,

    /// PTY session settings
    pub pty: PtyConfig,

    /// Automation log retention horizon
    pub automation_log_retention: Duration,
}

/// Traefik sidecar configuration
#[derive(Debug, Clone)]
pub struct TraefikConfig {
    /// Start the sidecar automatically on boot
    pub auto_start: bool,

    /// Host port for the `web` entrypoint
    pub http_port: u16,

    /// Host port for the Traefik dashboard
    pub dashboard_port: u16,

    /// Inclusive reserved range served by `direct-<port>` entrypoints
    pub port_range_start: u16,
    pub port_range_end: u16,
}

/// PTY session configuration
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Default command a new session runs
    pub shell: String,

    /// Raw-byte cap of the compressed rolling history
    pub history_cap: usize,

    /// Idle eviction window
    pub idle_timeout: Duration,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
            history_cap: 256 * 1024,
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Secrets generated on first boot and persisted so restarts keep them.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedSecrets {
    #[serde(skip_serializing_if = "Option::is_none")]
    jwt_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encryption_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    admin_password: Option<String>,
}

impl Config {
    /// Load configuration from the process environment, generating and
    /// persisting missing secrets.
    pub fn load() -> Result<Self, ConfigError> {
        let data_dir = PathBuf::from(env_or("DATA_DIR", "./data"));
        std::fs::create_dir_all(&data_dir)?;

        let database_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("drydock.db"));

        let mut secrets = PersistedSecrets::load(&data_dir)?;
        let mut secrets_dirty = false;

        let jwt_secret = match std::env::var("JWT_SECRET") {
            Ok(v) if !v.is_empty() => v,
            _ => secrets.jwt_secret.clone().unwrap_or_else(|| {
                let v = random_secret(48);
                info!("JWT_SECRET not set; generated one and persisted it to secrets.toml");
                secrets.jwt_secret = Some(v.clone());
                secrets_dirty = true;
                v
            }),
        };

        let encryption_key = match std::env::var("ENCRYPTION_KEY") {
            Ok(v) if !v.is_empty() => v,
            _ => secrets.encryption_key.clone().unwrap_or_else(|| {
                let v = random_secret(48);
                info!("ENCRYPTION_KEY not set; generated one and persisted it to secrets.toml");
                secrets.encryption_key = Some(v.clone());
                secrets_dirty = true;
                v
            }),
        };

        let admin_password = match std::env::var("ADMIN_PASSWORD") {
            Ok(v) if !v.is_empty() => v,
            _ => secrets.admin_password.clone().unwrap_or_else(|| {
                let v = random_secret(16);
                info!("ADMIN_PASSWORD not set; generated initial password: {}", v);
                secrets.admin_password = Some(v.clone());
                secrets_dirty = true;
                v
            }),
        };

        if secrets_dirty {
            secrets.save(&data_dir)?;
        }

        let traefik = TraefikConfig {
            auto_start: parse_env("AUTO_START_TRAEFIK", true)?,
            http_port: parse_env("TRAEFIK_HTTP_PORT", 80u16)?,
            dashboard_port: parse_env("TRAEFIK_DASHBOARD_PORT", 8081u16)?,
            port_range_start: parse_env("TRAEFIK_PORT_RANGE_START", 30001u16)?,
            port_range_end: parse_env("TRAEFIK_PORT_RANGE_END", 30020u16)?,
        };

        if traefik.port_range_start > traefik.port_range_end {
            return Err(ConfigError::Invalid {
                var: "TRAEFIK_PORT_RANGE_START".into(),
                reason: format!(
                    "range start {} exceeds end {}",
                    traefik.port_range_start, traefik.port_range_end
                ),
            });
        }

        let base_domain = std::env::var("CODE_SERVER_BASE_DOMAIN")
            .ok()
            .filter(|s| !s.is_empty());

        Ok(Self {
            port: parse_env("PORT", 8080u16)?,
            admin_username: env_or("ADMIN_USERNAME", "admin"),
            admin_password,
            jwt_secret,
            encryption_key,
            database_path,
            data_dir,
            base_image: env_or("BASE_IMAGE", "drydock/workspace:latest"),
            traefik,
            base_domain,
            pty: PtyConfig::default(),
            automation_log_retention: Duration::from_secs(30 * 24 * 3600),
        })
    }

    /// Directory Traefik watches for file-provider fragments.
    pub fn traefik_dynamic_dir(&self) -> PathBuf {
        self.data_dir.join("traefik").join("dynamic")
    }
}

impl PersistedSecrets {
    fn path(data_dir: &Path) -> PathBuf {
        data_dir.join("secrets.toml")
    }

    fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(data_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content).map_err(|e| ConfigError::Secrets(e.to_string()))
    }

    fn save(&self, data_dir: &Path) -> Result<(), ConfigError> {
        let path = Self::path(data_dir);
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Secrets(e.to_string()))?;
        std::fs::write(&path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => v.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: var.to_string(),
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}

fn random_secret(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_secret_length() {
        let s = random_secret(48);
        assert_eq!(s.len(), 48);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_secrets_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = PersistedSecrets {
            jwt_secret: Some("abc".into()),
            encryption_key: None,
            admin_password: Some("pw".into()),
        };
        secrets.save(dir.path()).unwrap();

        let loaded = PersistedSecrets::load(dir.path()).unwrap();
        assert_eq!(loaded.jwt_secret.as_deref(), Some("abc"));
        assert_eq!(loaded.encryption_key, None);
        assert_eq!(loaded.admin_password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_missing_secrets_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = PersistedSecrets::load(dir.path()).unwrap();
        assert!(loaded.jwt_secret.is_none());
    }
}

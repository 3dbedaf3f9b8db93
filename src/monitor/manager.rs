//! Monitoring manager
//!
//! Owns the per-PTY monitoring sessions, applies config changes, restores
//! monitoring after a daemon restart, and implements the dispatch side
//! effects against the PTY manager, event bus, and stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::database::{
    Database, MonitorConfigRecord, TaskStatus, MAX_THRESHOLD_SECS, MIN_THRESHOLD_SECS,
};
use crate::error::{ApiError, InvalidInputKind, Result};
use crate::events::{EventBus, MonitorNotice};
use crate::pty::PtyManager;

use super::session::{ActionEffects, DispatchLog, MonitorSession};
use super::strategy::{build_strategy, validate_params, StrategyDeps, StrategyKind};

/// API view of a container's monitoring state.
#[derive(Debug, Serialize)]
pub struct MonitorStatus {
    pub config: MonitorConfigRecord,
    pub active_sessions: Vec<String>,
}

pub struct MonitorManager {
    db: Arc<Database>,
    pty: Arc<PtyManager>,
    bus: EventBus,
    deps: StrategyDeps,
    sessions: DashMap<String, Arc<MonitorSession>>,
    effects: Arc<ManagerEffects>,
}

impl MonitorManager {
    pub fn new(db: Arc<Database>, pty: Arc<PtyManager>, bus: EventBus) -> Arc<Self> {
        let http = reqwest::Client::new();
        let effects = Arc::new(ManagerEffects {
            db: db.clone(),
            pty: pty.clone(),
            bus: bus.clone(),
        });

        Arc::new(Self {
            deps: StrategyDeps {
                db: db.clone(),
                http,
            },
            db,
            pty,
            bus,
            sessions: DashMap::new(),
            effects,
        })
    }

    /// PTY session-created hook: bind monitoring when the container's config
    /// is enabled.
    pub async fn handle_session_created(&self, container_id: &str, session_id: &str) {
        self.bus.publish(crate::events::Event::PtySession {
            container_id: container_id.to_string(),
            session_id: session_id.to_string(),
            created: true,
        });

        let config = {
            let conn = self.db.conn().await;
            match self.db.monitor_configs.get(&conn, container_id) {
                Ok(Some(config)) if config.enabled => config,
                Ok(_) => return,
                Err(e) => {
                    warn!("Failed to load monitor config for {}: {}", container_id, e);
                    return;
                }
            }
        };

        self.bind(config, session_id);
    }

    /// PTY session-destroyed hook.
    pub fn handle_session_destroyed(&self, container_id: &str, session_id: &str) {
        self.bus.publish(crate::events::Event::PtySession {
            container_id: container_id.to_string(),
            session_id: session_id.to_string(),
            created: false,
        });

        if let Some((_, session)) = self.sessions.remove(session_id) {
            session.terminate();
            info!("Monitoring detached from PTY session {}", session_id);
        }
    }

    /// PTY output callback.
    pub fn handle_output(&self, _container_id: &str, session_id: &str, bytes: &[u8]) {
        if let Some(session) = self.sessions.get(session_id) {
            session.on_output(bytes);
        }
    }

    fn bind(&self, config: MonitorConfigRecord, session_id: &str) {
        if self.sessions.contains_key(session_id) {
            return;
        }

        let Some(pty_session) = self.pty.get(session_id) else {
            return;
        };

        let kind = match StrategyKind::parse(&config.strategy) {
            Some(kind) => kind,
            None => {
                warn!(
                    "Unknown strategy {:?} configured for container {}",
                    config.strategy, config.container_id
                );
                return;
            }
        };

        let strategy = match build_strategy(kind, &config.params, &self.deps) {
            Ok(strategy) => strategy,
            Err(e) => {
                warn!(
                    "Strategy build failed for container {}: {}",
                    config.container_id, e
                );
                return;
            }
        };

        let session = MonitorSession::spawn(
            config.container_id.clone(),
            session_id.to_string(),
            pty_session.docker_id.clone(),
            Duration::from_secs(config.threshold_secs),
            config.buffer_bytes,
            strategy,
            self.effects.clone(),
        );

        info!(
            "Monitoring bound to PTY session {} (container {}, strategy {})",
            session_id, config.container_id, config.strategy
        );
        self.sessions.insert(session_id.to_string(), session);
    }

    /// Fetch (or default) the stored config.
    pub async fn get_config(&self, container_id: &str) -> Result<MonitorConfigRecord> {
        let conn = self.db.conn().await;
        Ok(self
            .db
            .monitor_configs
            .get(&conn, container_id)?
            .unwrap_or_else(|| MonitorConfigRecord::defaults(container_id)))
    }

    /// Validate and persist a config, then re-bind live sessions to the new
    /// snapshot. Validation failures leave the stored config untouched.
    pub async fn update_config(&self, config: MonitorConfigRecord) -> Result<MonitorConfigRecord> {
        if !(MIN_THRESHOLD_SECS..=MAX_THRESHOLD_SECS).contains(&config.threshold_secs) {
            return Err(ApiError::invalid(
                InvalidInputKind::Threshold,
                format!(
                    "threshold must be within [{}, {}] seconds",
                    MIN_THRESHOLD_SECS, MAX_THRESHOLD_SECS
                ),
            ));
        }

        let kind = StrategyKind::parse(&config.strategy).ok_or_else(|| {
            ApiError::invalid(
                InvalidInputKind::Other,
                format!("unknown strategy {:?}", config.strategy),
            )
        })?;
        validate_params(kind, &config.params, &self.deps)?;

        {
            let conn = self.db.conn().await;
            self.db.monitor_configs.save(&conn, &config)?;
        }

        self.rebind_container(&config).await;
        self.get_config(&config.container_id).await
    }

    /// Enable or disable monitoring for a container.
    pub async fn set_enabled(&self, container_id: &str, enabled: bool) -> Result<()> {
        let mut config = self.get_config(container_id).await?;
        config.enabled = enabled;
        {
            let conn = self.db.conn().await;
            self.db.monitor_configs.save(&conn, &config)?;
        }
        self.rebind_container(&config).await;
        Ok(())
    }

    /// Tear down existing bindings for the container and, if enabled, bind
    /// the fresh config snapshot to every live PTY session.
    async fn rebind_container(&self, config: &MonitorConfigRecord) {
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().container_id == config.container_id)
            .map(|entry| entry.key().clone())
            .collect();
        for session_id in stale {
            if let Some((_, session)) = self.sessions.remove(&session_id) {
                session.terminate();
            }
        }

        if !config.enabled {
            return;
        }

        for info in self.pty.list_for_container(&config.container_id) {
            if info.running {
                self.bind(config.clone(), &info.id);
            }
        }
    }

    /// Container removal: terminate sessions and drop the config.
    pub async fn remove_container(&self, container_id: &str) -> Result<()> {
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().container_id == container_id)
            .map(|entry| entry.key().clone())
            .collect();
        for session_id in stale {
            if let Some((_, session)) = self.sessions.remove(&session_id) {
                session.terminate();
            }
        }

        let conn = self.db.conn().await;
        self.db.monitor_configs.delete(&conn, container_id)?;
        Ok(())
    }

    /// Restoration pass on boot: every enabled config whose container is
    /// running binds to the first live PTY session; containers without one
    /// stay latent and bind on the next session-created hook.
    pub async fn restore(&self) -> Result<usize> {
        let configs = {
            let conn = self.db.conn().await;
            self.db.monitor_configs.all_enabled(&conn)?
        };

        let mut bound = 0;
        for config in configs {
            let running = {
                let conn = self.db.conn().await;
                self.db
                    .containers
                    .get(&conn, &config.container_id)?
                    .map(|c| c.status == crate::database::ContainerStatus::Running)
                    .unwrap_or(false)
            };
            if !running {
                continue;
            }

            if let Some(session) = self.pty.first_for_container(&config.container_id) {
                self.bind(config, &session.id);
                bound += 1;
            }
        }

        if bound > 0 {
            info!("Restored monitoring on {} PTY sessions", bound);
        }
        Ok(bound)
    }

    pub async fn status(&self, container_id: &str) -> Result<MonitorStatus> {
        let config = self.get_config(container_id).await?;
        let active_sessions = self
            .sessions
            .iter()
            .filter(|entry| {
                entry.value().container_id == container_id && !entry.value().is_terminated()
            })
            .map(|entry| entry.key().clone())
            .collect();
        Ok(MonitorStatus {
            config,
            active_sessions,
        })
    }

    /// Shutdown: terminate everything.
    pub fn terminate_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().terminate();
        }
        self.sessions.clear();
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }
}

/// Dispatch side effects bound to the real daemon services.
struct ManagerEffects {
    db: Arc<Database>,
    pty: Arc<PtyManager>,
    bus: EventBus,
}

#[async_trait]
impl ActionEffects for ManagerEffects {
    async fn inject(&self, session_id: &str, bytes: Bytes) -> Result<()> {
        self.pty.write(session_id, bytes).await
    }

    fn notify(&self, notice: MonitorNotice) {
        self.bus.publish_notice(notice);
    }

    async fn complete_current_task(&self, container_id: &str) -> Result<()> {
        let conn = self.db.conn().await;
        if let Some(current) = self.db.tasks.current(&conn, container_id)? {
            self.db
                .tasks
                .transition(&conn, &current.id, TaskStatus::Completed)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
        }
        Ok(())
    }

    async fn log(&self, entry: DispatchLog) {
        let conn = self.db.conn().await;
        if let Err(e) = self.db.automation_logs.append(
            &conn,
            &entry.container_id,
            &entry.session_id,
            &entry.strategy,
            &entry.action,
            entry.command.as_deref(),
            entry.context_snippet.as_deref(),
            entry.ai_response.as_deref(),
            entry.success,
            entry.error.as_deref(),
        ) {
            warn!("Failed to append automation log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PtyConfig;
    use crate::docker::DockerService;

    async fn manager() -> Arc<MonitorManager> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let docker = DockerService::new().expect("client construction is lazy");
        let pty = Arc::new(PtyManager::new(docker, PtyConfig::default()));
        MonitorManager::new(db, pty, EventBus::new())
    }

    #[tokio::test]
    async fn test_threshold_validation_rejects_and_preserves() {
        let m = manager().await;

        let mut config = m.get_config("c1").await.unwrap();
        config.enabled = true;
        config.threshold_secs = 15;
        config.strategy = "injection".into();
        config.params = serde_json::json!({"template": "echo hi"});
        m.update_config(config.clone()).await.unwrap();

        // Below the floor: rejected with invalid-input/threshold
        let mut low = config.clone();
        low.threshold_secs = 3;
        let err = m.update_config(low).await.unwrap_err();
        assert_eq!(err.kind(), "invalid-input/threshold");

        // Stored config untouched by the rejected update
        let stored = m.get_config("c1").await.unwrap();
        assert_eq!(stored.threshold_secs, 15);

        let mut high = config;
        high.threshold_secs = 301;
        assert!(m.update_config(high).await.is_err());
    }

    #[tokio::test]
    async fn test_update_config_validates_strategy_params() {
        let m = manager().await;

        let mut config = m.get_config("c1").await.unwrap();
        config.strategy = "webhook".into();
        config.params = serde_json::json!({});
        // Missing url
        assert!(m.update_config(config).await.is_err());

        let mut unknown = m.get_config("c1").await.unwrap();
        unknown.strategy = "carrier-pigeon".into();
        assert!(m.update_config(unknown).await.is_err());
    }

    #[tokio::test]
    async fn test_status_defaults() {
        let m = manager().await;
        let status = m.status("c1").await.unwrap();
        assert!(!status.config.enabled);
        assert_eq!(status.config.threshold_secs, 30);
        assert_eq!(status.config.buffer_bytes, 8192);
        assert_eq!(status.config.strategy, "webhook");
        assert!(status.active_sessions.is_empty());
    }
}

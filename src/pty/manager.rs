//! PTY session manager
//!
//! Owns every live session, creates the backing TTY execs, runs the idle
//! sweeper, and fires the session-created/destroyed hooks the monitoring
//! subsystem installs.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PtyConfig;
use crate::docker::DockerService;
use crate::error::{ApiError, Result};

use super::session::{OutputCallback, PtySession, SessionInfo};

/// Hook invoked with (container_id, session_id) when a session appears or
/// disappears.
pub type SessionHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// How often the idle sweeper wakes.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct PtyManager {
    docker: DockerService,
    config: PtyConfig,
    sessions: DashMap<String, Arc<PtySession>>,
    output_callback: RwLock<Option<OutputCallback>>,
    created_hook: RwLock<Option<SessionHook>>,
    destroyed_hook: RwLock<Option<SessionHook>>,
}

impl PtyManager {
    pub fn new(docker: DockerService, config: PtyConfig) -> Self {
        Self {
            docker,
            config,
            sessions: DashMap::new(),
            output_callback: RwLock::new(None),
            created_hook: RwLock::new(None),
            destroyed_hook: RwLock::new(None),
        }
    }

    /// Install the per-chunk output callback. Must be set before sessions
    /// are created; later sessions capture the value at creation time.
    pub fn set_output_callback(&self, callback: OutputCallback) {
        *self.output_callback.write() = Some(callback);
    }

    pub fn set_created_hook(&self, hook: SessionHook) {
        *self.created_hook.write() = Some(hook);
    }

    pub fn set_destroyed_hook(&self, hook: SessionHook) {
        *self.destroyed_hook.write() = Some(hook);
    }

    /// Create a new session: allocate a TTY exec in the container and spawn
    /// its I/O tasks. Fires the created hook.
    pub async fn create_session(
        &self,
        container_id: &str,
        docker_id: &str,
        command: Option<String>,
        cols: u16,
        rows: u16,
    ) -> Result<Arc<PtySession>> {
        if !self.docker.is_running(docker_id).await? {
            return Err(ApiError::PreconditionFailed(format!(
                "container {} is not running",
                container_id
            )));
        }

        let command = command.unwrap_or_else(|| self.config.shell.clone());
        let argv = shell_words::split(&command)
            .map_err(|e| ApiError::Internal(format!("invalid session command: {}", e)))?;
        if argv.is_empty() {
            return Err(ApiError::Internal("empty session command".into()));
        }

        let tty = self
            .docker
            .create_tty_exec(docker_id, argv, None, cols, rows)
            .await?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let callback = self.output_callback.read().clone();

        let session = PtySession::spawn(
            session_id.clone(),
            container_id.to_string(),
            docker_id.to_string(),
            tty.exec_id,
            tty.results,
            self.config.history_cap,
            callback,
        )?;

        self.sessions.insert(session_id.clone(), session.clone());
        info!(
            "Created PTY session {} for container {}",
            session_id, container_id
        );

        if let Some(hook) = self.created_hook.read().clone() {
            (*hook)(container_id, &session_id);
        }

        Ok(session)
    }

    /// Find a live session for the container, or create one.
    pub async fn find_or_create(
        &self,
        container_id: &str,
        docker_id: &str,
        cols: u16,
        rows: u16,
    ) -> Result<Arc<PtySession>> {
        if let Some(session) = self.first_for_container(container_id) {
            return Ok(session);
        }
        self.create_session(container_id, docker_id, None, cols, rows)
            .await
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<PtySession>> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    pub fn first_for_container(&self, container_id: &str) -> Option<Arc<PtySession>> {
        self.sessions
            .iter()
            .find(|entry| entry.value().container_id == container_id && entry.value().is_running())
            .map(|entry| entry.value().clone())
    }

    pub fn list_for_container(&self, container_id: &str) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().container_id == container_id)
            .map(|entry| entry.value().info())
            .collect()
    }

    pub async fn write(&self, session_id: &str, bytes: Bytes) -> Result<()> {
        let session = self
            .get(session_id)
            .ok_or_else(|| ApiError::NotFound(format!("pty session {}", session_id)))?;
        session.write(bytes).await
    }

    pub async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<()> {
        let session = self
            .get(session_id)
            .ok_or_else(|| ApiError::NotFound(format!("pty session {}", session_id)))?;
        session.touch();
        self.docker.resize_exec(session.exec_id(), cols, rows).await
    }

    /// Close and remove one session, firing the destroyed hook.
    pub fn destroy_session(&self, session_id: &str) {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            session.close();
            info!(
                "Destroyed PTY session {} for container {}",
                session_id, session.container_id
            );
            if let Some(hook) = self.destroyed_hook.read().clone() {
                (*hook)(&session.container_id, session_id);
            }
        }
    }

    /// Force-close every session belonging to a container (stop/die/destroy).
    pub fn close_for_container(&self, container_id: &str) {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().container_id == container_id)
            .map(|entry| entry.key().clone())
            .collect();

        for id in ids {
            self.destroy_session(&id);
        }
    }

    /// Close everything (shutdown).
    pub fn close_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.destroy_session(&id);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Spawn the idle sweeper: evicts sessions past the idle window and
    /// reaps sessions whose I/O tasks already stopped.
    pub fn spawn_idle_sweeper(self: &Arc<Self>, cancel: CancellationToken) {
        let manager = Arc::downgrade(self);
        let idle_timeout = self.config.idle_timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(manager) = manager.upgrade() else { break };

                let expired: Vec<String> = manager
                    .sessions
                    .iter()
                    .filter(|entry| {
                        let session = entry.value();
                        !session.is_running()
                            || session.idle_secs() >= idle_timeout.as_secs()
                    })
                    .map(|entry| entry.key().clone())
                    .collect();

                for id in expired {
                    debug!("Idle sweep evicting PTY session {}", id);
                    manager.destroy_session(&id);
                }
            }
            info!("PTY idle sweeper stopped");
        });
    }
}

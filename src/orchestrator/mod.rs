//! Container orchestrator
//!
//! Creates, starts, stops, and removes workspace containers; runs the
//! clone/inject/bootstrap init pipeline; manages published ports and proxy
//! routing; and keeps record status reconciled with the engine.

mod init;
mod reconciler;

pub use reconciler::spawn_reconcilers;

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::crypto::Crypto;
use crate::database::{
    ContainerRecord, ContainerStatus, CredentialKind, Database, InitStatus, PortRecord,
    ResourceLimits,
};
use crate::docker::{DockerService, EngineContainerSpec, ExecOutput, CONTAINER_ID_LABEL, MANAGED_LABEL};
use crate::error::{ApiError, InvalidInputKind, Result};
use crate::events::EventBus;
use crate::monitor::MonitorManager;
use crate::proxy::{ProxyManager, PROXY_NETWORK};
use crate::pty::PtyManager;
use crate::templates::CONTAINER_HOME;

/// Graceful engine stop deadline, seconds.
const STOP_DEADLINE_SECS: i64 = 30;

/// Workspace user inside containers.
const CONTAINER_USER: &str = "dev";

/// Default workspace root.
const WORKSPACE_ROOT: &str = "/workspace";

/// Container creation request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateContainerSpec {
    pub name: String,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub limits: ResourceLimits,
    /// Per-spec env overrides, merged over the referenced profile
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub env_profile_id: Option<String>,
    #[serde(default)]
    pub startup_profile_id: Option<String>,
    #[serde(default)]
    pub github_token_id: Option<String>,
    #[serde(default)]
    pub yolo: bool,
    #[serde(default)]
    pub template_ids: Vec<String>,
    /// Internal port exposed via subdomain routing, if any
    #[serde(default)]
    pub domain_port: Option<u16>,
}

pub struct Orchestrator {
    pub(crate) db: Arc<Database>,
    pub(crate) docker: DockerService,
    pub(crate) crypto: Crypto,
    pub(crate) config: Arc<Config>,
    pub(crate) bus: EventBus,
    pub(crate) pty: Arc<PtyManager>,
    pub(crate) proxy: Arc<ProxyManager>,
    pub(crate) monitor: Arc<MonitorManager>,
    /// In-flight init pipelines by container id
    init_cancels: DashMap<String, CancellationToken>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        docker: DockerService,
        crypto: Crypto,
        config: Arc<Config>,
        bus: EventBus,
        pty: Arc<PtyManager>,
        proxy: Arc<ProxyManager>,
        monitor: Arc<MonitorManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            docker,
            crypto,
            config,
            bus,
            pty,
            proxy,
            monitor,
            init_cancels: DashMap::new(),
        })
    }

    /// Create a container: validate, create the engine container with
    /// security defaults, persist the record (compensating engine removal on
    /// persistence failure), then run the init pipeline asynchronously.
    pub async fn create(self: &Arc<Self>, spec: CreateContainerSpec) -> Result<ContainerRecord> {
        validate_name(&spec.name)?;
        validate_limits(&spec.limits)?;
        validate_env_overrides(&spec.env)?;

        {
            let conn = self.db.conn().await;
            if self.db.containers.get_by_name(&conn, &spec.name)?.is_some() {
                return Err(ApiError::AlreadyExists(format!(
                    "container name {}",
                    spec.name
                )));
            }
        }

        // A requested clone needs a usable token before any engine work
        let github_token_id = if spec.repo_url.is_some() {
            Some(self.resolve_github_token_id(spec.github_token_id.as_deref()).await?)
        } else {
            None
        };

        let repo_name = spec.repo_url.as_deref().map(repo_name_from_url);
        let workdir = spec.workdir.clone().unwrap_or_else(|| match &repo_name {
            Some(repo_name) => format!("{}/{}", WORKSPACE_ROOT, repo_name),
            None => WORKSPACE_ROOT.to_string(),
        });
        validate_workdir(&workdir)?;

        let env = self.materialize_env(&spec).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let mut labels = HashMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (CONTAINER_ID_LABEL.to_string(), id.clone()),
        ]);
        if let Some(port) = spec.domain_port {
            labels.extend(self.proxy.subdomain_labels(&spec.name, port));
        }

        let engine_spec = EngineContainerSpec {
            name: spec.name.clone(),
            image: self.config.base_image.clone(),
            env,
            labels,
            network: PROXY_NETWORK.to_string(),
            workdir: WORKSPACE_ROOT.to_string(),
            user: CONTAINER_USER.to_string(),
            memory_bytes: spec
                .limits
                .memory_mib
                .filter(|m| *m > 0)
                .map(|m| (m * 1024 * 1024) as i64),
            cpu_quota_us: cpu_quota(&spec.limits),
            cpu_period_us: cpu_period(&spec.limits),
            port_bindings: HashMap::new(),
        };

        let docker_id = self.docker.create_container(&engine_spec).await?;

        let record = ContainerRecord {
            id: id.clone(),
            docker_id: Some(docker_id.clone()),
            name: spec.name.clone(),
            status: ContainerStatus::Created,
            init_status: InitStatus::Pending,
            init_error: None,
            repo_url: spec.repo_url.clone(),
            repo_name,
            workdir,
            yolo: spec.yolo,
            limits: spec.limits,
            env_profile_id: spec.env_profile_id.clone(),
            startup_profile_id: spec.startup_profile_id.clone(),
            injection_result: None,
            created_at: chrono::Utc::now().timestamp(),
            updated_at: chrono::Utc::now().timestamp(),
            initialized_at: None,
        };

        {
            let conn = self.db.conn().await;
            if let Err(e) = self.db.containers.insert(&conn, &record) {
                drop(conn);
                // Compensating action: the engine container must not outlive
                // a failed record write.
                error!("Record insert failed for {}; removing engine container", spec.name);
                if let Err(remove_err) = self.docker.remove_container(&docker_id, true).await {
                    warn!("Compensating removal failed: {}", remove_err);
                }
                return Err(ApiError::Internal(format!("record persist failed: {}", e)));
            }

            if let Some(port) = spec.domain_port {
                let _ = self.db.ports.insert(
                    &conn,
                    &PortRecord {
                        container_id: id.clone(),
                        port,
                        name: Some("web".to_string()),
                        protocol: "tcp".to_string(),
                        auto_created: true,
                        created_at: 0,
                    },
                );
            }
        }

        self.bus.publish_status(&id, ContainerStatus::Created.as_str());
        self.spawn_init(id.clone(), spec.template_ids.clone(), github_token_id);

        let conn = self.db.conn().await;
        self.db
            .containers
            .get(&conn, &id)?
            .ok_or_else(|| ApiError::Internal("freshly created record vanished".into()))
    }

    /// Register and launch the init pipeline task for a container.
    fn spawn_init(
        self: &Arc<Self>,
        container_id: String,
        template_ids: Vec<String>,
        github_token_id: Option<String>,
    ) {
        let cancel = CancellationToken::new();
        self.init_cancels.insert(container_id.clone(), cancel.clone());

        let orch = self.clone();
        tokio::spawn(async move {
            init::run(orch.clone(), container_id.clone(), template_ids, github_token_id, cancel)
                .await;
            orch.init_cancels.remove(&container_id);
        });
    }

    /// Cancel an in-flight init pipeline, if any.
    pub fn cancel_init(&self, container_id: &str) {
        if let Some((_, cancel)) = self.init_cancels.remove(container_id) {
            cancel.cancel();
        }
    }

    pub fn init_in_flight(&self, container_id: &str) -> bool {
        self.init_cancels.contains_key(container_id)
    }

    pub async fn get(&self, id: &str) -> Result<ContainerRecord> {
        let conn = self.db.conn().await;
        self.db
            .containers
            .get(&conn, id)?
            .ok_or_else(|| ApiError::NotFound(format!("container {}", id)))
    }

    pub async fn list(&self) -> Result<Vec<ContainerRecord>> {
        let conn = self.db.conn().await;
        Ok(self.db.containers.all(&conn)?)
    }

    /// Restart a stopped container. First boot is the create-time
    /// auto-start; this path demands a completed init.
    pub async fn start(&self, id: &str) -> Result<()> {
        let record = self.get(id).await?;

        if record.init_status != InitStatus::Ready {
            return Err(ApiError::PreconditionFailed(format!(
                "container init status is {}, not ready",
                record.init_status
            )));
        }

        let docker_id = require_docker_id(&record)?;
        self.docker.start_container(&docker_id).await?;
        self.set_status(id, ContainerStatus::Running).await?;
        info!("Started container {}", record.name);
        Ok(())
    }

    /// Graceful stop; cancels any in-flight init first.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let record = self.get(id).await?;
        self.cancel_init(id);

        let docker_id = require_docker_id(&record)?;
        self.docker
            .stop_container(&docker_id, STOP_DEADLINE_SECS)
            .await?;

        self.pty.close_for_container(id);
        self.set_status(id, ContainerStatus::Stopped).await?;
        info!("Stopped container {}", record.name);
        Ok(())
    }

    /// Remove: cancel init, best-effort engine removal, cascade cleanup,
    /// delete the record.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let record = self.get(id).await?;
        self.cancel_init(id);
        self.pty.close_for_container(id);

        if let Some(docker_id) = &record.docker_id {
            if let Err(e) = self.docker.remove_container(docker_id, true).await {
                warn!(
                    "Engine removal of container {} failed (continuing): {}",
                    record.name, e
                );
            }
        }

        self.proxy.remove_container_routes(&record.name);
        if let Err(e) = self.monitor.remove_container(id).await {
            warn!("Monitor cleanup for {} failed: {}", record.name, e);
        }

        {
            let conn = self.db.conn().await;
            self.db.ports.delete_for_container(&conn, id)?;
            self.db.tasks.clear(&conn, id)?;
            self.db.init_logs.delete_for_container(&conn, id)?;
            self.db.containers.delete(&conn, id)?;
        }

        self.bus.publish_status(id, ContainerStatus::Deleted.as_str());
        info!("Removed container {}", record.name);
        Ok(())
    }

    /// Run a command in the container and collect its output.
    pub async fn exec(&self, id: &str, argv: Vec<String>) -> Result<ExecOutput> {
        if argv.is_empty() {
            return Err(ApiError::invalid(InvalidInputKind::Other, "empty argv"));
        }

        let record = self.get(id).await?;
        let docker_id = require_docker_id(&record)?;
        if !self.docker.is_running(&docker_id).await? {
            return Err(ApiError::PreconditionFailed(format!(
                "container {} is not running",
                record.name
            )));
        }

        self.docker
            .exec_collect(&docker_id, argv, Some(record.workdir.as_str()), None)
            .await
    }

    pub async fn list_ports(&self, id: &str) -> Result<Vec<PortRecord>> {
        self.get(id).await?;
        let conn = self.db.conn().await;
        Ok(self.db.ports.list(&conn, id)?)
    }

    /// Publish a port on a container. Direct-range ports route through the
    /// proxy immediately; others are persisted and become engine bindings on
    /// the next recreate.
    pub async fn add_port(
        &self,
        id: &str,
        port: u16,
        name: Option<String>,
        protocol: Option<String>,
    ) -> Result<PortRecord> {
        let record = self.get(id).await?;

        {
            let conn = self.db.conn().await;
            if self.db.ports.get(&conn, id, port)?.is_some() {
                return Err(ApiError::AlreadyExists(format!(
                    "port {} on container {}",
                    port, record.name
                )));
            }
            self.db.ports.insert(
                &conn,
                &PortRecord {
                    container_id: id.to_string(),
                    port,
                    name,
                    protocol: protocol.unwrap_or_else(|| "tcp".to_string()),
                    auto_created: false,
                    created_at: 0,
                },
            )?;
        }

        if self.proxy.in_direct_range(port) {
            let docker_id = require_docker_id(&record)?;
            let ip = self
                .docker
                .container_ip(&docker_id, PROXY_NETWORK)
                .await?
                .ok_or_else(|| {
                    ApiError::PreconditionFailed(format!(
                        "container {} has no address on the proxy network",
                        record.name
                    ))
                })?;
            self.proxy.write_direct_route(&record.name, &ip, port)?;
        }

        let conn = self.db.conn().await;
        self.db
            .ports
            .get(&conn, id, port)?
            .ok_or_else(|| ApiError::Internal("freshly inserted port vanished".into()))
    }

    pub async fn remove_port(&self, id: &str, port: u16) -> Result<()> {
        let record = self.get(id).await?;

        let deleted = {
            let conn = self.db.conn().await;
            self.db.ports.delete(&conn, id, port)?
        };
        if !deleted {
            return Err(ApiError::NotFound(format!(
                "port {} on container {}",
                port, record.name
            )));
        }

        self.proxy.remove_direct_route(&record.name, port);
        Ok(())
    }

    /// Rewrite the status field from the engine's view. Returns the fresh
    /// status when it changed.
    pub async fn reconcile_container(&self, record: &ContainerRecord) -> Result<Option<ContainerStatus>> {
        let Some(docker_id) = &record.docker_id else {
            return Ok(None);
        };

        let observed = self.docker.container_status(docker_id).await?;
        if observed == record.status {
            return Ok(None);
        }

        self.set_status(&record.id, observed).await?;

        // A container that left the running state takes its PTYs with it
        if observed != ContainerStatus::Running {
            self.pty.close_for_container(&record.id);
        }

        Ok(Some(observed))
    }

    /// One reconciliation pass over every known container plus the orphan
    /// port sweep.
    pub async fn reconcile_once(&self) {
        let records = {
            let conn = self.db.conn().await;
            match self.db.containers.all(&conn) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Reconcile could not list containers: {}", e);
                    return;
                }
            }
        };

        for record in records {
            match self.reconcile_container(&record).await {
                Ok(Some(status)) => {
                    info!(
                        "Reconciled container {}: {} -> {}",
                        record.name, record.status, status
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Reconcile failed for container {}: {}", record.name, e);
                }
            }
        }

        let conn = self.db.conn().await;
        match self.db.ports.sweep_orphans(&conn) {
            Ok(0) => {}
            Ok(swept) => info!("Swept {} orphaned port records", swept),
            Err(e) => warn!("Orphan port sweep failed: {}", e),
        }
    }

    /// Engine-event entry point: map an engine container id to a record and
    /// apply the observed transition.
    pub async fn handle_engine_event(&self, event: crate::docker::EngineEvent) {
        use crate::docker::EngineEvent;

        let (docker_id, status) = match &event {
            EngineEvent::Started { docker_id } => (docker_id, ContainerStatus::Running),
            EngineEvent::Stopped { docker_id } | EngineEvent::Died { docker_id } => {
                (docker_id, ContainerStatus::Stopped)
            }
            EngineEvent::Destroyed { docker_id } => (docker_id, ContainerStatus::Deleted),
            EngineEvent::Resync => {
                self.reconcile_once().await;
                return;
            }
        };

        let record = {
            let conn = self.db.conn().await;
            match self.db.containers.get_by_docker_id(&conn, docker_id) {
                Ok(Some(record)) => record,
                Ok(None) => return,
                Err(e) => {
                    warn!("Engine event lookup failed: {}", e);
                    return;
                }
            }
        };

        if status != ContainerStatus::Running {
            self.pty.close_for_container(&record.id);
        }
        if record.status != status {
            let _ = self.set_status(&record.id, status).await;
        }
    }

    pub(crate) async fn set_status(&self, id: &str, status: ContainerStatus) -> Result<()> {
        {
            let conn = self.db.conn().await;
            self.db.containers.set_status(&conn, id, status)?;
        }
        self.bus.publish_status(id, status.as_str());
        Ok(())
    }

    async fn resolve_github_token_id(&self, explicit: Option<&str>) -> Result<String> {
        let conn = self.db.conn().await;
        if let Some(id) = explicit {
            return self
                .db
                .credentials
                .get(&conn, CredentialKind::GithubToken, id)?
                .map(|record| record.id)
                .ok_or_else(|| ApiError::NotFound(format!("github token {}", id)));
        }

        self.db
            .credentials
            .get_default(&conn, CredentialKind::GithubToken)?
            .map(|record| record.id)
            .ok_or_else(|| {
                ApiError::PreconditionFailed(
                    "repository clone requested but no GitHub token is configured".into(),
                )
            })
    }

    /// Env vars for the engine: referenced profile first, per-spec overrides
    /// on top, plus the workspace defaults.
    async fn materialize_env(&self, spec: &CreateContainerSpec) -> Result<Vec<String>> {
        let mut merged: HashMap<String, String> = HashMap::new();

        if let Some(profile_id) = &spec.env_profile_id {
            let conn = self.db.conn().await;
            let profile = self
                .db
                .credentials
                .get(&conn, CredentialKind::EnvProfile, profile_id)?
                .ok_or_else(|| ApiError::NotFound(format!("env profile {}", profile_id)))?;

            let vars: HashMap<String, String> =
                serde_json::from_str(&profile.payload).map_err(|_| {
                    ApiError::invalid(
                        InvalidInputKind::EnvVarFormat,
                        format!("env profile {} payload is not a string map", profile.name),
                    )
                })?;
            merged.extend(vars);
        }

        merged.extend(spec.env.clone());
        merged.insert("HOME".to_string(), CONTAINER_HOME.to_string());
        merged.insert("TERM".to_string(), "xterm-256color".to_string());

        let mut env: Vec<String> = merged
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        env.sort();
        Ok(env)
    }
}

fn require_docker_id(record: &ContainerRecord) -> Result<String> {
    record
        .docker_id
        .clone()
        .ok_or_else(|| ApiError::PreconditionFailed(format!(
            "container {} has no engine container",
            record.name
        )))
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');

    if !valid {
        return Err(ApiError::invalid(
            InvalidInputKind::Other,
            "name must be 1-63 lowercase alphanumeric characters or dashes",
        ));
    }
    Ok(())
}

/// Resource validation: cores ∈ (0, 64], memory MiB ≤ 131072, period 0 or
/// within [1000, 1000000] µs, derived quota at least 1000 µs.
fn validate_limits(limits: &ResourceLimits) -> Result<()> {
    if let Some(cores) = limits.cpu_cores {
        if !(cores > 0.0 && cores <= 64.0) {
            return Err(ApiError::invalid(
                InvalidInputKind::ResourceLimit,
                "cpu cores must be within (0, 64]",
            ));
        }
    }

    if let Some(memory) = limits.memory_mib {
        if memory > 131_072 {
            return Err(ApiError::invalid(
                InvalidInputKind::ResourceLimit,
                "memory must be at most 131072 MiB",
            ));
        }
    }

    if let Some(period) = limits.cpu_period_us {
        if period != 0 && !(1_000..=1_000_000).contains(&period) {
            return Err(ApiError::invalid(
                InvalidInputKind::ResourceLimit,
                "cpu period must be 0 or within [1000, 1000000] microseconds",
            ));
        }
    }

    if let Some(quota) = cpu_quota(limits) {
        if quota < 1_000 {
            return Err(ApiError::invalid(
                InvalidInputKind::ResourceLimit,
                "cpu quota derived from cores and period is below 1000 microseconds",
            ));
        }
    }

    Ok(())
}

fn validate_env_overrides(env: &HashMap<String, String>) -> Result<()> {
    for key in env.keys() {
        let valid = !key.is_empty()
            && !key.contains('=')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !key.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true);
        if !valid {
            return Err(ApiError::invalid(
                InvalidInputKind::EnvVarFormat,
                format!("invalid environment variable name {:?}", key),
            ));
        }
    }
    Ok(())
}

fn validate_workdir(workdir: &str) -> Result<()> {
    if !workdir.starts_with('/') || workdir.split('/').any(|part| part == "..") {
        return Err(ApiError::invalid(
            InvalidInputKind::PathTraversal,
            format!("invalid workdir {:?}", workdir),
        ));
    }
    Ok(())
}

fn cpu_period(limits: &ResourceLimits) -> Option<i64> {
    match (limits.cpu_cores, limits.cpu_period_us) {
        (Some(_), Some(period)) if period > 0 => Some(period as i64),
        (Some(_), _) => Some(100_000),
        _ => None,
    }
}

fn cpu_quota(limits: &ResourceLimits) -> Option<i64> {
    let cores = limits.cpu_cores?;
    let period = cpu_period(limits)? as f64;
    Some((cores * period) as i64)
}

/// Derive a repository name from its URL: last path segment, `.git` removed.
fn repo_name_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("repo")
        .trim_end_matches(".git")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_name_from_url() {
        assert_eq!(repo_name_from_url("https://github.com/acme/app"), "app");
        assert_eq!(repo_name_from_url("https://github.com/acme/app.git"), "app");
        assert_eq!(repo_name_from_url("https://github.com/acme/app/"), "app");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("dev1").is_ok());
        assert!(validate_name("my-container-2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("trailing-").is_err());
        assert!(validate_name("Upper").is_err());
        assert!(validate_name("spa ce").is_err());
    }

    #[test]
    fn test_validate_limits() {
        let ok = ResourceLimits {
            cpu_cores: Some(2.0),
            memory_mib: Some(4096),
            cpu_period_us: Some(100_000),
        };
        assert!(validate_limits(&ok).is_ok());

        assert!(validate_limits(&ResourceLimits {
            cpu_cores: Some(0.0),
            ..Default::default()
        })
        .is_err());
        assert!(validate_limits(&ResourceLimits {
            cpu_cores: Some(65.0),
            ..Default::default()
        })
        .is_err());
        assert!(validate_limits(&ResourceLimits {
            memory_mib: Some(131_073),
            ..Default::default()
        })
        .is_err());
        assert!(validate_limits(&ResourceLimits {
            cpu_period_us: Some(500),
            ..Default::default()
        })
        .is_err());
        // Period of zero means "engine default"
        assert!(validate_limits(&ResourceLimits {
            cpu_cores: Some(1.0),
            cpu_period_us: Some(0),
            ..Default::default()
        })
        .is_ok());
        // Tiny core fraction drives the quota below the engine minimum
        assert!(validate_limits(&ResourceLimits {
            cpu_cores: Some(0.001),
            cpu_period_us: Some(100_000),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_cpu_translation() {
        let limits = ResourceLimits {
            cpu_cores: Some(2.0),
            memory_mib: None,
            cpu_period_us: None,
        };
        assert_eq!(cpu_period(&limits), Some(100_000));
        assert_eq!(cpu_quota(&limits), Some(200_000));

        let custom = ResourceLimits {
            cpu_cores: Some(0.5),
            memory_mib: None,
            cpu_period_us: Some(50_000),
        };
        assert_eq!(cpu_quota(&custom), Some(25_000));

        assert_eq!(cpu_quota(&ResourceLimits::default()), None);
    }

    #[test]
    fn test_validate_env_overrides() {
        let mut env = HashMap::new();
        env.insert("DEBUG".to_string(), "1".to_string());
        env.insert("MY_VAR_2".to_string(), "x".to_string());
        assert!(validate_env_overrides(&env).is_ok());

        let mut bad = HashMap::new();
        bad.insert("1LEADING".to_string(), "x".to_string());
        assert!(validate_env_overrides(&bad).is_err());

        let mut worse = HashMap::new();
        worse.insert("HAS=EQUALS".to_string(), "x".to_string());
        assert!(validate_env_overrides(&worse).is_err());
    }

    #[test]
    fn test_validate_workdir() {
        assert!(validate_workdir("/workspace/app").is_ok());
        assert!(validate_workdir("relative/path").is_err());
        assert!(validate_workdir("/workspace/../etc").is_err());
    }
}

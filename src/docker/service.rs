//! Docker engine wrapper
//!
//! Every engine interaction goes through this service: container lifecycle
//! with the daemon's security defaults, exec (TTY and collected), tar copy
//! in/out, networks, and image management.

use std::collections::HashMap;

use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, ListContainersOptions,
    LogsOptions, RemoveContainerOptions, StatsOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerStateStatusEnum, HostConfig, PortBinding};
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::database::ContainerStatus;
use crate::error::{ApiError, Result};

use super::MANAGED_LABEL;

/// Everything the engine needs to create a workspace container.
#[derive(Debug, Clone)]
pub struct EngineContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub network: String,
    pub workdir: String,
    pub user: String,
    pub memory_bytes: Option<i64>,
    pub cpu_quota_us: Option<i64>,
    pub cpu_period_us: Option<i64>,
    /// container port -> host port
    pub port_bindings: HashMap<u16, u16>,
}

/// Output of a collected (non-TTY) exec.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One-shot container resource usage.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub pids: u64,
}

/// A TTY-attached exec: the raw bidirectional stream plus the exec id used
/// for resizes.
pub struct TtyExec {
    pub exec_id: String,
    pub results: StartExecResults,
}

#[derive(Clone)]
pub struct DockerService {
    client: std::sync::Arc<Docker>,
}

impl DockerService {
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| {
                error!("failed to connect to engine: {}", e);
                ApiError::UpstreamUnavailable("container engine unreachable".into())
            })?;
        Ok(Self {
            client: std::sync::Arc::new(client),
        })
    }

    pub fn client(&self) -> &Docker {
        &self.client
    }

    pub async fn ping(&self) -> Result<()> {
        self.client.ping().await?;
        Ok(())
    }

    /// Ensure an image is present locally, pulling it if necessary.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        match self.client.inspect_image(image).await {
            Ok(_) => {
                debug!("Image {} already exists", image);
                return Ok(());
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                info!("Image {} not found, pulling...", image);
            }
            Err(e) => {
                warn!("Error inspecting image {}: {}", image, e);
            }
        }

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!("Pull {}: {}", image, status);
                    }
                }
                Err(e) => {
                    error!("Failed to pull image {}: {}", image, e);
                    return Err(ApiError::UpstreamUnavailable(format!(
                        "image pull failed for {}",
                        image
                    )));
                }
            }
        }

        info!("Successfully pulled image {}", image);
        Ok(())
    }

    /// Create a workspace container with the daemon's security defaults:
    /// every capability dropped, no privilege escalation, never a socket
    /// mount. Returns the engine container id.
    pub async fn create_container(&self, spec: &EngineContainerSpec) -> Result<String> {
        self.ensure_image(&spec.image).await?;

        let mut exposed_ports = HashMap::new();
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for (container_port, host_port) in &spec.port_bindings {
            let key = format!("{}/tcp", container_port);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }

        let host_config = HostConfig {
            memory: spec.memory_bytes,
            cpu_quota: spec.cpu_quota_us,
            cpu_period: spec.cpu_period_us,
            network_mode: Some(spec.network.clone()),
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            ..Default::default()
        };

        let config = Config {
            hostname: Some(spec.name.clone()),
            image: Some(spec.image.clone()),
            user: Some(spec.user.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            working_dir: Some(spec.workdir.clone()),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(true),
            tty: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 409, ..
                } => ApiError::AlreadyExists(format!("container name {}", spec.name)),
                other => other.into(),
            })?;

        info!("Created engine container {} ({})", spec.name, response.id);
        Ok(response.id)
    }

    pub async fn start_container(&self, docker_id: &str) -> Result<()> {
        self.client
            .start_container::<String>(docker_id, None)
            .await?;
        Ok(())
    }

    /// Graceful stop with a deadline in seconds.
    pub async fn stop_container(&self, docker_id: &str, deadline_secs: i64) -> Result<()> {
        let options = StopContainerOptions { t: deadline_secs };
        match self.client.stop_container(docker_id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove_container(&self, docker_id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };
        match self.client.remove_container(docker_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already gone", docker_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Engine-observed status mapped to the record status vocabulary.
    /// Returns `Deleted` when the engine no longer knows the container.
    pub async fn container_status(&self, docker_id: &str) -> Result<ContainerStatus> {
        let inspect = match self.client.inspect_container(docker_id, None).await {
            Ok(inspect) => inspect,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(ContainerStatus::Deleted),
            Err(e) => return Err(e.into()),
        };

        let status = inspect
            .state
            .and_then(|s| s.status)
            .map(|s| match s {
                ContainerStateStatusEnum::RUNNING | ContainerStateStatusEnum::RESTARTING => {
                    ContainerStatus::Running
                }
                ContainerStateStatusEnum::CREATED => ContainerStatus::Created,
                ContainerStateStatusEnum::REMOVING | ContainerStateStatusEnum::DEAD => {
                    ContainerStatus::Deleted
                }
                _ => ContainerStatus::Stopped,
            })
            .unwrap_or(ContainerStatus::Stopped);

        Ok(status)
    }

    pub async fn is_running(&self, docker_id: &str) -> Result<bool> {
        Ok(self.container_status(docker_id).await? == ContainerStatus::Running)
    }

    /// IP of the container on the given bridge network, if attached.
    pub async fn container_ip(&self, docker_id: &str, network: &str) -> Result<Option<String>> {
        let inspect = self.client.inspect_container(docker_id, None).await?;
        Ok(inspect
            .network_settings
            .and_then(|ns| ns.networks)
            .and_then(|mut networks| networks.remove(network))
            .and_then(|ep| ep.ip_address)
            .filter(|ip| !ip.is_empty()))
    }

    /// List engine ids of all containers carrying the managed label.
    pub async fn list_managed(&self) -> Result<Vec<(String, ContainerStatus)>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}=true", MANAGED_LABEL)],
        );

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let status = match c.state.as_deref() {
                    Some("running") | Some("restarting") => ContainerStatus::Running,
                    Some("created") => ContainerStatus::Created,
                    Some("removing") | Some("dead") => ContainerStatus::Deleted,
                    _ => ContainerStatus::Stopped,
                };
                Some((id, status))
            })
            .collect())
    }

    /// Find a container by exact name; returns its engine id if present.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<String>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![format!("^{}$", name)]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;
        Ok(containers.into_iter().find_map(|c| c.id))
    }

    /// Run a command inside the container and collect its output.
    pub async fn exec_collect(
        &self,
        docker_id: &str,
        cmd: Vec<String>,
        workdir: Option<&str>,
        env: Option<Vec<String>>,
    ) -> Result<ExecOutput> {
        let exec = self
            .client
            .create_exec(
                docker_id,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(cmd),
                    working_dir: workdir.map(|s| s.to_string()),
                    env,
                    ..Default::default()
                },
            )
            .await?;

        let mut output = String::new();
        match self.client.start_exec(&exec.id, None).await? {
            StartExecResults::Attached {
                output: mut stream, ..
            } => {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(log) => {
                            output.push_str(&String::from_utf8_lossy(&log.into_bytes()));
                        }
                        Err(e) => {
                            warn!("exec output stream error: {}", e);
                            break;
                        }
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self.client.inspect_exec(&exec.id).await?;
        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            output,
        })
    }

    /// Allocate a TTY-attached bidirectional exec (the backing stream of a
    /// PTY session).
    pub async fn create_tty_exec(
        &self,
        docker_id: &str,
        cmd: Vec<String>,
        workdir: Option<&str>,
        cols: u16,
        rows: u16,
    ) -> Result<TtyExec> {
        let exec = self
            .client
            .create_exec(
                docker_id,
                CreateExecOptions {
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    cmd: Some(cmd),
                    working_dir: workdir.map(|s| s.to_string()),
                    env: Some(vec![
                        "TERM=xterm-256color".to_string(),
                        "COLORTERM=truecolor".to_string(),
                    ]),
                    ..Default::default()
                },
            )
            .await?;

        let results = self
            .client
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    tty: true,
                    ..Default::default()
                }),
            )
            .await?;

        // Best effort: initial dimensions
        let _ = self
            .client
            .resize_exec(
                &exec.id,
                ResizeExecOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await;

        Ok(TtyExec {
            exec_id: exec.id,
            results,
        })
    }

    pub async fn resize_exec(&self, exec_id: &str, cols: u16, rows: u16) -> Result<()> {
        self.client
            .resize_exec(
                exec_id,
                ResizeExecOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await?;
        Ok(())
    }

    /// Upload an in-memory tar archive to a path inside the container.
    pub async fn upload_tar(&self, docker_id: &str, path: &str, tar: Bytes) -> Result<()> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };
        self.client
            .upload_to_container(docker_id, Some(options), tar)
            .await?;
        Ok(())
    }

    /// Download a path from the container as a tar stream, concatenated.
    pub async fn download_tar(&self, docker_id: &str, path: &str) -> Result<Bytes> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let mut stream = self.client.download_from_container(docker_id, Some(options));

        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buf))
    }

    /// One-shot resource statistics.
    pub async fn container_stats(&self, docker_id: &str) -> Result<ContainerStats> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };

        let mut stream = self.client.stats(docker_id, Some(options));
        let Some(stats) = stream.next().await else {
            return Err(ApiError::UpstreamUnavailable("stats stream empty".into()));
        };
        let stats = stats?;

        let cpu_delta = stats
            .cpu_stats
            .cpu_usage
            .total_usage
            .saturating_sub(stats.precpu_stats.cpu_usage.total_usage);
        let system_delta = stats
            .cpu_stats
            .system_cpu_usage
            .unwrap_or(0)
            .saturating_sub(stats.precpu_stats.system_cpu_usage.unwrap_or(0));
        let online_cpus = stats.cpu_stats.online_cpus.unwrap_or(1);

        let cpu_percent = if system_delta > 0 && online_cpus > 0 {
            (cpu_delta as f64 / system_delta as f64) * online_cpus as f64 * 100.0
        } else {
            0.0
        };

        Ok(ContainerStats {
            cpu_percent,
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
            pids: stats.pids_stats.current.unwrap_or(0),
        })
    }

    /// Tail of the container's own stdout/stderr log.
    pub async fn container_logs(&self, docker_id: &str, tail: usize) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.client.logs(docker_id, Some(options));
        let mut out = String::new();
        while let Some(line) = stream.next().await {
            match line {
                Ok(log) => out.push_str(&String::from_utf8_lossy(&log.into_bytes())),
                Err(e) => {
                    warn!("log stream error: {}", e);
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Create the bridge network if it does not exist. Idempotent.
    pub async fn ensure_network(&self, name: &str) -> Result<()> {
        let networks = self.client.list_networks::<String>(None).await?;
        if networks
            .iter()
            .any(|n| n.name.as_deref() == Some(name))
        {
            return Ok(());
        }

        let options = CreateNetworkOptions {
            name,
            driver: "bridge",
            ..Default::default()
        };
        match self.client.create_network(options).await {
            Ok(_) => {
                info!("Created network {}", name);
                Ok(())
            }
            // Lost a race with another creator
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_output_success() {
        let ok = ExecOutput {
            exit_code: 0,
            output: "done".into(),
        };
        assert!(ok.success());

        let failed = ExecOutput {
            exit_code: 128,
            output: "fatal: repository not found".into(),
        };
        assert!(!failed.success());
    }
}

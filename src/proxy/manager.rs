//! Traefik sidecar lifecycle and routing configuration

use std::collections::HashMap;
use std::path::PathBuf;

use bollard::container::{Config, CreateContainerOptions, RemoveContainerOptions};
use bollard::models::{HostConfig, Mount, MountTypeEnum, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::Config as DaemonConfig;
use crate::docker::DockerService;
use crate::error::{ApiError, Result};

use super::{PROXY_CONTAINER, PROXY_IMAGE, PROXY_NETWORK};

/// Mount point of the dynamic-config directory inside the sidecar.
const DYNAMIC_DIR_MOUNT: &str = "/etc/traefik/dynamic";

#[derive(Debug, Serialize)]
pub struct ProxyStatus {
    pub running: bool,
    pub container_id: Option<String>,
    pub http_port: u16,
    pub dashboard_port: u16,
    pub direct_range: (u16, u16),
}

pub struct ProxyManager {
    docker: DockerService,
    http_port: u16,
    dashboard_port: u16,
    range_start: u16,
    range_end: u16,
    base_domain: Option<String>,
    dynamic_dir: PathBuf,
}

impl ProxyManager {
    pub fn new(docker: DockerService, config: &DaemonConfig) -> Self {
        Self {
            docker,
            http_port: config.traefik.http_port,
            dashboard_port: config.traefik.dashboard_port,
            range_start: config.traefik.port_range_start,
            range_end: config.traefik.port_range_end,
            base_domain: config.base_domain.clone(),
            dynamic_dir: config.traefik_dynamic_dir(),
        }
    }

    pub fn in_direct_range(&self, port: u16) -> bool {
        (self.range_start..=self.range_end).contains(&port)
    }

    /// Ensure the network and sidecar exist and run. Reuses a healthy
    /// sidecar; recreates it when starting fails (e.g. port conflict from a
    /// stale container holding the old configuration).
    pub async fn ensure(&self) -> Result<ProxyStatus> {
        self.docker.ensure_network(PROXY_NETWORK).await?;
        std::fs::create_dir_all(&self.dynamic_dir)
            .map_err(|e| ApiError::Internal(format!("traefik dynamic dir: {}", e)))?;

        if let Some(existing) = self.docker.find_by_name(PROXY_CONTAINER).await? {
            if self.docker.is_running(&existing).await? {
                return self.status().await;
            }

            match self.docker.start_container(&existing).await {
                Ok(()) => return self.status().await,
                Err(e) => {
                    warn!("Existing proxy sidecar failed to start ({}); recreating", e);
                    self.docker.remove_container(&existing, true).await?;
                }
            }
        }

        let id = self.create_sidecar().await?;
        self.docker.start_container(&id).await?;
        info!("Proxy sidecar started ({})", id);
        self.status().await
    }

    async fn create_sidecar(&self) -> Result<String> {
        self.docker.ensure_image(PROXY_IMAGE).await?;

        let mut args = vec![
            "--providers.docker=true".to_string(),
            "--providers.docker.exposedbydefault=false".to_string(),
            format!("--providers.docker.network={}", PROXY_NETWORK),
            format!("--providers.file.directory={}", DYNAMIC_DIR_MOUNT),
            "--providers.file.watch=true".to_string(),
            "--entrypoints.web.address=:80".to_string(),
            "--api.dashboard=true".to_string(),
            "--api.insecure=true".to_string(),
        ];

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed: HashMap<String, HashMap<(), ()>> = HashMap::new();

        let mut bind = |container_port: u16, host_port: u16| {
            let key = format!("{}/tcp", container_port);
            exposed.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
        };

        bind(80, self.http_port);
        bind(8080, self.dashboard_port);

        for port in self.range_start..=self.range_end {
            args.push(format!("--entrypoints.direct-{}.address=:{}", port, port));
            bind(port, port);
        }

        let dynamic_dir = self
            .dynamic_dir
            .canonicalize()
            .unwrap_or_else(|_| self.dynamic_dir.clone());

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: Some(PROXY_NETWORK.to_string()),
            mounts: Some(vec![
                // The only place the socket is ever mounted, read-only
                Mount {
                    target: Some("/var/run/docker.sock".to_string()),
                    source: Some("/var/run/docker.sock".to_string()),
                    typ: Some(MountTypeEnum::BIND),
                    read_only: Some(true),
                    ..Default::default()
                },
                Mount {
                    target: Some(DYNAMIC_DIR_MOUNT.to_string()),
                    source: Some(dynamic_dir.to_string_lossy().to_string()),
                    typ: Some(MountTypeEnum::BIND),
                    read_only: Some(true),
                    ..Default::default()
                },
            ]),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = Config {
            image: Some(PROXY_IMAGE.to_string()),
            cmd: Some(args),
            exposed_ports: Some(exposed),
            labels: Some(HashMap::from([(
                "drydock.sidecar".to_string(),
                "true".to_string(),
            )])),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: PROXY_CONTAINER,
            platform: None,
        };

        let response = self
            .docker
            .client()
            .create_container(Some(options), config)
            .await?;
        Ok(response.id)
    }

    /// Remove the sidecar (shutdown path; best effort).
    pub async fn remove(&self) -> Result<()> {
        if let Some(id) = self.docker.find_by_name(PROXY_CONTAINER).await? {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            let _ = self
                .docker
                .client()
                .remove_container(&id, Some(options))
                .await;
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<ProxyStatus> {
        let container_id = self.docker.find_by_name(PROXY_CONTAINER).await?;
        let running = match &container_id {
            Some(id) => self.docker.is_running(id).await.unwrap_or(false),
            None => false,
        };
        Ok(ProxyStatus {
            running,
            container_id,
            http_port: self.http_port,
            dashboard_port: self.dashboard_port,
            direct_range: (self.range_start, self.range_end),
        })
    }

    /// Create-time labels for subdomain routing of a user container.
    pub fn subdomain_labels(&self, container_name: &str, internal_port: u16) -> HashMap<String, String> {
        let Some(base_domain) = &self.base_domain else {
            return HashMap::new();
        };

        let router = format!("drydock-{}", container_name);
        HashMap::from([
            ("traefik.enable".to_string(), "true".to_string()),
            (
                format!("traefik.http.routers.{}.rule", router),
                format!("Host(`{}.{}`)", container_name, base_domain),
            ),
            (
                format!("traefik.http.routers.{}.entrypoints", router),
                "web".to_string(),
            ),
            (
                format!(
                    "traefik.http.services.{}.loadbalancer.server.port",
                    router
                ),
                internal_port.to_string(),
            ),
        ])
    }

    /// Route a direct-range port to a running container via a file-provider
    /// fragment (labels are immutable after create).
    pub fn write_direct_route(
        &self,
        container_name: &str,
        container_ip: &str,
        port: u16,
    ) -> Result<()> {
        if !self.in_direct_range(port) {
            return Err(ApiError::invalid(
                crate::error::InvalidInputKind::Other,
                format!(
                    "port {} outside the direct range {}-{}",
                    port, self.range_start, self.range_end
                ),
            ));
        }

        let router = format!("direct-{}-{}", container_name, port);

        let mut routers = serde_json::Map::new();
        routers.insert(
            router.clone(),
            json!({
                "rule": "PathPrefix(`/`)",
                "entryPoints": [format!("direct-{}", port)],
                "service": router.clone(),
            }),
        );
        let mut services = serde_json::Map::new();
        services.insert(
            router.clone(),
            json!({
                "loadBalancer": {
                    "servers": [{"url": format!("http://{}:{}", container_ip, port)}]
                }
            }),
        );
        let fragment = json!({"http": {"routers": routers, "services": services}});

        let yaml = serde_yaml::to_string(&fragment)
            .map_err(|e| ApiError::Internal(format!("traefik fragment: {}", e)))?;

        std::fs::create_dir_all(&self.dynamic_dir)
            .map_err(|e| ApiError::Internal(format!("traefik dynamic dir: {}", e)))?;
        std::fs::write(self.fragment_path(container_name, port), yaml)
            .map_err(|e| ApiError::Internal(format!("traefik fragment write: {}", e)))?;
        Ok(())
    }

    pub fn remove_direct_route(&self, container_name: &str, port: u16) {
        let path = self.fragment_path(container_name, port);
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Drop every fragment belonging to a container.
    pub fn remove_container_routes(&self, container_name: &str) {
        let prefix = format!("{}-", container_name);
        let Ok(entries) = std::fs::read_dir(&self.dynamic_dir) else {
            return;
        };
        for entry in entries.flatten() {
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(&prefix)
            {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }

    fn fragment_path(&self, container_name: &str, port: u16) -> PathBuf {
        self.dynamic_dir
            .join(format!("{}-{}.yml", container_name, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager(dir: &std::path::Path) -> ProxyManager {
        ProxyManager {
            docker: DockerService::new().expect("client construction is lazy"),
            http_port: 80,
            dashboard_port: 8081,
            range_start: 30001,
            range_end: 30020,
            base_domain: Some("dev.example.com".to_string()),
            dynamic_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_direct_range() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        assert!(manager.in_direct_range(30001));
        assert!(manager.in_direct_range(30020));
        assert!(!manager.in_direct_range(30000));
        assert!(!manager.in_direct_range(8080));
    }

    #[test]
    fn test_subdomain_labels() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        let labels = manager.subdomain_labels("dev1", 3000);

        assert_eq!(labels.get("traefik.enable").map(String::as_str), Some("true"));
        assert_eq!(
            labels
                .get("traefik.http.routers.drydock-dev1.rule")
                .map(String::as_str),
            Some("Host(`dev1.dev.example.com`)")
        );
        assert_eq!(
            labels
                .get("traefik.http.services.drydock-dev1.loadbalancer.server.port")
                .map(String::as_str),
            Some("3000")
        );
    }

    #[test]
    fn test_direct_route_fragment_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        manager
            .write_direct_route("dev1", "172.18.0.5", 30002)
            .unwrap();
        let path = dir.path().join("dev1-30002.yml");
        assert!(path.exists());

        let rendered = std::fs::read_to_string(&path).unwrap();
        assert!(rendered.contains("direct-30002"));
        assert!(rendered.contains("http://172.18.0.5:30002"));

        manager.remove_direct_route("dev1", 30002);
        assert!(!path.exists());
    }

    #[test]
    fn test_direct_route_rejects_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        assert!(manager.write_direct_route("dev1", "ip", 9999).is_err());
    }

    #[test]
    fn test_remove_container_routes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        manager
            .write_direct_route("dev1", "172.18.0.5", 30001)
            .unwrap();
        manager
            .write_direct_route("dev1", "172.18.0.5", 30002)
            .unwrap();
        manager
            .write_direct_route("dev2", "172.18.0.6", 30003)
            .unwrap();

        manager.remove_container_routes("dev1");
        assert!(!dir.path().join("dev1-30001.yml").exists());
        assert!(!dir.path().join("dev1-30002.yml").exists());
        assert!(dir.path().join("dev2-30003.yml").exists());
    }
}

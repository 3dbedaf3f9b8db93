//! Daemon boot and shutdown
//!
//! Wires the services together: config, database, engine client, proxy
//! sidecar, PTY and monitoring managers, orchestrator, background
//! reconcilers, the engine event loop, and the HTTP server. Shutdown drains
//! in reverse order.

use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use drydock_daemon::config::Config;
use drydock_daemon::crypto::Crypto;
use drydock_daemon::database::Database;
use drydock_daemon::docker::{spawn_event_listener, DockerService};
use drydock_daemon::events::EventBus;
use drydock_daemon::monitor::MonitorManager;
use drydock_daemon::orchestrator::{spawn_reconcilers, Orchestrator};
use drydock_daemon::proxy::ProxyManager;
use drydock_daemon::pty::PtyManager;
use drydock_daemon::router::{build_router, AppState};

pub async fn run() -> Result<()> {
    let config = Arc::new(Config::load().context("configuration")?);
    info!("Data directory: {:?}", config.data_dir);

    let db = Arc::new(Database::open(&config.database_path).context("database")?);
    let crypto = Crypto::new(config.encryption_key.clone());

    let docker = DockerService::new().context("engine client")?;
    if let Err(e) = docker.ping().await {
        warn!("Engine not reachable at boot ({}); continuing degraded", e);
    }

    let bus = EventBus::new();
    let shutdown = CancellationToken::new();

    // Proxy sidecar
    let proxy = Arc::new(ProxyManager::new(docker.clone(), &config));
    if config.traefik.auto_start {
        match proxy.ensure().await {
            Ok(status) => info!(
                "Proxy sidecar ready (http :{}, direct {}-{})",
                status.http_port, status.direct_range.0, status.direct_range.1
            ),
            Err(e) => warn!("Proxy sidecar unavailable: {}", e),
        }
    }

    // PTY manager and its idle sweeper
    let pty = Arc::new(PtyManager::new(docker.clone(), config.pty.clone()));
    pty.spawn_idle_sweeper(shutdown.clone());

    // Monitoring, wired to the PTY manager through hooks and the output
    // callback. Hooks hold a weak reference; ownership flows PTY -> monitor
    // via ids only.
    let monitor = MonitorManager::new(db.clone(), pty.clone(), bus.clone());
    wire_monitor_hooks(&pty, &monitor);

    let orchestrator = Orchestrator::new(
        db.clone(),
        docker.clone(),
        crypto.clone(),
        config.clone(),
        bus.clone(),
        pty.clone(),
        proxy.clone(),
        monitor.clone(),
    );

    // Absorb engine drift from downtime, then reattach monitoring
    orchestrator.reconcile_once().await;
    if let Err(e) = monitor.restore().await {
        warn!("Monitoring restoration failed: {}", e);
    }

    spawn_reconcilers(orchestrator.clone(), shutdown.clone());

    // Engine event loop
    {
        let orchestrator = orchestrator.clone();
        let mut events = spawn_event_listener(docker.clone(), shutdown.clone());
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                orchestrator.handle_engine_event(event).await;
            }
        });
    }

    let state = AppState {
        config: config.clone(),
        db,
        docker,
        orchestrator,
        pty: pty.clone(),
        monitor: monitor.clone(),
        proxy,
        bus,
        crypto,
    };
    let router = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {}", addr))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    // Drain: stop background work, close sessions, cancel monitors
    info!("Shutting down...");
    shutdown.cancel();
    monitor.terminate_all();
    pty.close_all();
    info!("Shutdown complete");

    Ok(())
}

fn wire_monitor_hooks(pty: &Arc<PtyManager>, monitor: &Arc<MonitorManager>) {
    let weak: Weak<MonitorManager> = Arc::downgrade(monitor);
    pty.set_output_callback({
        let weak = weak.clone();
        Arc::new(move |container_id, session_id, bytes| {
            if let Some(monitor) = weak.upgrade() {
                monitor.handle_output(container_id, session_id, bytes);
            }
        })
    });

    pty.set_created_hook({
        let weak = weak.clone();
        Arc::new(move |container_id, session_id| {
            if let Some(monitor) = weak.upgrade() {
                let container_id = container_id.to_string();
                let session_id = session_id.to_string();
                tokio::spawn(async move {
                    monitor
                        .handle_session_created(&container_id, &session_id)
                        .await;
                });
            }
        })
    });

    pty.set_destroyed_hook({
        Arc::new(move |container_id, session_id| {
            if let Some(monitor) = weak.upgrade() {
                monitor.handle_session_destroyed(container_id, session_id);
            }
        })
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("ctrl-c handler failed: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("SIGTERM handler failed: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

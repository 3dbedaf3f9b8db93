//! HTTP router module
//!
//! REST resources under `/api` (bearer-token protected), the terminal and
//! events WebSockets (query-token authenticated), and the public health
//! endpoint.

pub mod handlers;
pub mod middleware;
pub mod websocket;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Config;
use crate::crypto::Crypto;
use crate::database::Database;
use crate::docker::DockerService;
use crate::events::EventBus;
use crate::monitor::MonitorManager;
use crate::orchestrator::Orchestrator;
use crate::proxy::ProxyManager;
use crate::pty::PtyManager;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub docker: DockerService,
    pub orchestrator: Arc<Orchestrator>,
    pub pty: Arc<PtyManager>,
    pub monitor: Arc<MonitorManager>,
    pub proxy: Arc<ProxyManager>,
    pub bus: EventBus,
    pub crypto: Crypto,
}

/// Build the HTTP router with all routes
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/system", get(handlers::system::system_info))
        .route("/auth/me", get(handlers::auth::me))
        .route("/containers", get(handlers::containers::list_containers))
        .route("/containers", post(handlers::containers::create_container))
        .nest("/containers/:container_id", container_routes())
        .route("/automation-logs", get(handlers::automation::query_logs))
        .route("/automation-logs", delete(handlers::automation::cleanup_logs))
        .route("/templates", get(handlers::templates::list_templates))
        .route("/templates", post(handlers::templates::create_template))
        .route("/templates/:template_id", get(handlers::templates::get_template))
        .route("/templates/:template_id", put(handlers::templates::update_template))
        .route(
            "/templates/:template_id",
            delete(handlers::templates::delete_template),
        )
        .nest("/settings", settings_routes())
        .route("/proxy/status", get(handlers::proxy::proxy_status))
        .route("/proxy/ensure", post(handlers::proxy::proxy_ensure))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .route("/healthz", get(handlers::system::health))
        .route("/api/auth/login", post(handlers::auth::login))
        // WebSockets authenticate via query token inside the handler
        .route(
            "/api/containers/:container_id/terminal/ws",
            get(websocket::terminal::terminal_ws),
        )
        .route("/api/events/ws", get(websocket::events::events_ws))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Routes for one container
fn container_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::containers::get_container))
        .route("/", delete(handlers::containers::delete_container))
        .route("/start", post(handlers::containers::start_container))
        .route("/stop", post(handlers::containers::stop_container))
        .route("/exec", post(handlers::containers::exec_container))
        .route("/init-logs", get(handlers::containers::init_logs))
        .route("/stats", get(handlers::containers::container_stats))
        .route("/logs", get(handlers::containers::container_logs))
        .route("/ports", get(handlers::ports::list_ports))
        .route("/ports", post(handlers::ports::add_port))
        .route("/ports/:port", delete(handlers::ports::remove_port))
        .route("/files", get(handlers::files::list_dir))
        .route("/files/content", get(handlers::files::read_file))
        .route("/files/content", post(handlers::files::write_file))
        .route(
            "/terminal/sessions",
            get(handlers::containers::terminal_sessions),
        )
        .route("/monitoring", get(handlers::monitoring::get_config))
        .route("/monitoring", put(handlers::monitoring::update_config))
        .route("/monitoring/enable", post(handlers::monitoring::enable))
        .route("/monitoring/disable", post(handlers::monitoring::disable))
        .route("/tasks", get(handlers::tasks::list_tasks))
        .route("/tasks", post(handlers::tasks::add_task))
        .route("/tasks/next", get(handlers::tasks::next_pending))
        .route("/tasks/reorder", post(handlers::tasks::reorder_tasks))
        .route("/tasks/clear", post(handlers::tasks::clear_tasks))
        .route(
            "/tasks/clear-completed",
            post(handlers::tasks::clear_completed),
        )
        .route(
            "/tasks/complete-current",
            post(handlers::tasks::complete_current),
        )
        .route("/tasks/:task_id", put(handlers::tasks::update_task))
        .route("/tasks/:task_id", delete(handlers::tasks::remove_task))
}

/// Credential store routes, one block per kind
fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/github-tokens", get(handlers::settings::list_github_tokens))
        .route("/github-tokens", post(handlers::settings::create_github_token))
        .route(
            "/github-tokens/:id",
            delete(handlers::settings::delete_github_token),
        )
        .route(
            "/github-tokens/:id/default",
            post(handlers::settings::default_github_token),
        )
        .route("/env-profiles", get(handlers::settings::list_env_profiles))
        .route("/env-profiles", post(handlers::settings::create_env_profile))
        .route(
            "/env-profiles/:id",
            delete(handlers::settings::delete_env_profile),
        )
        .route(
            "/env-profiles/:id/default",
            post(handlers::settings::default_env_profile),
        )
        .route(
            "/startup-profiles",
            get(handlers::settings::list_startup_profiles),
        )
        .route(
            "/startup-profiles",
            post(handlers::settings::create_startup_profile),
        )
        .route(
            "/startup-profiles/:id",
            delete(handlers::settings::delete_startup_profile),
        )
        .route(
            "/startup-profiles/:id/default",
            post(handlers::settings::default_startup_profile),
        )
}

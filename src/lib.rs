//! Drydock Daemon Library
//!
//! Control plane for disposable development containers on a single Docker
//! host: container lifecycle with an async init pipeline, persistent PTY
//! sessions multiplexed to browser clients, and a silence-driven automation
//! engine over terminal output.

pub mod config;
pub mod crypto;
pub mod database;
pub mod docker;
pub mod error;
pub mod events;
pub mod monitor;
pub mod orchestrator;
pub mod proxy;
pub mod pty;
pub mod router;
pub mod templates;

// Re-export commonly used types
pub use config::Config;
pub use database::Database;
pub use docker::DockerService;
pub use error::{ApiError, Result};
pub use events::EventBus;
pub use monitor::MonitorManager;
pub use orchestrator::Orchestrator;
pub use pty::PtyManager;

//! State persistence module
//!
//! SQLite-backed storage for every persistent entity: container records,
//! published ports, init logs, monitoring configs, task queues, automation
//! logs, config templates, and credential stores.

mod automation;
mod containers;
mod credentials;
mod init_logs;
mod monitor;
mod ports;
mod tasks;
mod templates;

pub use automation::{AutomationLogEntry, AutomationLogFilter, AutomationLogStore};
pub use containers::{
    ContainerRecord, ContainerStatus, ContainerStore, InitStatus, InjectionFailure,
    InjectionResult, ResourceLimits,
};
pub use credentials::{CredentialKind, CredentialRecord, CredentialStore};
pub use init_logs::{InitLogEntry, InitLogStore, InitStage};
pub use monitor::{MonitorConfigRecord, MonitorConfigStore, MAX_THRESHOLD_SECS, MIN_THRESHOLD_SECS};
pub use ports::{PortRecord, PortStore};
pub use tasks::{TaskRecord, TaskStatus, TaskStore};
pub use templates::{TemplateRecord, TemplateStore, TemplateType};

use std::path::Path;

use rusqlite::{Connection, Result as SqliteResult};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

/// Database errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("{0}")]
    Other(String),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Main database wrapper
pub struct Database {
    conn: Mutex<Connection>,
    pub containers: ContainerStore,
    pub ports: PortStore,
    pub init_logs: InitLogStore,
    pub monitor_configs: MonitorConfigStore,
    pub tasks: TaskStore,
    pub automation_logs: AutomationLogStore,
    pub templates: TemplateStore,
    pub credentials: CredentialStore,
}

impl Database {
    /// Open or create the database
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        Self::init_tables(&conn)?;

        info!("Database opened at {:?}", path);

        Ok(Self::with_connection(conn))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::init_tables(&conn)?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            containers: ContainerStore::new(),
            ports: PortStore::new(),
            init_logs: InitLogStore::new(),
            monitor_configs: MonitorConfigStore::new(),
            tasks: TaskStore::new(),
            automation_logs: AutomationLogStore::new(),
            templates: TemplateStore::new(),
            credentials: CredentialStore::new(),
        }
    }

    /// Acquire the connection. Store methods take the guard by reference;
    /// callers keep critical sections short and never hold the guard across
    /// engine or network calls.
    pub async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Initialize database tables
    fn init_tables(conn: &Connection) -> SqliteResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS containers (
                id TEXT PRIMARY KEY,
                docker_id TEXT,
                name TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'created',
                init_status TEXT NOT NULL DEFAULT 'pending',
                init_error TEXT,
                repo_url TEXT,
                repo_name TEXT,
                workdir TEXT NOT NULL,
                yolo INTEGER NOT NULL DEFAULT 0,
                cpu_cores REAL,
                memory_mib INTEGER,
                cpu_period_us INTEGER,
                env_profile_id TEXT,
                startup_profile_id TEXT,
                injection_result TEXT,
                created_at INTEGER DEFAULT (strftime('%s', 'now')),
                updated_at INTEGER DEFAULT (strftime('%s', 'now')),
                initialized_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS container_ports (
                container_id TEXT NOT NULL,
                port INTEGER NOT NULL,
                name TEXT,
                protocol TEXT NOT NULL DEFAULT 'tcp',
                auto_created INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER DEFAULT (strftime('%s', 'now')),
                PRIMARY KEY (container_id, port)
            );

            CREATE TABLE IF NOT EXISTS init_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                container_id TEXT NOT NULL,
                level TEXT NOT NULL,
                stage TEXT NOT NULL,
                message TEXT NOT NULL,
                timestamp INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_init_logs_container
                ON init_logs(container_id, timestamp);

            CREATE TABLE IF NOT EXISTS monitor_configs (
                container_id TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL DEFAULT 0,
                threshold_secs INTEGER NOT NULL DEFAULT 30,
                buffer_bytes INTEGER NOT NULL DEFAULT 8192,
                strategy TEXT NOT NULL DEFAULT 'webhook',
                params TEXT NOT NULL DEFAULT '{}',
                updated_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                container_id TEXT NOT NULL,
                order_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at INTEGER DEFAULT (strftime('%s', 'now')),
                started_at INTEGER,
                completed_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_container
                ON tasks(container_id, order_index);

            CREATE TABLE IF NOT EXISTS automation_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                container_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                strategy TEXT NOT NULL,
                action TEXT NOT NULL,
                command TEXT,
                context_snippet TEXT,
                ai_response TEXT,
                success INTEGER NOT NULL DEFAULT 1,
                error TEXT,
                timestamp INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_automation_logs_container
                ON automation_logs(container_id, timestamp);

            CREATE INDEX IF NOT EXISTS idx_automation_logs_timestamp
                ON automation_logs(timestamp);

            CREATE TABLE IF NOT EXISTS config_templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                template_type TEXT NOT NULL,
                content TEXT NOT NULL,
                archive TEXT,
                created_at INTEGER DEFAULT (strftime('%s', 'now')),
                updated_at INTEGER DEFAULT (strftime('%s', 'now')),
                UNIQUE (name, template_type)
            );

            CREATE TABLE IF NOT EXISTS github_tokens (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                payload TEXT NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE TABLE IF NOT EXISTS env_profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                payload TEXT NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE TABLE IF NOT EXISTS startup_profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                payload TEXT NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
            "#,
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;
        // All tables present
        for table in [
            "containers",
            "container_ports",
            "init_logs",
            "monitor_configs",
            "tasks",
            "automation_logs",
            "config_templates",
            "github_tokens",
            "env_profiles",
            "startup_profiles",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::open(&path).unwrap();
        drop(db.conn().await);
        assert!(path.exists());
    }
}

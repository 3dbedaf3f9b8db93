//! Container record persistence

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{DatabaseError, DatabaseResult};

/// Engine-facing container status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Stopped,
    Deleted,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => ContainerStatus::Running,
            "stopped" => ContainerStatus::Stopped,
            "deleted" => ContainerStatus::Deleted,
            _ => ContainerStatus::Created,
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Init pipeline status; progresses monotonically toward ready or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitStatus {
    Pending,
    Cloning,
    Initializing,
    Ready,
    Failed,
}

impl InitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitStatus::Pending => "pending",
            InitStatus::Cloning => "cloning",
            InitStatus::Initializing => "initializing",
            InitStatus::Ready => "ready",
            InitStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "cloning" => InitStatus::Cloning,
            "initializing" => InitStatus::Initializing,
            "ready" => InitStatus::Ready,
            "failed" => InitStatus::Failed,
            _ => InitStatus::Pending,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            InitStatus::Pending => 0,
            InitStatus::Cloning => 1,
            InitStatus::Initializing => 2,
            InitStatus::Ready | InitStatus::Failed => 3,
        }
    }

    /// Whether `next` is a legal monotone progression from `self`.
    pub fn allows(&self, next: InitStatus) -> bool {
        match self {
            // Terminal states never move
            InitStatus::Ready | InitStatus::Failed => false,
            _ => next.rank() > self.rank() || next == InitStatus::Failed,
        }
    }
}

impl std::fmt::Display for InitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated resource limits attached to a container.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU cores; (0, 64]
    pub cpu_cores: Option<f64>,
    /// Memory in MiB; [0, 131072]
    pub memory_mib: Option<u64>,
    /// CPU period in microseconds; 0 or [1000, 1000000]
    pub cpu_period_us: Option<u64>,
}

/// Outcome of one failed template injection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InjectionFailure {
    pub name: String,
    pub template_type: String,
    pub reason: String,
}

/// Aggregated template-injection outcome persisted on the container record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectionResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<InjectionFailure>,
    pub warnings: Vec<String>,
    pub timestamp: i64,
}

/// Container record
#[derive(Debug, Clone, Serialize)]
pub struct ContainerRecord {
    pub id: String,
    pub docker_id: Option<String>,
    pub name: String,
    pub status: ContainerStatus,
    pub init_status: InitStatus,
    pub init_error: Option<String>,
    pub repo_url: Option<String>,
    pub repo_name: Option<String>,
    pub workdir: String,
    pub yolo: bool,
    pub limits: ResourceLimits,
    pub env_profile_id: Option<String>,
    pub startup_profile_id: Option<String>,
    pub injection_result: Option<InjectionResult>,
    pub created_at: i64,
    pub updated_at: i64,
    pub initialized_at: Option<i64>,
}

/// Store for container records
pub struct ContainerStore;

impl ContainerStore {
    pub fn new() -> Self {
        Self
    }

    pub fn insert(&self, conn: &Connection, record: &ContainerRecord) -> DatabaseResult<()> {
        let injection = record
            .injection_result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO containers
                (id, docker_id, name, status, init_status, init_error,
                 repo_url, repo_name, workdir, yolo,
                 cpu_cores, memory_mib, cpu_period_us,
                 env_profile_id, startup_profile_id, injection_result)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            rusqlite::params![
                record.id,
                record.docker_id,
                record.name,
                record.status.as_str(),
                record.init_status.as_str(),
                record.init_error,
                record.repo_url,
                record.repo_name,
                record.workdir,
                record.yolo as i32,
                record.limits.cpu_cores,
                record.limits.memory_mib.map(|m| m as i64),
                record.limits.cpu_period_us.map(|p| p as i64),
                record.env_profile_id,
                record.startup_profile_id,
                injection,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, conn: &Connection, id: &str) -> DatabaseResult<Option<ContainerRecord>> {
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_BASE))?;
        let record = stmt.query_row([id], row_to_record).optional()?;
        Ok(record)
    }

    pub fn get_by_name(
        &self,
        conn: &Connection,
        name: &str,
    ) -> DatabaseResult<Option<ContainerRecord>> {
        let mut stmt = conn.prepare(&format!("{} WHERE name = ?1", SELECT_BASE))?;
        let record = stmt.query_row([name], row_to_record).optional()?;
        Ok(record)
    }

    pub fn get_by_docker_id(
        &self,
        conn: &Connection,
        docker_id: &str,
    ) -> DatabaseResult<Option<ContainerRecord>> {
        let mut stmt = conn.prepare(&format!("{} WHERE docker_id = ?1", SELECT_BASE))?;
        let record = stmt.query_row([docker_id], row_to_record).optional()?;
        Ok(record)
    }

    pub fn all(&self, conn: &Connection) -> DatabaseResult<Vec<ContainerRecord>> {
        let mut stmt = conn.prepare(&format!("{} ORDER BY created_at DESC", SELECT_BASE))?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn set_docker_id(
        &self,
        conn: &Connection,
        id: &str,
        docker_id: &str,
    ) -> DatabaseResult<()> {
        conn.execute(
            "UPDATE containers SET docker_id = ?2, updated_at = strftime('%s', 'now') WHERE id = ?1",
            rusqlite::params![id, docker_id],
        )?;
        Ok(())
    }

    pub fn set_status(
        &self,
        conn: &Connection,
        id: &str,
        status: ContainerStatus,
    ) -> DatabaseResult<()> {
        conn.execute(
            "UPDATE containers SET status = ?2, updated_at = strftime('%s', 'now') WHERE id = ?1",
            rusqlite::params![id, status.as_str()],
        )?;
        Ok(())
    }

    /// Advance the init status, enforcing the monotone progression. A
    /// transition a terminal status (ready/failed) forbids is rejected.
    pub fn advance_init_status(
        &self,
        conn: &Connection,
        id: &str,
        next: InitStatus,
        error: Option<&str>,
    ) -> DatabaseResult<()> {
        let current: String = conn
            .query_row("SELECT init_status FROM containers WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound(format!("container {}", id)))?;

        let current = InitStatus::parse(&current);
        if !current.allows(next) {
            return Err(DatabaseError::InvalidTransition(format!(
                "init status {} -> {}",
                current, next
            )));
        }

        let initialized_at = if next == InitStatus::Ready {
            Some(chrono::Utc::now().timestamp())
        } else {
            None
        };

        conn.execute(
            r#"
            UPDATE containers
            SET init_status = ?2,
                init_error = ?3,
                initialized_at = COALESCE(?4, initialized_at),
                updated_at = strftime('%s', 'now')
            WHERE id = ?1
            "#,
            rusqlite::params![id, next.as_str(), error, initialized_at],
        )?;
        Ok(())
    }

    pub fn set_injection_result(
        &self,
        conn: &Connection,
        id: &str,
        result: &InjectionResult,
    ) -> DatabaseResult<()> {
        let json = serde_json::to_string(result)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        conn.execute(
            "UPDATE containers SET injection_result = ?2, updated_at = strftime('%s', 'now') WHERE id = ?1",
            rusqlite::params![id, json],
        )?;
        Ok(())
    }

    pub fn delete(&self, conn: &Connection, id: &str) -> DatabaseResult<()> {
        conn.execute("DELETE FROM containers WHERE id = ?1", [id])?;
        Ok(())
    }
}

impl Default for ContainerStore {
    fn default() -> Self {
        Self::new()
    }
}

const SELECT_BASE: &str = r#"
    SELECT id, docker_id, name, status, init_status, init_error,
           repo_url, repo_name, workdir, yolo,
           cpu_cores, memory_mib, cpu_period_us,
           env_profile_id, startup_profile_id, injection_result,
           created_at, updated_at, initialized_at
    FROM containers
"#;

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContainerRecord> {
    let status: String = row.get(3)?;
    let init_status: String = row.get(4)?;
    let injection: Option<String> = row.get(15)?;

    Ok(ContainerRecord {
        id: row.get(0)?,
        docker_id: row.get(1)?,
        name: row.get(2)?,
        status: ContainerStatus::parse(&status),
        init_status: InitStatus::parse(&init_status),
        init_error: row.get(5)?,
        repo_url: row.get(6)?,
        repo_name: row.get(7)?,
        workdir: row.get(8)?,
        yolo: row.get::<_, i32>(9)? != 0,
        limits: ResourceLimits {
            cpu_cores: row.get(10)?,
            memory_mib: row.get::<_, Option<i64>>(11)?.map(|m| m as u64),
            cpu_period_us: row.get::<_, Option<i64>>(12)?.map(|p| p as u64),
        },
        env_profile_id: row.get(13)?,
        startup_profile_id: row.get(14)?,
        injection_result: injection.and_then(|j| serde_json::from_str(&j).ok()),
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
        initialized_at: row.get(18)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn record(id: &str, name: &str) -> ContainerRecord {
        ContainerRecord {
            id: id.into(),
            docker_id: None,
            name: name.into(),
            status: ContainerStatus::Created,
            init_status: InitStatus::Pending,
            init_error: None,
            repo_url: Some("https://github.com/acme/app".into()),
            repo_name: Some("app".into()),
            workdir: "/workspace/app".into(),
            yolo: false,
            limits: ResourceLimits {
                cpu_cores: Some(2.0),
                memory_mib: Some(2048),
                cpu_period_us: None,
            },
            env_profile_id: None,
            startup_profile_id: None,
            injection_result: None,
            created_at: 0,
            updated_at: 0,
            initialized_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        db.containers.insert(&conn, &record("c1", "dev1")).unwrap();

        let loaded = db.containers.get(&conn, "c1").unwrap().unwrap();
        assert_eq!(loaded.name, "dev1");
        assert_eq!(loaded.workdir, "/workspace/app");
        assert_eq!(loaded.init_status, InitStatus::Pending);
        assert_eq!(loaded.limits.cpu_cores, Some(2.0));

        assert!(db.containers.get(&conn, "missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        db.containers.insert(&conn, &record("c1", "dev1")).unwrap();
        assert!(db.containers.insert(&conn, &record("c2", "dev1")).is_err());
    }

    #[tokio::test]
    async fn test_init_status_progression() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;
        db.containers.insert(&conn, &record("c1", "dev1")).unwrap();

        for status in [InitStatus::Cloning, InitStatus::Initializing, InitStatus::Ready] {
            db.containers
                .advance_init_status(&conn, "c1", status, None)
                .unwrap();
        }

        let loaded = db.containers.get(&conn, "c1").unwrap().unwrap();
        assert_eq!(loaded.init_status, InitStatus::Ready);
        assert!(loaded.initialized_at.is_some());

        // Terminal: no further transitions
        assert!(db
            .containers
            .advance_init_status(&conn, "c1", InitStatus::Failed, Some("late"))
            .is_err());
    }

    #[tokio::test]
    async fn test_init_status_no_regression() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;
        db.containers.insert(&conn, &record("c1", "dev1")).unwrap();

        db.containers
            .advance_init_status(&conn, "c1", InitStatus::Initializing, None)
            .unwrap();
        assert!(db
            .containers
            .advance_init_status(&conn, "c1", InitStatus::Cloning, None)
            .is_err());

        // Failure is reachable from any non-terminal state
        db.containers
            .advance_init_status(&conn, "c1", InitStatus::Failed, Some("clone exited 128"))
            .unwrap();
        let loaded = db.containers.get(&conn, "c1").unwrap().unwrap();
        assert_eq!(loaded.init_status, InitStatus::Failed);
        assert_eq!(loaded.init_error.as_deref(), Some("clone exited 128"));
    }

    #[tokio::test]
    async fn test_injection_result_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;
        db.containers.insert(&conn, &record("c1", "dev1")).unwrap();

        let result = InjectionResult {
            succeeded: vec!["mcp1".into(), "mcp2".into()],
            failed: vec![InjectionFailure {
                name: "broken".into(),
                template_type: "skill".into(),
                reason: "frontmatter never closed".into(),
            }],
            warnings: vec![],
            timestamp: 1_700_000_000,
        };
        db.containers
            .set_injection_result(&conn, "c1", &result)
            .unwrap();

        let loaded = db.containers.get(&conn, "c1").unwrap().unwrap();
        let loaded_result = loaded.injection_result.unwrap();
        assert_eq!(loaded_result.succeeded, vec!["mcp1", "mcp2"]);
        assert_eq!(loaded_result.failed.len(), 1);
        assert_eq!(loaded_result.failed[0].name, "broken");
    }
}

//! Published-port records

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use super::DatabaseResult;

/// Port published on a container
#[derive(Debug, Clone, Serialize)]
pub struct PortRecord {
    pub container_id: String,
    pub port: u16,
    pub name: Option<String>,
    pub protocol: String,
    pub auto_created: bool,
    pub created_at: i64,
}

/// Store for container port records
pub struct PortStore;

impl PortStore {
    pub fn new() -> Self {
        Self
    }

    pub fn insert(&self, conn: &Connection, record: &PortRecord) -> DatabaseResult<()> {
        conn.execute(
            r#"
            INSERT INTO container_ports (container_id, port, name, protocol, auto_created)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            rusqlite::params![
                record.container_id,
                record.port as i64,
                record.name,
                record.protocol,
                record.auto_created as i32,
            ],
        )?;
        Ok(())
    }

    pub fn get(
        &self,
        conn: &Connection,
        container_id: &str,
        port: u16,
    ) -> DatabaseResult<Option<PortRecord>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT container_id, port, name, protocol, auto_created, created_at
            FROM container_ports
            WHERE container_id = ?1 AND port = ?2
            "#,
        )?;
        let record = stmt
            .query_row(rusqlite::params![container_id, port as i64], row_to_record)
            .optional()?;
        Ok(record)
    }

    pub fn list(&self, conn: &Connection, container_id: &str) -> DatabaseResult<Vec<PortRecord>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT container_id, port, name, protocol, auto_created, created_at
            FROM container_ports
            WHERE container_id = ?1
            ORDER BY port
            "#,
        )?;
        let records = stmt
            .query_map([container_id], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn all(&self, conn: &Connection) -> DatabaseResult<Vec<PortRecord>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT container_id, port, name, protocol, auto_created, created_at
            FROM container_ports
            ORDER BY container_id, port
            "#,
        )?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn delete(&self, conn: &Connection, container_id: &str, port: u16) -> DatabaseResult<bool> {
        let affected = conn.execute(
            "DELETE FROM container_ports WHERE container_id = ?1 AND port = ?2",
            rusqlite::params![container_id, port as i64],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_for_container(
        &self,
        conn: &Connection,
        container_id: &str,
    ) -> DatabaseResult<usize> {
        let affected = conn.execute(
            "DELETE FROM container_ports WHERE container_id = ?1",
            [container_id],
        )?;
        Ok(affected)
    }

    /// Remove port records whose container record no longer exists.
    pub fn sweep_orphans(&self, conn: &Connection) -> DatabaseResult<usize> {
        let affected = conn.execute(
            r#"
            DELETE FROM container_ports
            WHERE container_id NOT IN (SELECT id FROM containers)
            "#,
            [],
        )?;
        Ok(affected)
    }
}

impl Default for PortStore {
    fn default() -> Self {
        Self::new()
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PortRecord> {
    Ok(PortRecord {
        container_id: row.get(0)?,
        port: row.get::<_, i64>(1)? as u16,
        name: row.get(2)?,
        protocol: row.get(3)?,
        auto_created: row.get::<_, i32>(4)? != 0,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ContainerRecord, ContainerStatus, Database, InitStatus, ResourceLimits};

    fn container(id: &str) -> ContainerRecord {
        ContainerRecord {
            id: id.into(),
            docker_id: None,
            name: format!("name-{}", id),
            status: ContainerStatus::Created,
            init_status: InitStatus::Pending,
            init_error: None,
            repo_url: None,
            repo_name: None,
            workdir: "/workspace".into(),
            yolo: false,
            limits: ResourceLimits::default(),
            env_profile_id: None,
            startup_profile_id: None,
            injection_result: None,
            created_at: 0,
            updated_at: 0,
            initialized_at: None,
        }
    }

    fn port(container_id: &str, port: u16) -> PortRecord {
        PortRecord {
            container_id: container_id.into(),
            port,
            name: Some("web".into()),
            protocol: "tcp".into(),
            auto_created: false,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_unique_per_container_port() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        db.ports.insert(&conn, &port("c1", 3000)).unwrap();
        assert!(db.ports.insert(&conn, &port("c1", 3000)).is_err());
        // Same port on a different container is fine
        db.ports.insert(&conn, &port("c2", 3000)).unwrap();
    }

    #[tokio::test]
    async fn test_sweep_orphans() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        db.containers.insert(&conn, &container("c1")).unwrap();
        db.ports.insert(&conn, &port("c1", 3000)).unwrap();
        db.ports.insert(&conn, &port("ghost", 8080)).unwrap();

        let swept = db.ports.sweep_orphans(&conn).unwrap();
        assert_eq!(swept, 1);

        let remaining = db.ports.all(&conn).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].container_id, "c1");
    }

    #[tokio::test]
    async fn test_delete_for_container() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        db.ports.insert(&conn, &port("c1", 3000)).unwrap();
        db.ports.insert(&conn, &port("c1", 3001)).unwrap();

        assert_eq!(db.ports.delete_for_container(&conn, "c1").unwrap(), 2);
        assert!(db.ports.list(&conn, "c1").unwrap().is_empty());
    }
}

//! Init pipeline log entries

use rusqlite::Connection;
use serde::Serialize;

use super::DatabaseResult;

/// Pipeline stage a log entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InitStage {
    Startup,
    Clone,
    Init,
    Ready,
}

impl InitStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitStage::Startup => "startup",
            InitStage::Clone => "clone",
            InitStage::Init => "init",
            InitStage::Ready => "ready",
        }
    }
}

/// One init pipeline log line
#[derive(Debug, Clone, Serialize)]
pub struct InitLogEntry {
    pub id: i64,
    pub container_id: String,
    pub level: String,
    pub stage: String,
    pub message: String,
    pub timestamp: i64,
}

/// Store for init pipeline logs
pub struct InitLogStore;

impl InitLogStore {
    pub fn new() -> Self {
        Self
    }

    pub fn append(
        &self,
        conn: &Connection,
        container_id: &str,
        level: &str,
        stage: InitStage,
        message: &str,
    ) -> DatabaseResult<()> {
        conn.execute(
            r#"
            INSERT INTO init_logs (container_id, level, stage, message)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            rusqlite::params![container_id, level, stage.as_str(), message],
        )?;
        Ok(())
    }

    pub fn list(
        &self,
        conn: &Connection,
        container_id: &str,
    ) -> DatabaseResult<Vec<InitLogEntry>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, container_id, level, stage, message, timestamp
            FROM init_logs
            WHERE container_id = ?1
            ORDER BY id
            "#,
        )?;
        let entries = stmt
            .query_map([container_id], |row| {
                Ok(InitLogEntry {
                    id: row.get(0)?,
                    container_id: row.get(1)?,
                    level: row.get(2)?,
                    stage: row.get(3)?,
                    message: row.get(4)?,
                    timestamp: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn delete_for_container(
        &self,
        conn: &Connection,
        container_id: &str,
    ) -> DatabaseResult<usize> {
        let affected = conn.execute(
            "DELETE FROM init_logs WHERE container_id = ?1",
            [container_id],
        )?;
        Ok(affected)
    }
}

impl Default for InitLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[tokio::test]
    async fn test_append_and_list_in_order() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        db.init_logs
            .append(&conn, "c1", "info", InitStage::Startup, "container started")
            .unwrap();
        db.init_logs
            .append(&conn, "c1", "info", InitStage::Clone, "cloning repository")
            .unwrap();
        db.init_logs
            .append(&conn, "c1", "error", InitStage::Init, "template skill-x failed")
            .unwrap();
        db.init_logs
            .append(&conn, "other", "info", InitStage::Ready, "ready")
            .unwrap();

        let entries = db.init_logs.list(&conn, "c1").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].stage, "startup");
        assert_eq!(entries[1].stage, "clone");
        assert_eq!(entries[2].level, "error");
    }
}

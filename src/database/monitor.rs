//! Monitoring config persistence

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use super::{DatabaseError, DatabaseResult};

/// Lowest accepted silence threshold, seconds.
pub const MIN_THRESHOLD_SECS: u64 = 5;
/// Highest accepted silence threshold, seconds.
pub const MAX_THRESHOLD_SECS: u64 = 300;

/// Per-container monitoring configuration
#[derive(Debug, Clone, Serialize)]
pub struct MonitorConfigRecord {
    pub container_id: String,
    pub enabled: bool,
    pub threshold_secs: u64,
    pub buffer_bytes: usize,
    pub strategy: String,
    pub params: serde_json::Value,
    pub updated_at: i64,
}

impl MonitorConfigRecord {
    /// Defaults: webhook strategy, 30 s threshold, 8 KiB context buffer.
    pub fn defaults(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            enabled: false,
            threshold_secs: 30,
            buffer_bytes: 8192,
            strategy: "webhook".to_string(),
            params: serde_json::json!({}),
            updated_at: 0,
        }
    }
}

/// Store for monitoring configs
pub struct MonitorConfigStore;

impl MonitorConfigStore {
    pub fn new() -> Self {
        Self
    }

    /// Upsert a config. Threshold bounds are enforced here as the last line
    /// of defense; the service layer validates first and maps the error to
    /// invalid-input/threshold.
    pub fn save(&self, conn: &Connection, record: &MonitorConfigRecord) -> DatabaseResult<()> {
        if !(MIN_THRESHOLD_SECS..=MAX_THRESHOLD_SECS).contains(&record.threshold_secs) {
            return Err(DatabaseError::Other(format!(
                "threshold {} outside [{}, {}]",
                record.threshold_secs, MIN_THRESHOLD_SECS, MAX_THRESHOLD_SECS
            )));
        }

        let params = serde_json::to_string(&record.params)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO monitor_configs
                (container_id, enabled, threshold_secs, buffer_bytes, strategy, params, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, strftime('%s', 'now'))
            "#,
            rusqlite::params![
                record.container_id,
                record.enabled as i32,
                record.threshold_secs as i64,
                record.buffer_bytes as i64,
                record.strategy,
                params,
            ],
        )?;
        Ok(())
    }

    pub fn get(
        &self,
        conn: &Connection,
        container_id: &str,
    ) -> DatabaseResult<Option<MonitorConfigRecord>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT container_id, enabled, threshold_secs, buffer_bytes, strategy, params, updated_at
            FROM monitor_configs
            WHERE container_id = ?1
            "#,
        )?;
        let record = stmt.query_row([container_id], row_to_record).optional()?;
        Ok(record)
    }

    /// All enabled configs, used by the restoration pass on boot.
    pub fn all_enabled(&self, conn: &Connection) -> DatabaseResult<Vec<MonitorConfigRecord>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT container_id, enabled, threshold_secs, buffer_bytes, strategy, params, updated_at
            FROM monitor_configs
            WHERE enabled = 1
            "#,
        )?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn set_enabled(
        &self,
        conn: &Connection,
        container_id: &str,
        enabled: bool,
    ) -> DatabaseResult<()> {
        conn.execute(
            r#"
            UPDATE monitor_configs
            SET enabled = ?2, updated_at = strftime('%s', 'now')
            WHERE container_id = ?1
            "#,
            rusqlite::params![container_id, enabled as i32],
        )?;
        Ok(())
    }

    pub fn delete(&self, conn: &Connection, container_id: &str) -> DatabaseResult<()> {
        conn.execute(
            "DELETE FROM monitor_configs WHERE container_id = ?1",
            [container_id],
        )?;
        Ok(())
    }
}

impl Default for MonitorConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MonitorConfigRecord> {
    let params: String = row.get(5)?;
    Ok(MonitorConfigRecord {
        container_id: row.get(0)?,
        enabled: row.get::<_, i32>(1)? != 0,
        threshold_secs: row.get::<_, i64>(2)? as u64,
        buffer_bytes: row.get::<_, i64>(3)? as usize,
        strategy: row.get(4)?,
        params: serde_json::from_str(&params).unwrap_or(serde_json::Value::Null),
        updated_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[tokio::test]
    async fn test_save_and_get() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        let mut config = MonitorConfigRecord::defaults("c1");
        config.enabled = true;
        config.threshold_secs = 15;
        config.strategy = "injection".into();
        config.params = serde_json::json!({"template": "echo hi"});
        db.monitor_configs.save(&conn, &config).unwrap();

        let loaded = db.monitor_configs.get(&conn, "c1").unwrap().unwrap();
        assert!(loaded.enabled);
        assert_eq!(loaded.threshold_secs, 15);
        assert_eq!(loaded.strategy, "injection");
        assert_eq!(loaded.params["template"], "echo hi");
    }

    #[tokio::test]
    async fn test_threshold_bounds() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        let mut config = MonitorConfigRecord::defaults("c1");
        config.threshold_secs = 3;
        assert!(db.monitor_configs.save(&conn, &config).is_err());

        config.threshold_secs = 301;
        assert!(db.monitor_configs.save(&conn, &config).is_err());

        // Boundary values accepted
        config.threshold_secs = 5;
        db.monitor_configs.save(&conn, &config).unwrap();
        config.threshold_secs = 300;
        db.monitor_configs.save(&conn, &config).unwrap();
    }

    #[tokio::test]
    async fn test_all_enabled() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        let mut a = MonitorConfigRecord::defaults("a");
        a.enabled = true;
        db.monitor_configs.save(&conn, &a).unwrap();
        let b = MonitorConfigRecord::defaults("b");
        db.monitor_configs.save(&conn, &b).unwrap();

        let enabled = db.monitor_configs.all_enabled(&conn).unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].container_id, "a");
    }
}

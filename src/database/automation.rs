//! Automation log persistence
//!
//! Append-only record of every strategy dispatch, with paginated filtered
//! reads and a bounded retention sweep.

use rusqlite::Connection;
use serde::Serialize;

use super::DatabaseResult;

/// One strategy dispatch outcome
#[derive(Debug, Clone, Serialize)]
pub struct AutomationLogEntry {
    pub id: i64,
    pub container_id: String,
    pub session_id: String,
    pub strategy: String,
    pub action: String,
    pub command: Option<String>,
    pub context_snippet: Option<String>,
    pub ai_response: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: i64,
}

/// Filter for automation log queries
#[derive(Debug, Clone, Default)]
pub struct AutomationLogFilter {
    pub container_id: Option<String>,
    pub session_id: Option<String>,
    pub strategy: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
}

/// Store for automation logs
pub struct AutomationLogStore;

impl AutomationLogStore {
    pub fn new() -> Self {
        Self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &self,
        conn: &Connection,
        container_id: &str,
        session_id: &str,
        strategy: &str,
        action: &str,
        command: Option<&str>,
        context_snippet: Option<&str>,
        ai_response: Option<&str>,
        success: bool,
        error: Option<&str>,
    ) -> DatabaseResult<i64> {
        conn.execute(
            r#"
            INSERT INTO automation_logs
                (container_id, session_id, strategy, action, command,
                 context_snippet, ai_response, success, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            rusqlite::params![
                container_id,
                session_id,
                strategy,
                action,
                command,
                context_snippet,
                ai_response,
                success as i32,
                error,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Filtered, newest-first page of log entries.
    pub fn query(
        &self,
        conn: &Connection,
        filter: &AutomationLogFilter,
        page: usize,
        per_page: usize,
    ) -> DatabaseResult<Vec<AutomationLogEntry>> {
        let mut sql = String::from(
            r#"
            SELECT id, container_id, session_id, strategy, action, command,
                   context_snippet, ai_response, success, error, timestamp
            FROM automation_logs
            WHERE 1=1
            "#,
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(container_id) = &filter.container_id {
            sql.push_str(" AND container_id = ?");
            params.push(Box::new(container_id.clone()));
        }
        if let Some(session_id) = &filter.session_id {
            sql.push_str(" AND session_id = ?");
            params.push(Box::new(session_id.clone()));
        }
        if let Some(strategy) = &filter.strategy {
            sql.push_str(" AND strategy = ?");
            params.push(Box::new(strategy.clone()));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND timestamp >= ?");
            params.push(Box::new(since));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND timestamp < ?");
            params.push(Box::new(until));
        }

        sql.push_str(" ORDER BY id DESC LIMIT ? OFFSET ?");
        params.push(Box::new(per_page as i64));
        params.push(Box::new((page * per_page) as i64));

        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(
                rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
                row_to_entry,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Delete entries older than `cutoff` (unix seconds). Returns count.
    pub fn cleanup(&self, conn: &Connection, cutoff: i64) -> DatabaseResult<usize> {
        let affected = conn.execute(
            "DELETE FROM automation_logs WHERE timestamp < ?1",
            [cutoff],
        )?;
        Ok(affected)
    }
}

impl Default for AutomationLogStore {
    fn default() -> Self {
        Self::new()
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AutomationLogEntry> {
    Ok(AutomationLogEntry {
        id: row.get(0)?,
        container_id: row.get(1)?,
        session_id: row.get(2)?,
        strategy: row.get(3)?,
        action: row.get(4)?,
        command: row.get(5)?,
        context_snippet: row.get(6)?,
        ai_response: row.get(7)?,
        success: row.get::<_, i32>(8)? != 0,
        error: row.get(9)?,
        timestamp: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[tokio::test]
    async fn test_append_and_filter() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        db.automation_logs
            .append(
                &conn, "c1", "s1", "webhook", "skip", None, Some("$ ls"), None, true, None,
            )
            .unwrap();
        db.automation_logs
            .append(
                &conn,
                "c1",
                "s1",
                "injection",
                "inject",
                Some("echo hi\n"),
                None,
                None,
                true,
                None,
            )
            .unwrap();
        db.automation_logs
            .append(
                &conn, "c2", "s9", "webhook", "skip", None, None, None, false,
                Some("connect refused"),
            )
            .unwrap();

        let filter = AutomationLogFilter {
            container_id: Some("c1".into()),
            ..Default::default()
        };
        let entries = db.automation_logs.query(&conn, &filter, 0, 50).unwrap();
        assert_eq!(entries.len(), 2);
        // Newest first
        assert_eq!(entries[0].strategy, "injection");

        let filter = AutomationLogFilter {
            strategy: Some("webhook".into()),
            ..Default::default()
        };
        let entries = db.automation_logs.query(&conn, &filter, 0, 50).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_pagination() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        for i in 0..5 {
            db.automation_logs
                .append(
                    &conn,
                    "c1",
                    "s1",
                    "webhook",
                    "skip",
                    Some(&format!("cmd{}", i)),
                    None,
                    None,
                    true,
                    None,
                )
                .unwrap();
        }

        let filter = AutomationLogFilter::default();
        let first = db.automation_logs.query(&conn, &filter, 0, 2).unwrap();
        let second = db.automation_logs.query(&conn, &filter, 1, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(first[0].command.as_deref(), Some("cmd4"));
        assert_eq!(second[0].command.as_deref(), Some("cmd2"));
    }

    #[tokio::test]
    async fn test_cleanup() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        db.automation_logs
            .append(&conn, "c1", "s1", "webhook", "skip", None, None, None, true, None)
            .unwrap();

        // Cutoff in the future deletes everything
        let deleted = db
            .automation_logs
            .cleanup(&conn, chrono::Utc::now().timestamp() + 60)
            .unwrap();
        assert_eq!(deleted, 1);
    }
}

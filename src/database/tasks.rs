//! Task queue persistence
//!
//! Tasks are ordered by a dense integer index per container. Reordering
//! rewrites every index inside a single transaction.

use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{DatabaseError, DatabaseResult};

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Running,
    Completed,
    Skipped,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "skipped" => Some(TaskStatus::Skipped),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// Whether a transition from `self` to `next` is allowed.
    pub fn allows(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Running)
                | (Pending, Skipped)
                | (InProgress, Completed)
                | (InProgress, Skipped)
                | (InProgress, Failed)
                | (Running, Completed)
                | (Running, Skipped)
                | (Running, Failed)
                | (Failed, Pending)
        )
    }

    /// An in-progress or running task is "current" for queue consumption.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued task
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: String,
    pub container_id: String,
    pub order_index: i64,
    pub text: String,
    pub status: TaskStatus,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Store for the per-container task queue
pub struct TaskStore;

impl TaskStore {
    pub fn new() -> Self {
        Self
    }

    /// Append a task at the end of the container's queue.
    pub fn add(
        &self,
        conn: &Connection,
        container_id: &str,
        id: &str,
        text: &str,
    ) -> DatabaseResult<TaskRecord> {
        let next_index: i64 = conn.query_row(
            "SELECT COALESCE(MAX(order_index) + 1, 0) FROM tasks WHERE container_id = ?1",
            [container_id],
            |row| row.get(0),
        )?;

        conn.execute(
            r#"
            INSERT INTO tasks (id, container_id, order_index, text)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            rusqlite::params![id, container_id, next_index, text],
        )?;

        self.get(conn, id)?
            .ok_or_else(|| DatabaseError::NotFound(format!("task {}", id)))
    }

    pub fn get(&self, conn: &Connection, id: &str) -> DatabaseResult<Option<TaskRecord>> {
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_BASE))?;
        let record = stmt.query_row([id], row_to_record).optional()?;
        Ok(record)
    }

    pub fn list(&self, conn: &Connection, container_id: &str) -> DatabaseResult<Vec<TaskRecord>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE container_id = ?1 ORDER BY order_index",
            SELECT_BASE
        ))?;
        let records = stmt
            .query_map([container_id], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count(&self, conn: &Connection, container_id: &str) -> DatabaseResult<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE container_id = ?1",
            [container_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Lowest-order pending task, if any.
    pub fn next_pending(
        &self,
        conn: &Connection,
        container_id: &str,
    ) -> DatabaseResult<Option<TaskRecord>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE container_id = ?1 AND status = 'pending' ORDER BY order_index LIMIT 1",
            SELECT_BASE
        ))?;
        let record = stmt.query_row([container_id], row_to_record).optional()?;
        Ok(record)
    }

    /// The task currently in progress (or running), if any.
    pub fn current(
        &self,
        conn: &Connection,
        container_id: &str,
    ) -> DatabaseResult<Option<TaskRecord>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE container_id = ?1 AND status IN ('in_progress', 'running') \
             ORDER BY order_index LIMIT 1",
            SELECT_BASE
        ))?;
        let record = stmt.query_row([container_id], row_to_record).optional()?;
        Ok(record)
    }

    pub fn update_text(&self, conn: &Connection, id: &str, text: &str) -> DatabaseResult<()> {
        let affected = conn.execute(
            "UPDATE tasks SET text = ?2 WHERE id = ?1",
            rusqlite::params![id, text],
        )?;
        if affected == 0 {
            return Err(DatabaseError::NotFound(format!("task {}", id)));
        }
        Ok(())
    }

    /// Transition a task's status, enforcing the allowed transition matrix
    /// and stamping started/completed timestamps.
    pub fn transition(
        &self,
        conn: &Connection,
        id: &str,
        next: TaskStatus,
    ) -> DatabaseResult<TaskRecord> {
        let current = self
            .get(conn, id)?
            .ok_or_else(|| DatabaseError::NotFound(format!("task {}", id)))?;

        if !current.status.allows(next) {
            return Err(DatabaseError::InvalidTransition(format!(
                "task status {} -> {}",
                current.status, next
            )));
        }

        let now = chrono::Utc::now().timestamp();
        let started_at = if next.is_active() { Some(now) } else { None };
        let completed_at = if matches!(
            next,
            TaskStatus::Completed | TaskStatus::Skipped | TaskStatus::Failed
        ) {
            Some(now)
        } else {
            None
        };
        // Retrying a failed task clears its terminal timestamp
        let clear_completed = next == TaskStatus::Pending;

        conn.execute(
            r#"
            UPDATE tasks
            SET status = ?2,
                started_at = COALESCE(?3, started_at),
                completed_at = CASE WHEN ?5 THEN NULL ELSE COALESCE(?4, completed_at) END
            WHERE id = ?1
            "#,
            rusqlite::params![id, next.as_str(), started_at, completed_at, clear_completed],
        )?;

        self.get(conn, id)?
            .ok_or_else(|| DatabaseError::NotFound(format!("task {}", id)))
    }

    pub fn remove(&self, conn: &Connection, container_id: &str, id: &str) -> DatabaseResult<bool> {
        let affected = conn.execute(
            "DELETE FROM tasks WHERE id = ?1 AND container_id = ?2",
            rusqlite::params![id, container_id],
        )?;
        Ok(affected > 0)
    }

    pub fn clear(&self, conn: &Connection, container_id: &str) -> DatabaseResult<usize> {
        let affected = conn.execute("DELETE FROM tasks WHERE container_id = ?1", [container_id])?;
        Ok(affected)
    }

    pub fn clear_completed(&self, conn: &Connection, container_id: &str) -> DatabaseResult<usize> {
        let affected = conn.execute(
            "DELETE FROM tasks WHERE container_id = ?1 AND status IN ('completed', 'skipped')",
            [container_id],
        )?;
        Ok(affected)
    }

    /// Rewrite order indices 0..N-1 according to `ordered_ids`, which must be
    /// a permutation of the container's task ids. One transaction.
    pub fn reorder(
        &self,
        conn: &mut Connection,
        container_id: &str,
        ordered_ids: &[String],
    ) -> DatabaseResult<()> {
        let existing: HashSet<String> = {
            let mut stmt =
                conn.prepare("SELECT id FROM tasks WHERE container_id = ?1")?;
            let result = stmt
                .query_map([container_id], |row| row.get::<_, String>(0))?
                .collect::<Result<HashSet<_>, _>>()?;
            result
        };

        let requested: HashSet<&String> = ordered_ids.iter().collect();
        if requested.len() != ordered_ids.len()
            || existing.len() != ordered_ids.len()
            || !ordered_ids.iter().all(|id| existing.contains(id))
        {
            return Err(DatabaseError::Other(
                "reorder requires a permutation of the container's task ids".into(),
            ));
        }

        let tx = conn.transaction()?;
        for (index, id) in ordered_ids.iter().enumerate() {
            tx.execute(
                "UPDATE tasks SET order_index = ?2 WHERE id = ?1 AND container_id = ?3",
                rusqlite::params![id, index as i64, container_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

const SELECT_BASE: &str = r#"
    SELECT id, container_id, order_index, text, status, created_at, started_at, completed_at
    FROM tasks
"#;

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    let status: String = row.get(4)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        container_id: row.get(1)?,
        order_index: row.get(2)?,
        text: row.get(3)?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        created_at: row.get(5)?,
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[tokio::test]
    async fn test_add_assigns_dense_indices() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        for (i, text) in ["a", "b", "c"].iter().enumerate() {
            let task = db.tasks.add(&conn, "c1", &format!("t{}", i), text).unwrap();
            assert_eq!(task.order_index, i as i64);
        }

        let tasks = db.tasks.list(&conn, "c1").unwrap();
        assert_eq!(
            tasks.iter().map(|t| t.text.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[tokio::test]
    async fn test_next_pending_lowest_index() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        db.tasks.add(&conn, "c1", "t0", "a").unwrap();
        db.tasks.add(&conn, "c1", "t1", "b").unwrap();

        db.tasks
            .transition(&conn, "t0", TaskStatus::InProgress)
            .unwrap();
        db.tasks
            .transition(&conn, "t0", TaskStatus::Completed)
            .unwrap();

        let next = db.tasks.next_pending(&conn, "c1").unwrap().unwrap();
        assert_eq!(next.id, "t1");
    }

    #[tokio::test]
    async fn test_transition_matrix() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;
        db.tasks.add(&conn, "c1", "t0", "a").unwrap();

        // pending -> completed is illegal
        assert!(matches!(
            db.tasks.transition(&conn, "t0", TaskStatus::Completed),
            Err(DatabaseError::InvalidTransition(_))
        ));

        let task = db
            .tasks
            .transition(&conn, "t0", TaskStatus::InProgress)
            .unwrap();
        assert!(task.started_at.is_some());

        let task = db.tasks.transition(&conn, "t0", TaskStatus::Failed).unwrap();
        assert!(task.completed_at.is_some());

        // failed -> pending (retry) clears the terminal timestamp
        let task = db
            .tasks
            .transition(&conn, "t0", TaskStatus::Pending)
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.completed_at.is_none());

        // completed is terminal
        db.tasks
            .transition(&conn, "t0", TaskStatus::Running)
            .unwrap();
        db.tasks
            .transition(&conn, "t0", TaskStatus::Completed)
            .unwrap();
        assert!(db
            .tasks
            .transition(&conn, "t0", TaskStatus::Pending)
            .is_err());
    }

    #[tokio::test]
    async fn test_reorder_permutation() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().await;

        for (i, text) in ["a", "b", "c"].iter().enumerate() {
            db.tasks.add(&conn, "c1", &format!("t{}", i), text).unwrap();
        }

        db.tasks
            .reorder(
                &mut conn,
                "c1",
                &["t2".to_string(), "t0".to_string(), "t1".to_string()],
            )
            .unwrap();

        let tasks = db.tasks.list(&conn, "c1").unwrap();
        assert_eq!(
            tasks.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec!["t2", "t0", "t1"]
        );
        assert_eq!(
            tasks.iter().map(|t| t.order_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn test_reorder_rejects_non_permutation() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().await;

        db.tasks.add(&conn, "c1", "t0", "a").unwrap();
        db.tasks.add(&conn, "c1", "t1", "b").unwrap();

        // Missing id
        assert!(db
            .tasks
            .reorder(&mut conn, "c1", &["t0".to_string()])
            .is_err());
        // Unknown id
        assert!(db
            .tasks
            .reorder(&mut conn, "c1", &["t0".to_string(), "ghost".to_string()])
            .is_err());
        // Duplicate id
        assert!(db
            .tasks
            .reorder(&mut conn, "c1", &["t0".to_string(), "t0".to_string()])
            .is_err());

        // Set unchanged after failed reorders
        let tasks = db.tasks.list(&conn, "c1").unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(
            tasks.iter().map(|t| t.order_index).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[tokio::test]
    async fn test_clear_completed() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        db.tasks.add(&conn, "c1", "t0", "a").unwrap();
        db.tasks.add(&conn, "c1", "t1", "b").unwrap();
        db.tasks
            .transition(&conn, "t0", TaskStatus::InProgress)
            .unwrap();
        db.tasks
            .transition(&conn, "t0", TaskStatus::Completed)
            .unwrap();

        assert_eq!(db.tasks.clear_completed(&conn, "c1").unwrap(), 1);
        assert_eq!(db.tasks.count(&conn, "c1").unwrap(), 1);
    }
}

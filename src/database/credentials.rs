//! Credential store persistence
//!
//! Three kinds of identified records share one shape: GitHub tokens, env-var
//! profiles, and startup-command profiles. Each kind has an exclusive
//! "default" flag; setting one clears the others in the same transaction.
//! Token payloads arrive already encrypted; this store never sees plaintext.

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use super::{DatabaseError, DatabaseResult};

/// Which credential table a record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    GithubToken,
    EnvProfile,
    StartupProfile,
}

impl CredentialKind {
    fn table(&self) -> &'static str {
        match self {
            CredentialKind::GithubToken => "github_tokens",
            CredentialKind::EnvProfile => "env_profiles",
            CredentialKind::StartupProfile => "startup_profiles",
        }
    }
}

/// One credential record. `payload` is ciphertext for GitHub tokens, a JSON
/// var map for env profiles, and a command line for startup profiles.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialRecord {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub payload: String,
    pub is_default: bool,
    pub created_at: i64,
}

/// Store for the three credential tables
pub struct CredentialStore;

impl CredentialStore {
    pub fn new() -> Self {
        Self
    }

    pub fn insert(
        &self,
        conn: &Connection,
        kind: CredentialKind,
        record: &CredentialRecord,
    ) -> DatabaseResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (id, name, payload, is_default) VALUES (?1, ?2, ?3, 0)",
                kind.table()
            ),
            rusqlite::params![record.id, record.name, record.payload],
        )?;
        Ok(())
    }

    pub fn get(
        &self,
        conn: &Connection,
        kind: CredentialKind,
        id: &str,
    ) -> DatabaseResult<Option<CredentialRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, name, payload, is_default, created_at FROM {} WHERE id = ?1",
            kind.table()
        ))?;
        let record = stmt.query_row([id], row_to_record).optional()?;
        Ok(record)
    }

    /// The record flagged default for a kind, if any.
    pub fn get_default(
        &self,
        conn: &Connection,
        kind: CredentialKind,
    ) -> DatabaseResult<Option<CredentialRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, name, payload, is_default, created_at FROM {} WHERE is_default = 1",
            kind.table()
        ))?;
        let record = stmt.query_row([], row_to_record).optional()?;
        Ok(record)
    }

    pub fn list(
        &self,
        conn: &Connection,
        kind: CredentialKind,
    ) -> DatabaseResult<Vec<CredentialRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, name, payload, is_default, created_at FROM {} ORDER BY name",
            kind.table()
        ))?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn update_payload(
        &self,
        conn: &Connection,
        kind: CredentialKind,
        id: &str,
        payload: &str,
    ) -> DatabaseResult<()> {
        let affected = conn.execute(
            &format!("UPDATE {} SET payload = ?2 WHERE id = ?1", kind.table()),
            rusqlite::params![id, payload],
        )?;
        if affected == 0 {
            return Err(DatabaseError::NotFound(format!("credential {}", id)));
        }
        Ok(())
    }

    /// Flag `id` as the default for its kind, clearing every other default
    /// in one transaction.
    pub fn set_default(
        &self,
        conn: &mut Connection,
        kind: CredentialKind,
        id: &str,
    ) -> DatabaseResult<()> {
        let tx = conn.transaction()?;
        tx.execute(
            &format!("UPDATE {} SET is_default = 0", kind.table()),
            [],
        )?;
        let affected = tx.execute(
            &format!("UPDATE {} SET is_default = 1 WHERE id = ?1", kind.table()),
            [id],
        )?;
        if affected == 0 {
            return Err(DatabaseError::NotFound(format!("credential {}", id)));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete(
        &self,
        conn: &Connection,
        kind: CredentialKind,
        id: &str,
    ) -> DatabaseResult<bool> {
        let affected = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
            [id],
        )?;
        Ok(affected > 0)
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CredentialRecord> {
    Ok(CredentialRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        payload: row.get(2)?,
        is_default: row.get::<_, i32>(3)? != 0,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn record(id: &str, name: &str) -> CredentialRecord {
        CredentialRecord {
            id: id.into(),
            name: name.into(),
            payload: "ciphertext".into(),
            is_default: false,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_exclusive_default() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().await;

        db.credentials
            .insert(&conn, CredentialKind::GithubToken, &record("a", "work"))
            .unwrap();
        db.credentials
            .insert(&conn, CredentialKind::GithubToken, &record("b", "personal"))
            .unwrap();

        db.credentials
            .set_default(&mut conn, CredentialKind::GithubToken, "a")
            .unwrap();
        db.credentials
            .set_default(&mut conn, CredentialKind::GithubToken, "b")
            .unwrap();

        let records = db.credentials.list(&conn, CredentialKind::GithubToken).unwrap();
        let defaults: Vec<_> = records.iter().filter(|r| r.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, "b");
    }

    #[tokio::test]
    async fn test_default_scoped_per_kind() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().await;

        db.credentials
            .insert(&conn, CredentialKind::GithubToken, &record("t", "token"))
            .unwrap();
        db.credentials
            .insert(&conn, CredentialKind::EnvProfile, &record("e", "env"))
            .unwrap();

        db.credentials
            .set_default(&mut conn, CredentialKind::GithubToken, "t")
            .unwrap();
        db.credentials
            .set_default(&mut conn, CredentialKind::EnvProfile, "e")
            .unwrap();

        assert!(db
            .credentials
            .get_default(&conn, CredentialKind::GithubToken)
            .unwrap()
            .is_some());
        assert!(db
            .credentials
            .get_default(&conn, CredentialKind::EnvProfile)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_set_default_unknown_id() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().await;

        assert!(matches!(
            db.credentials
                .set_default(&mut conn, CredentialKind::StartupProfile, "ghost"),
            Err(DatabaseError::NotFound(_))
        ));
    }
}

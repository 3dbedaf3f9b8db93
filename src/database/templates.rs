//! Config template persistence

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::DatabaseResult;

/// Template kind; determines the in-container target path and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateType {
    ProjectDoc,
    Skill,
    McpServer,
    SlashCommand,
}

impl TemplateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateType::ProjectDoc => "project-doc",
            TemplateType::Skill => "skill",
            TemplateType::McpServer => "mcp-server",
            TemplateType::SlashCommand => "slash-command",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "project-doc" => Some(TemplateType::ProjectDoc),
            "skill" => Some(TemplateType::Skill),
            "mcp-server" => Some(TemplateType::McpServer),
            "slash-command" => Some(TemplateType::SlashCommand),
            _ => None,
        }
    }
}

impl std::fmt::Display for TemplateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored config template
#[derive(Debug, Clone, Serialize)]
pub struct TemplateRecord {
    pub id: String,
    pub name: String,
    pub template_type: TemplateType,
    pub content: String,
    /// Optional base64 archive (skill extras) extracted next to the template
    pub archive: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Store for config templates
pub struct TemplateStore;

impl TemplateStore {
    pub fn new() -> Self {
        Self
    }

    pub fn insert(&self, conn: &Connection, record: &TemplateRecord) -> DatabaseResult<()> {
        conn.execute(
            r#"
            INSERT INTO config_templates (id, name, template_type, content, archive)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            rusqlite::params![
                record.id,
                record.name,
                record.template_type.as_str(),
                record.content,
                record.archive,
            ],
        )?;
        Ok(())
    }

    pub fn update(&self, conn: &Connection, record: &TemplateRecord) -> DatabaseResult<()> {
        conn.execute(
            r#"
            UPDATE config_templates
            SET name = ?2, template_type = ?3, content = ?4, archive = ?5,
                updated_at = strftime('%s', 'now')
            WHERE id = ?1
            "#,
            rusqlite::params![
                record.id,
                record.name,
                record.template_type.as_str(),
                record.content,
                record.archive,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, conn: &Connection, id: &str) -> DatabaseResult<Option<TemplateRecord>> {
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_BASE))?;
        let record = stmt.query_row([id], row_to_record).optional()?;
        Ok(record)
    }

    pub fn get_many(&self, conn: &Connection, ids: &[String]) -> DatabaseResult<Vec<TemplateRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(conn, id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub fn all(&self, conn: &Connection) -> DatabaseResult<Vec<TemplateRecord>> {
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY template_type, name",
            SELECT_BASE
        ))?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn delete(&self, conn: &Connection, id: &str) -> DatabaseResult<bool> {
        let affected = conn.execute("DELETE FROM config_templates WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

const SELECT_BASE: &str = r#"
    SELECT id, name, template_type, content, archive, created_at, updated_at
    FROM config_templates
"#;

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TemplateRecord> {
    let template_type: String = row.get(2)?;
    Ok(TemplateRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        template_type: TemplateType::parse(&template_type).unwrap_or(TemplateType::ProjectDoc),
        content: row.get(3)?,
        archive: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn template(id: &str, name: &str, template_type: TemplateType) -> TemplateRecord {
        TemplateRecord {
            id: id.into(),
            name: name.into(),
            template_type,
            content: "content".into(),
            archive: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn test_name_type_uniqueness() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        db.templates
            .insert(&conn, &template("t1", "review", TemplateType::Skill))
            .unwrap();
        // Same name, same type: rejected
        assert!(db
            .templates
            .insert(&conn, &template("t2", "review", TemplateType::Skill))
            .is_err());
        // Same name, different type: fine
        db.templates
            .insert(&conn, &template("t3", "review", TemplateType::SlashCommand))
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_many_skips_missing() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        db.templates
            .insert(&conn, &template("t1", "docs", TemplateType::ProjectDoc))
            .unwrap();

        let records = db
            .templates
            .get_many(&conn, &["t1".to_string(), "ghost".to_string()])
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "t1");
    }
}

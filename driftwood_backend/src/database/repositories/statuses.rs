use crate::database::models::StatusRecord;
use anyhow::Result;
use rusqlite::{params, Connection, Row};

pub(super) struct SqliteStatusRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

const STATUS_COLUMNS: &str = "id, account_id, activity_id, uri, created_at, content, spoiler_text, \
     sensitive, visibility, language, in_reply_to_id, in_reply_to_account_id";

fn map_status(row: &Row<'_>) -> rusqlite::Result<StatusRecord> {
    Ok(StatusRecord {
        id: row.get(0)?,
        account_id: row.get(1)?,
        activity_id: row.get(2)?,
        uri: row.get(3)?,
        created_at: row.get(4)?,
        content: row.get(5)?,
        spoiler_text: row.get(6)?,
        sensitive: row.get(7)?,
        visibility: row.get(8)?,
        language: row.get(9)?,
        in_reply_to_id: row.get(10)?,
        in_reply_to_account_id: row.get(11)?,
    })
}

impl<'conn> super::StatusRepository for SqliteStatusRepository<'conn> {
    fn create(&self, record: &StatusRecord) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO statuses ({STATUS_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                record.id,
                record.account_id,
                record.activity_id,
                record.uri,
                record.created_at,
                record.content,
                record.spoiler_text,
                record.sensitive,
                record.visibility,
                record.language,
                record.in_reply_to_id,
                record.in_reply_to_account_id
            ],
        )?;
        Ok(())
    }

    fn list_for_account(&self, account_id: &str) -> Result<Vec<StatusRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {STATUS_COLUMNS} FROM statuses WHERE account_id = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![account_id], map_status)?;
        let mut statuses = Vec::new();
        for row in rows {
            statuses.push(row?);
        }
        Ok(statuses)
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM statuses", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

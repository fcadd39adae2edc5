use crate::database::models::AccountRecord;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(super) struct SqliteAccountRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

fn map_account(row: &Row<'_>) -> rusqlite::Result<AccountRecord> {
    Ok(AccountRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        domain: row.get(2)?,
        display_name: row.get(3)?,
        note: row.get(4)?,
        url: row.get(5)?,
        locked: row.get(6)?,
        bot: row.get(7)?,
        actor_uri: row.get(8)?,
        created_at: row.get(9)?,
    })
}

impl<'conn> super::AccountRepository for SqliteAccountRepository<'conn> {
    fn insert_if_absent(&self, record: &AccountRecord) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT INTO accounts (id, username, domain, display_name, note, url, locked, bot, actor_uri, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT DO NOTHING
            "#,
            params![
                record.id,
                record.username,
                record.domain,
                record.display_name,
                record.note,
                record.url,
                record.locked,
                record.bot,
                record.actor_uri,
                record.created_at
            ],
        )?;
        Ok(inserted == 1)
    }

    fn find_by_handle(&self, username: &str, domain: &str) -> Result<Option<AccountRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, username, domain, display_name, note, url, locked, bot, actor_uri, created_at
                FROM accounts
                WHERE username = ?1 AND domain = ?2
                "#,
                params![username, domain],
                map_account,
            )
            .optional()?)
    }
}

use crate::database::models::ActorRecord;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(super) struct SqliteActorRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

fn map_actor(row: &Row<'_>) -> rusqlite::Result<ActorRecord> {
    Ok(ActorRecord {
        uri: row.get(0)?,
        username: row.get(1)?,
        domain: row.get(2)?,
        public_key_pem: row.get(3)?,
        profile: row.get(4)?,
        fetched_at: row.get(5)?,
    })
}

impl<'conn> super::ActorRepository for SqliteActorRepository<'conn> {
    fn insert_if_absent(&self, record: &ActorRecord) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT INTO actors (uri, username, domain, public_key_pem, profile, fetched_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT DO NOTHING
            "#,
            params![
                record.uri,
                record.username,
                record.domain,
                record.public_key_pem,
                record.profile,
                record.fetched_at
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get(&self, uri: &str) -> Result<Option<ActorRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT uri, username, domain, public_key_pem, profile, fetched_at
                FROM actors
                WHERE uri = ?1
                "#,
                params![uri],
                map_actor,
            )
            .optional()?)
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM actors", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

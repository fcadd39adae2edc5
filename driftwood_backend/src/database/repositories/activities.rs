use crate::database::models::ActivityRecord;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(super) struct SqliteActivityRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

fn map_activity(row: &Row<'_>) -> rusqlite::Result<ActivityRecord> {
    Ok(ActivityRecord {
        id: row.get(0)?,
        payload: row.get(1)?,
        activity_uri: row.get(2)?,
        actor_uri: row.get(3)?,
        received_at: row.get(4)?,
        claimed_at: row.get(5)?,
        attempts: row.get(6)?,
        last_error: row.get(7)?,
        processed_at: row.get(8)?,
    })
}

impl<'conn> super::ActivityRepository for SqliteActivityRepository<'conn> {
    fn create(&self, record: &ActivityRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO activities (id, payload, activity_uri, actor_uri, received_at, claimed_at, attempts, last_error, processed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.id,
                record.payload,
                record.activity_uri,
                record.actor_uri,
                record.received_at,
                record.claimed_at,
                record.attempts,
                record.last_error,
                record.processed_at
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<ActivityRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, payload, activity_uri, actor_uri, received_at, claimed_at, attempts, last_error, processed_at
                FROM activities
                WHERE id = ?1
                "#,
                params![id],
                map_activity,
            )
            .optional()?)
    }

    fn list_pending_after(
        &self,
        cursor: Option<(&str, &str)>,
        until: &str,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>> {
        let (after_received, after_id) = cursor.unwrap_or(("", ""));
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, payload, activity_uri, actor_uri, received_at, claimed_at, attempts, last_error, processed_at
            FROM activities
            WHERE processed_at IS NULL
              AND (received_at > ?1 OR (received_at = ?1 AND id > ?2))
              AND received_at <= ?3
            ORDER BY received_at ASC, id ASC
            LIMIT ?4
            "#,
        )?;
        let rows = stmt.query_map(params![after_received, after_id, until, limit as i64], map_activity)?;
        let mut activities = Vec::new();
        for row in rows {
            activities.push(row?);
        }
        Ok(activities)
    }

    fn count_pending(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM activities WHERE processed_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn claim(&self, id: &str, claimed_at: &str, stale_before: &str) -> Result<bool> {
        let updated = self.conn.execute(
            r#"
            UPDATE activities
            SET claimed_at = ?2
            WHERE id = ?1
              AND processed_at IS NULL
              AND (claimed_at IS NULL OR claimed_at < ?3)
            "#,
            params![id, claimed_at, stale_before],
        )?;
        Ok(updated == 1)
    }

    fn mark_processed(&self, id: &str, processed_at: &str) -> Result<bool> {
        let updated = self.conn.execute(
            r#"
            UPDATE activities
            SET processed_at = ?2, claimed_at = NULL, last_error = NULL
            WHERE id = ?1 AND processed_at IS NULL
            "#,
            params![id, processed_at],
        )?;
        Ok(updated == 1)
    }

    fn release(&self, id: &str, error: &str) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE activities
            SET claimed_at = NULL, attempts = attempts + 1, last_error = ?2
            WHERE id = ?1 AND processed_at IS NULL
            "#,
            params![id, error],
        )?;
        Ok(())
    }
}

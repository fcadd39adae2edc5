pub mod models;
pub mod repositories;

use crate::config::DriftwoodPaths;
use anyhow::{anyhow, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

pub(crate) const MIGRATIONS: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS actors (
        uri TEXT PRIMARY KEY,
        username TEXT NOT NULL,
        domain TEXT NOT NULL,
        public_key_pem TEXT NOT NULL,
        profile TEXT NOT NULL,
        fetched_at TEXT NOT NULL,
        UNIQUE (username, domain)
    );

    CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL,
        domain TEXT NOT NULL,
        display_name TEXT NOT NULL,
        note TEXT NOT NULL,
        url TEXT NOT NULL,
        locked INTEGER NOT NULL DEFAULT 0,
        bot INTEGER NOT NULL DEFAULT 0,
        actor_uri TEXT,
        created_at TEXT NOT NULL,
        UNIQUE (username, domain),
        FOREIGN KEY (actor_uri) REFERENCES actors(uri)
    );

    CREATE TABLE IF NOT EXISTS activities (
        id TEXT PRIMARY KEY,
        payload BLOB NOT NULL,
        activity_uri TEXT,
        actor_uri TEXT,
        received_at TEXT NOT NULL,
        claimed_at TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        processed_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_activities_pending
        ON activities(received_at, id)
        WHERE processed_at IS NULL;

    CREATE TABLE IF NOT EXISTS statuses (
        id TEXT PRIMARY KEY,
        account_id TEXT NOT NULL,
        activity_id TEXT,
        uri TEXT,
        created_at TEXT NOT NULL,
        content TEXT NOT NULL,
        spoiler_text TEXT NOT NULL,
        sensitive INTEGER NOT NULL DEFAULT 0,
        visibility TEXT NOT NULL,
        language TEXT NOT NULL,
        in_reply_to_id TEXT,
        in_reply_to_account_id TEXT,
        FOREIGN KEY (account_id) REFERENCES accounts(id),
        FOREIGN KEY (activity_id) REFERENCES activities(id)
    );

    CREATE INDEX IF NOT EXISTS idx_statuses_account ON statuses(account_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_statuses_activity ON statuses(activity_id);
"#;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    newly_created: bool,
}

impl Database {
    pub fn connect(paths: &DriftwoodPaths) -> Result<Self> {
        let newly_created = !paths.db_path.exists();
        let conn = Connection::open(&paths.db_path)?;
        Ok(Self::from_connection(conn, newly_created))
    }

    pub fn from_connection(conn: Connection, newly_created: bool) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            newly_created,
        }
    }

    pub fn ensure_migrations(&self) -> Result<bool> {
        self.with_conn(|conn| {
            conn.execute_batch(MIGRATIONS)?;
            Ok(())
        })?;
        Ok(self.newly_created)
    }

    /// Runs `f` against the repositories while holding the connection lock.
    /// Never await inside `f`; network I/O belongs outside the closure.
    pub fn with_repositories<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(repositories::SqliteRepositories<'_>) -> Result<T>,
    {
        self.with_conn(|conn| {
            let repos = repositories::SqliteRepositories::new(conn);
            f(repos)
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))?;
        f(&guard)
    }
}

mod accounts;
mod activities;
mod actors;
mod statuses;

use super::models::{AccountRecord, ActivityRecord, ActorRecord, StatusRecord};
use anyhow::Result;
use rusqlite::Connection;

pub trait ActorRepository {
    /// Inserts the actor unless a row with the same uri (or the same
    /// username/domain pair) already exists. Returns whether this call wrote.
    fn insert_if_absent(&self, record: &ActorRecord) -> Result<bool>;
    fn get(&self, uri: &str) -> Result<Option<ActorRecord>>;
    fn count(&self) -> Result<usize>;
}

pub trait AccountRepository {
    fn insert_if_absent(&self, record: &AccountRecord) -> Result<bool>;
    fn find_by_handle(&self, username: &str, domain: &str) -> Result<Option<AccountRecord>>;
}

pub trait StatusRepository {
    fn create(&self, record: &StatusRecord) -> Result<()>;
    fn list_for_account(&self, account_id: &str) -> Result<Vec<StatusRecord>>;
    fn count(&self) -> Result<usize>;
}

pub trait ActivityRepository {
    fn create(&self, record: &ActivityRecord) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<ActivityRecord>>;
    /// Unprocessed entries strictly after the `(received_at, id)` cursor and
    /// received no later than `until`, oldest first.
    fn list_pending_after(
        &self,
        cursor: Option<(&str, &str)>,
        until: &str,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>>;
    fn count_pending(&self) -> Result<usize>;
    /// Compare-and-set on the claim marker. A claim older than `stale_before`
    /// may be taken over.
    fn claim(&self, id: &str, claimed_at: &str, stale_before: &str) -> Result<bool>;
    fn mark_processed(&self, id: &str, processed_at: &str) -> Result<bool>;
    fn release(&self, id: &str, error: &str) -> Result<()>;
}

pub struct SqliteRepositories<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRepositories<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn actors(&self) -> impl ActorRepository + '_ {
        actors::SqliteActorRepository { conn: self.conn }
    }

    pub fn accounts(&self) -> impl AccountRepository + '_ {
        accounts::SqliteAccountRepository { conn: self.conn }
    }

    pub fn statuses(&self) -> impl StatusRepository + '_ {
        statuses::SqliteStatusRepository { conn: self.conn }
    }

    pub fn activities(&self) -> impl ActivityRepository + '_ {
        activities::SqliteActivityRepository { conn: self.conn }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MIGRATIONS;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory db");
        conn.execute_batch(MIGRATIONS).expect("base migrations");
        conn
    }

    fn actor(uri: &str, username: &str) -> ActorRecord {
        ActorRecord {
            uri: uri.into(),
            username: username.into(),
            domain: "remote.example".into(),
            public_key_pem: "-----BEGIN PUBLIC KEY-----".into(),
            profile: "{}".into(),
            fetched_at: "2024-01-01T00:00:00.000000Z".into(),
        }
    }

    fn activity(id: &str, received_at: &str) -> ActivityRecord {
        ActivityRecord {
            id: id.into(),
            payload: br#"{"id":"x"}"#.to_vec(),
            activity_uri: Some(format!("https://remote.example/{id}")),
            actor_uri: None,
            received_at: received_at.into(),
            claimed_at: None,
            attempts: 0,
            last_error: None,
            processed_at: None,
        }
    }

    #[test]
    fn actor_uniqueness_is_enforced_by_the_store() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);

        let first = actor("https://remote.example/users/alice", "alice");
        assert!(repos.actors().insert_if_absent(&first).unwrap());

        let mut again = first.clone();
        again.public_key_pem = "other".into();
        assert!(!repos.actors().insert_if_absent(&again).unwrap());

        // Same handle under a different uri loses too.
        let clash = actor("https://remote.example/people/alice", "alice");
        assert!(!repos.actors().insert_if_absent(&clash).unwrap());

        let stored = repos.actors().get(&first.uri).unwrap().unwrap();
        assert_eq!(stored, first);
        assert_eq!(repos.actors().count().unwrap(), 1);
        assert!(repos.actors().get(&clash.uri).unwrap().is_none());
    }

    #[test]
    fn account_and_status_repositories_work() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);

        let account = AccountRecord {
            id: "acct-1".into(),
            username: "alice".into(),
            domain: "remote.example".into(),
            display_name: "Alice".into(),
            note: "bio".into(),
            url: "https://remote.example/@alice".into(),
            locked: false,
            bot: true,
            actor_uri: None,
            created_at: "2024-01-01T00:00:00.000000Z".into(),
        };
        assert!(repos.accounts().insert_if_absent(&account).unwrap());
        let duplicate = AccountRecord {
            id: "acct-2".into(),
            ..account.clone()
        };
        assert!(!repos.accounts().insert_if_absent(&duplicate).unwrap());
        let found = repos
            .accounts()
            .find_by_handle("alice", "remote.example")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "acct-1");
        assert!(found.bot);

        repos
            .activities()
            .create(&activity("act-1", "2024-01-01T00:00:00.000000Z"))
            .unwrap();
        let status = StatusRecord {
            id: "status-1".into(),
            account_id: account.id.clone(),
            activity_id: Some("act-1".into()),
            uri: None,
            created_at: "2024-01-01T00:00:00.000000Z".into(),
            content: "hello".into(),
            spoiler_text: String::new(),
            sensitive: false,
            visibility: "public".into(),
            language: "en".into(),
            in_reply_to_id: None,
            in_reply_to_account_id: None,
        };
        repos.statuses().create(&status).unwrap();
        assert_eq!(repos.statuses().list_for_account("acct-1").unwrap(), vec![status]);
        assert_eq!(repos.statuses().count().unwrap(), 1);
    }

    #[test]
    fn pending_entries_come_back_oldest_first() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);
        let activities = repos.activities();
        activities.create(&activity("b", "2024-01-01T00:00:02.000000Z")).unwrap();
        activities.create(&activity("a", "2024-01-01T00:00:01.000000Z")).unwrap();
        activities.create(&activity("c", "2024-01-01T00:00:02.000000Z")).unwrap();

        let until = "2024-01-01T00:00:02.000000Z";
        activities.create(&activity("late", "2024-01-01T00:00:03.000000Z")).unwrap();

        let first_page = activities.list_pending_after(None, until, 2).unwrap();
        let ids: Vec<_> = first_page.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let last = first_page.last().unwrap();
        let next = activities
            .list_pending_after(Some((&last.received_at, &last.id)), until, 2)
            .unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, "c");
    }

    #[test]
    fn claims_are_exclusive_and_processed_is_sticky() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);
        let activities = repos.activities();
        activities.create(&activity("a", "2024-01-01T00:00:00.000000Z")).unwrap();

        let now = "2024-01-01T00:01:00.000000Z";
        let stale_before = "2024-01-01T00:00:30.000000Z";
        assert!(activities.claim("a", now, stale_before).unwrap());
        assert!(!activities.claim("a", now, stale_before).unwrap());

        // An abandoned claim can be taken over once it is older than the lease.
        assert!(activities
            .claim("a", "2024-01-01T00:10:00.000000Z", "2024-01-01T00:05:00.000000Z")
            .unwrap());

        assert!(activities.mark_processed("a", "2024-01-01T00:10:01.000000Z").unwrap());
        assert!(!activities.mark_processed("a", "2024-01-01T00:20:00.000000Z").unwrap());
        let stored = activities.get("a").unwrap().unwrap();
        assert_eq!(stored.processed_at.as_deref(), Some("2024-01-01T00:10:01.000000Z"));

        assert!(!activities
            .claim("a", "2024-01-02T00:00:00.000000Z", "2024-01-02T00:00:00.000000Z")
            .unwrap());
        assert_eq!(activities.count_pending().unwrap(), 0);
    }

    #[test]
    fn release_records_the_failure_and_reopens_the_entry() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);
        let activities = repos.activities();
        activities.create(&activity("a", "2024-01-01T00:00:00.000000Z")).unwrap();

        let now = "2024-01-01T00:01:00.000000Z";
        assert!(activities.claim("a", now, now).unwrap());
        activities.release("a", "missing published").unwrap();

        let stored = activities.get("a").unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("missing published"));
        assert!(stored.claimed_at.is_none());
        assert!(!stored.is_processed());
        assert!(activities.claim("a", now, now).unwrap());
    }
}

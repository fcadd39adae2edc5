use crate::database::models::ActivityRecord;
use crate::database::repositories::ActivityRepository;
use crate::database::Database;
use crate::utils::{format_timestamp, now_utc_iso};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use uuid::Uuid;

const PENDING_PAGE_SIZE: usize = 64;

/// Durable record of every accepted delivery and how far it got.
#[derive(Clone)]
pub struct DeliveryLedger {
    database: Database,
    claim_lease: Duration,
}

impl DeliveryLedger {
    pub fn new(database: Database, claim_lease: Duration) -> Self {
        Self {
            database,
            claim_lease,
        }
    }

    /// Persists the raw body as received. Nothing is processed here.
    pub fn enqueue(
        &self,
        payload: &[u8],
        activity_uri: Option<&str>,
        actor_uri: Option<&str>,
    ) -> Result<ActivityRecord> {
        let record = ActivityRecord {
            id: Uuid::new_v4().to_string(),
            payload: payload.to_vec(),
            activity_uri: activity_uri.map(str::to_string),
            actor_uri: actor_uri.map(str::to_string),
            received_at: now_utc_iso(),
            claimed_at: None,
            attempts: 0,
            last_error: None,
            processed_at: None,
        };
        self.database
            .with_repositories(|repos| repos.activities().create(&record))
            .context("failed to record inbound activity")?;
        Ok(record)
    }

    /// Pending entries received up to now, oldest first, fetched page by page.
    pub fn pending(&self) -> Pending {
        Pending {
            database: self.database.clone(),
            until: now_utc_iso(),
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Takes the processing claim on an entry. Fails if the entry is already
    /// processed or another worker holds a claim younger than the lease.
    pub fn claim(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let lease = chrono::Duration::from_std(self.claim_lease).context("claim lease out of range")?;
        let claimed_at = format_timestamp(now);
        let stale_before = format_timestamp(now - lease);
        self.database
            .with_repositories(|repos| repos.activities().claim(id, &claimed_at, &stale_before))
    }

    /// Records completion. Returns false when the entry was already processed.
    pub fn mark_processed(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let at = format_timestamp(at);
        self.database
            .with_repositories(|repos| repos.activities().mark_processed(id, &at))
    }

    /// Gives up the claim after a failed attempt; the entry stays pending.
    pub fn release(&self, id: &str, error: &str) -> Result<()> {
        self.database
            .with_repositories(|repos| repos.activities().release(id, error))
    }

    pub fn get(&self, id: &str) -> Result<Option<ActivityRecord>> {
        self.database.with_repositories(|repos| repos.activities().get(id))
    }

    pub fn count_pending(&self) -> Result<usize> {
        self.database
            .with_repositories(|repos| repos.activities().count_pending())
    }
}

/// Lazy iterator over pending entries. Each page re-reads the store, so an
/// entry processed elsewhere mid-sweep is not yielded again.
pub struct Pending {
    database: Database,
    until: String,
    cursor: Option<(String, String)>,
    buffer: VecDeque<ActivityRecord>,
    exhausted: bool,
}

impl Pending {
    fn fill(&mut self) -> Result<()> {
        let cursor = self
            .cursor
            .as_ref()
            .map(|(received_at, id)| (received_at.as_str(), id.as_str()));
        let page = self.database.with_repositories(|repos| {
            repos
                .activities()
                .list_pending_after(cursor, &self.until, PENDING_PAGE_SIZE)
        })?;
        if page.len() < PENDING_PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some((last.received_at.clone(), last.id.clone()));
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for Pending {
    type Item = Result<ActivityRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fill() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

use super::activity::{self, ActivityView, DecodeError, FieldError};
use super::actors::{ActorDirectory, ResolveError};
use super::ledger::DeliveryLedger;
use crate::database::models::{AccountRecord, ActivityRecord, ActorRecord, StatusRecord};
use crate::database::repositories::{AccountRepository, StatusRepository};
use crate::database::Database;
use crate::utils::{format_timestamp, now_utc_iso};
use anyhow::anyhow;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_VISIBILITY: &str = "public";
const DEFAULT_LANGUAGE: &str = "en";

/// Lifecycle of a ledger entry while a worker holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Routing,
    Applied,
    Ignored,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Side effects were written.
    Applied,
    /// Understood and deliberately dropped.
    Ignored,
    /// Someone else owns or already finished the entry.
    Skipped,
}

impl Outcome {
    fn state(self) -> EntryState {
        match self {
            Outcome::Applied => EntryState::Applied,
            Outcome::Ignored => EntryState::Ignored,
            Outcome::Skipped => EntryState::Pending,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("actor profile unusable: {0}")]
    ProfileField(FieldError),
    #[error("note unusable: {0}")]
    NoteField(FieldError),
    #[error("store failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

struct Delivery<'a> {
    entry: &'a ActivityRecord,
    activity: &'a ActivityView,
    account: &'a AccountRecord,
}

type Handler = fn(&InboxProcessor, &Delivery<'_>) -> Result<Outcome, ProcessError>;

/// Activity type tag → handler. Tags not listed are acknowledged and ignored.
static HANDLERS: &[(&str, Handler)] = &[("Create", handle_create as Handler)];

fn handler_for(kind: &str) -> Option<Handler> {
    HANDLERS
        .iter()
        .find(|(tag, _)| *tag == kind)
        .map(|(_, handler)| *handler)
}

/// Turns ledger entries into local state, at most once per entry.
#[derive(Clone)]
pub struct InboxProcessor {
    database: Database,
    directory: ActorDirectory,
    ledger: DeliveryLedger,
}

impl InboxProcessor {
    pub fn new(database: Database, directory: ActorDirectory, ledger: DeliveryLedger) -> Self {
        Self {
            database,
            directory,
            ledger,
        }
    }

    pub async fn process_entry(&self, entry: &ActivityRecord) -> Result<Outcome, ProcessError> {
        if entry.is_processed() || !self.ledger.claim(&entry.id, Utc::now())? {
            tracing::debug!(entry = %entry.id, "entry already claimed or processed; skipping");
            return Ok(Outcome::Skipped);
        }

        match self.apply(entry).await {
            Ok(outcome) => {
                self.ledger.mark_processed(&entry.id, Utc::now())?;
                tracing::debug!(entry = %entry.id, state = ?outcome.state(), "entry processed");
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!(
                    entry = %entry.id,
                    state = ?EntryState::Failed,
                    attempt = entry.attempts + 1,
                    error = %err,
                    "failed to process inbound activity"
                );
                if let Err(release_err) = self.ledger.release(&entry.id, &err.to_string()) {
                    tracing::error!(entry = %entry.id, error = ?release_err, "failed to release claim");
                }
                Err(err)
            }
        }
    }

    async fn apply(&self, entry: &ActivityRecord) -> Result<Outcome, ProcessError> {
        let activity = activity::decode(&entry.payload)?;
        tracing::debug!(
            entry = %entry.id,
            state = ?EntryState::Routing,
            kind = %activity.kind,
            actor = %activity.actor,
            "routing activity"
        );
        let actor = self.directory.resolve(&activity.actor).await?;
        let account = self.find_or_create_account(&actor)?;

        let Some(handler) = handler_for(&activity.kind) else {
            tracing::debug!(entry = %entry.id, kind = %activity.kind, "no handler for activity type");
            return Ok(Outcome::Ignored);
        };
        handler(
            self,
            &Delivery {
                entry,
                activity: &activity,
                account: &account,
            },
        )
    }

    fn find_or_create_account(&self, actor: &ActorRecord) -> Result<AccountRecord, ProcessError> {
        if let Some(account) = self.directory.find_local_account(&actor.uri)? {
            return Ok(account);
        }

        let profile: Value = serde_json::from_str(&actor.profile).map_err(DecodeError::from)?;
        let display_name = activity::required_str(&profile, "name").map_err(ProcessError::ProfileField)?;
        let note = activity::required_str(&profile, "summary").map_err(ProcessError::ProfileField)?;
        let url = activity::required_str(&profile, "url").map_err(ProcessError::ProfileField)?;
        let bot = matches!(activity::object_type(&profile), Some("Service" | "Application"));

        let record = AccountRecord {
            id: Uuid::new_v4().to_string(),
            username: actor.username.clone(),
            domain: actor.domain.clone(),
            display_name: display_name.to_string(),
            note: note.to_string(),
            url: url.to_string(),
            locked: activity::bool_or_default(&profile, "manuallyApprovesFollowers"),
            bot,
            actor_uri: Some(actor.uri.clone()),
            created_at: now_utc_iso(),
        };
        let (inserted, stored) = self.database.with_repositories(|repos| {
            let accounts = repos.accounts();
            let inserted = accounts.insert_if_absent(&record)?;
            Ok((inserted, accounts.find_by_handle(&record.username, &record.domain)?))
        })?;
        let account = stored.ok_or_else(|| {
            anyhow!(
                "account {}@{} missing after insert",
                record.username,
                record.domain
            )
        })?;
        if inserted {
            tracing::info!(
                account = %account.id,
                handle = %format!("{}@{}", account.username, account.domain),
                "created local account for remote actor"
            );
        }
        Ok(account)
    }

    fn create_note(&self, delivery: &Delivery<'_>, note: &Value) -> Result<Outcome, ProcessError> {
        let published = activity::required_time(note, "published").map_err(ProcessError::NoteField)?;
        let status = StatusRecord {
            id: Uuid::new_v4().to_string(),
            account_id: delivery.account.id.clone(),
            activity_id: Some(delivery.entry.id.clone()),
            uri: activity::optional_str(note, "id").map(str::to_string),
            created_at: format_timestamp(published),
            content: activity::str_or_default(note, "content").to_string(),
            spoiler_text: activity::str_or_default(note, "summary").to_string(),
            sensitive: activity::bool_or_default(note, "sensitive"),
            visibility: DEFAULT_VISIBILITY.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            in_reply_to_id: None,
            in_reply_to_account_id: None,
        };
        self.database
            .with_repositories(|repos| repos.statuses().create(&status))?;
        tracing::info!(
            status = %status.id,
            account = %delivery.account.id,
            activity = %delivery.activity.id,
            "created status from remote note"
        );
        Ok(Outcome::Applied)
    }
}

fn handle_create(processor: &InboxProcessor, delivery: &Delivery<'_>) -> Result<Outcome, ProcessError> {
    let object = &delivery.activity.object;
    match activity::object_type(object) {
        Some("Note") => processor.create_note(delivery, object),
        other => {
            tracing::debug!(
                activity = %delivery.activity.id,
                object_type = other.unwrap_or("<none>"),
                "ignoring Create of unsupported object"
            );
            Ok(Outcome::Ignored)
        }
    }
}

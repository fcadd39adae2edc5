//! Remote actor resolution and caching.
//!
//! An actor is fetched the first time anything references it and kept
//! forever after. Concurrent first references race on the store's uniqueness
//! constraints; every racer returns whatever row won.

use crate::config::FederationConfig;
use crate::database::models::{AccountRecord, ActorRecord};
use crate::database::repositories::{AccountRepository, ActorRepository};
use crate::database::Database;
use crate::utils::now_utc_iso;
use anyhow::Context;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::ACCEPT;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const ACTIVITY_JSON: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("actor fetch timed out")]
    Timeout,
    #[error("actor fetch failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("actor fetch returned HTTP {0}")]
    Status(u16),
    #[error("actor profile exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid actor identifier `{0}`")]
    InvalidIdentifier(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("actor profile is malformed: {0}")]
    MalformedProfile(String),
    #[error("actor profile is missing `{0}`")]
    MissingField(&'static str),
    #[error("actor profile for {requested} claims to be {claimed}")]
    IdentityMismatch { requested: String, claimed: String },
    #[error("handle {username}@{domain} already belongs to another actor")]
    HandleTaken { username: String, domain: String },
    #[error("actor store failure: {0:#}")]
    Store(#[source] anyhow::Error),
}

impl ResolveError {
    /// Permanent failures will not go away by retrying the same identifier.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ResolveError::InvalidIdentifier(_)
                | ResolveError::HandleTaken { .. }
                | ResolveError::Fetch(FetchError::TooLarge { .. })
        )
    }
}

/// Retrieves the raw profile document behind an actor identifier.
#[async_trait]
pub trait ActorFetcher: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<Bytes, FetchError>;
}

/// Supplies the PEM-encoded public key owned by an actor.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn public_key_pem(&self, actor_id: &str) -> Result<String, ResolveError>;
}

pub struct HttpActorFetcher {
    client: reqwest::Client,
    max_profile_bytes: usize,
}

impl HttpActorFetcher {
    pub fn new(config: &FederationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.fetch_timeout)
            .build()
            .context("failed to build actor fetch client")?;
        Ok(Self {
            client,
            max_profile_bytes: config.max_profile_bytes,
        })
    }
}

#[async_trait]
impl ActorFetcher for HttpActorFetcher {
    async fn fetch(&self, uri: &str) -> Result<Bytes, FetchError> {
        let mut response = self
            .client
            .get(uri)
            .header(ACCEPT, ACTIVITY_JSON)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let limit = self.max_profile_bytes;
        if response
            .content_length()
            .is_some_and(|declared| declared > limit as u64)
        {
            return Err(FetchError::TooLarge { limit });
        }

        // Content-Length can be absent or lie.
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err)
    }
}

/// `(username, domain)` derived from an actor identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    pub username: String,
    pub domain: String,
}

pub fn parse_identifier(identifier: &str) -> Result<Handle, ResolveError> {
    let invalid = || ResolveError::InvalidIdentifier(identifier.to_string());
    let url = Url::parse(identifier).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    let host = url.host_str().filter(|host| !host.is_empty()).ok_or_else(invalid)?;
    let domain = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let username = url
        .path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
        .ok_or_else(invalid)?
        .to_string();
    Ok(Handle { username, domain })
}

/// Extracts the public key from a fetched profile after checking that the
/// document describes `identifier` and nobody else.
fn extract_public_key(identifier: &str, raw: &[u8]) -> Result<String, ResolveError> {
    let document: Value = serde_json::from_slice(raw)
        .map_err(|err| ResolveError::MalformedProfile(err.to_string()))?;
    if !document.is_object() {
        return Err(ResolveError::MalformedProfile("profile is not a JSON object".into()));
    }
    if let Some(claimed) = document.get("id").and_then(Value::as_str) {
        if claimed != identifier {
            return Err(ResolveError::IdentityMismatch {
                requested: identifier.to_string(),
                claimed: claimed.to_string(),
            });
        }
    }

    let key = match document.get("publicKey") {
        Some(Value::Array(keys)) => keys.first(),
        other => other,
    }
    .filter(|key| key.is_object())
    .ok_or(ResolveError::MissingField("publicKey"))?;

    if let Some(owner) = key.get("owner").and_then(Value::as_str) {
        if owner != identifier {
            return Err(ResolveError::IdentityMismatch {
                requested: identifier.to_string(),
                claimed: owner.to_string(),
            });
        }
    }
    key.get("publicKeyPem")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ResolveError::MissingField("publicKey.publicKeyPem"))
}

#[derive(Clone)]
pub struct ActorDirectory {
    database: Database,
    fetcher: Arc<dyn ActorFetcher>,
    fetch_timeout: Duration,
}

impl ActorDirectory {
    pub fn new(database: Database, fetcher: Arc<dyn ActorFetcher>, fetch_timeout: Duration) -> Self {
        Self {
            database,
            fetcher,
            fetch_timeout,
        }
    }

    /// Cached actor for `identifier`, fetching and persisting it on first use.
    pub async fn resolve(&self, identifier: &str) -> Result<ActorRecord, ResolveError> {
        let handle = parse_identifier(identifier)?;
        if let Some(actor) = self.lookup(identifier)? {
            return Ok(actor);
        }

        tracing::debug!(actor = %identifier, "actor not cached; fetching profile");
        let body = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(identifier))
            .await
            .map_err(|_| FetchError::Timeout)??;
        let public_key_pem = extract_public_key(identifier, &body)?;
        let profile = String::from_utf8(body.to_vec())
            .map_err(|err| ResolveError::MalformedProfile(err.to_string()))?;

        let record = ActorRecord {
            uri: identifier.to_string(),
            username: handle.username.clone(),
            domain: handle.domain.clone(),
            public_key_pem,
            profile,
            fetched_at: now_utc_iso(),
        };
        let (inserted, stored) = self
            .database
            .with_repositories(|repos| {
                let actors = repos.actors();
                let inserted = actors.insert_if_absent(&record)?;
                Ok((inserted, actors.get(identifier)?))
            })
            .map_err(ResolveError::Store)?;

        match stored {
            Some(actor) => {
                if inserted {
                    tracing::info!(
                        actor = %identifier,
                        handle = %format!("{}@{}", actor.username, actor.domain),
                        "cached remote actor"
                    );
                } else {
                    tracing::debug!(actor = %identifier, "actor was cached concurrently; using stored row");
                }
                Ok(actor)
            }
            None => Err(ResolveError::HandleTaken {
                username: handle.username,
                domain: handle.domain,
            }),
        }
    }

    /// Cached actor without touching the network.
    pub fn lookup(&self, identifier: &str) -> Result<Option<ActorRecord>, ResolveError> {
        self.database
            .with_repositories(|repos| repos.actors().get(identifier))
            .map_err(ResolveError::Store)
    }

    /// Local shadow account for the actor, `None` when it has not been created yet.
    pub fn find_local_account(&self, identifier: &str) -> Result<Option<AccountRecord>, ResolveError> {
        let handle = parse_identifier(identifier)?;
        self.database
            .with_repositories(|repos| {
                repos
                    .accounts()
                    .find_by_handle(&handle.username, &handle.domain)
            })
            .map_err(ResolveError::Store)
    }
}

#[async_trait]
impl KeyResolver for ActorDirectory {
    async fn public_key_pem(&self, actor_id: &str) -> Result<String, ResolveError> {
        Ok(self.resolve(actor_id).await?.public_key_pem)
    }
}

//! Fixtures shared by the inbox pipeline tests.

use super::actors::{ActorFetcher, FetchError, KeyResolver, ResolveError};
use super::signature::{http_date, sign_request};
use crate::database::Database;
use async_trait::async_trait;
use axum::http::header::{DATE, HOST};
use axum::http::request::Parts;
use axum::http::{Method, Request};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use picky::key::PrivateKey;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const ALICE: &str = "https://remote/actors/alice";
pub const ALICE_PRIVATE_PEM: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/alice_private.pem"));
pub const ALICE_PUBLIC_PEM: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/alice_public.pem"));
pub const MALLORY_PRIVATE_PEM: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/mallory_private.pem"));

pub fn memory_database() -> Database {
    let conn = Connection::open_in_memory().expect("in-memory db");
    let database = Database::from_connection(conn, true);
    database.ensure_migrations().expect("migrations");
    database
}

pub fn profile_json(uri: &str, public_key_pem: &str) -> Value {
    json!({
        "@context": ["https://www.w3.org/ns/activitystreams", "https://w3id.org/security/v1"],
        "id": uri,
        "type": "Person",
        "preferredUsername": "alice",
        "name": "Alice",
        "summary": "<p>hi</p>",
        "url": "https://remote/@alice",
        "inbox": format!("{uri}/inbox"),
        "publicKey": {
            "id": format!("{uri}#main-key"),
            "owner": uri,
            "publicKeyPem": public_key_pem,
        }
    })
}

/// Serves canned profile documents and counts how often it was asked.
#[derive(Default)]
pub struct StubFetcher {
    profiles: HashMap<String, Vec<u8>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubFetcher {
    pub fn with_profile(uri: &str, profile: Value) -> Self {
        let mut fetcher = Self::default();
        fetcher
            .profiles
            .insert(uri.to_string(), serde_json::to_vec(&profile).expect("profile json"));
        fetcher
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActorFetcher for StubFetcher {
    async fn fetch(&self, uri: &str) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.profiles
            .get(uri)
            .map(|body| Bytes::from(body.clone()))
            .ok_or(FetchError::Status(404))
    }
}

/// Fixed actor → key table; unknown actors fail as an unreachable server would.
#[derive(Default)]
pub struct StaticKeys {
    keys: HashMap<String, String>,
}

impl StaticKeys {
    pub fn new<const N: usize>(entries: [(&str, &str); N]) -> Self {
        Self {
            keys: entries
                .into_iter()
                .map(|(actor, pem)| (actor.to_string(), pem.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl KeyResolver for StaticKeys {
    async fn public_key_pem(&self, actor_id: &str) -> Result<String, ResolveError> {
        self.keys
            .get(actor_id)
            .cloned()
            .ok_or(ResolveError::Fetch(FetchError::Status(404)))
    }
}

pub fn private_key(pem: &str) -> PrivateKey {
    PrivateKey::from_pem_str(pem).expect("private key")
}

/// A POST to `path` on `driftwood.local`, signed with the given key.
pub fn signed_request(private_pem: &str, key_id: &str, path: &str, body: &[u8]) -> Parts {
    signed_request_at(private_pem, key_id, path, body, Utc::now())
}

pub fn signed_request_at(
    private_pem: &str,
    key_id: &str,
    path: &str,
    body: &[u8],
    date: DateTime<Utc>,
) -> Parts {
    let (mut parts, ()) = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(HOST, "driftwood.local")
        .header(DATE, http_date(date))
        .body(())
        .expect("request")
        .into_parts();
    sign_request(&mut parts, body, key_id, &private_key(private_pem)).expect("sign request");
    parts
}

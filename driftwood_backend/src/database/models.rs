use serde::{Deserialize, Serialize};

/// Cached copy of a remote actor and the key it signs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorRecord {
    pub uri: String,
    pub username: String,
    pub domain: String,
    pub public_key_pem: String,
    /// Profile document exactly as fetched.
    pub profile: String,
    pub fetched_at: String,
}

/// Local projection of a remote actor into the account space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    pub username: String,
    pub domain: String,
    pub display_name: String,
    pub note: String,
    pub url: String,
    pub locked: bool,
    pub bot: bool,
    pub actor_uri: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: String,
    pub payload: Vec<u8>,
    pub activity_uri: Option<String>,
    pub actor_uri: Option<String>,
    pub received_at: String,
    pub claimed_at: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub processed_at: Option<String>,
}

impl ActivityRecord {
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: String,
    pub account_id: String,
    pub activity_id: Option<String>,
    pub uri: Option<String>,
    pub created_at: String,
    pub content: String,
    pub spoiler_text: String,
    pub sensitive: bool,
    pub visibility: String,
    pub language: String,
    pub in_reply_to_id: Option<String>,
    pub in_reply_to_account_id: Option<String>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{GuildSpaceKey, Snowflake, StreamDid};

/// Durable record for a bridged guild/space pair (`configs/` namespace).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRecord {
    pub guild_id: Snowflake,
    pub space_id: StreamDid,
    pub created_at: DateTime<Utc>,
}

impl BridgeRecord {
    pub fn key(&self) -> GuildSpaceKey {
        GuildSpaceKey::new(self.guild_id.clone(), self.space_id.clone())
    }
}

/// Cached shape of a Roomy user's profile, read-through/write-through via the
/// bounded LRU in front of the durable `roomy-user-profile` store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomyUserProfile {
    pub name: String,
    pub avatar: Option<String>,
    pub handle: Option<String>,
}

/// `edit-info` namespace value: the last-applied edit's timestamp and body
/// hash, used to discard stale or duplicate edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditInfo {
    pub edited_timestamp: i64,
    pub content_hash: String,
}

/// `webhook-token` namespace value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookToken {
    pub webhook_id: String,
    pub token: String,
}

impl WebhookToken {
    pub fn encode(&self) -> String {
        format!("{}:{}", self.webhook_id, self.token)
    }
}

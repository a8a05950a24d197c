//! Discord-facing value types. Kept independent of `serenity`'s own model
//! types so that `Bridge`/the sync services are written against a narrow,
//! stable shape instead of the full gateway model.

use serde::{Deserialize, Serialize};

use crate::ids::Snowflake;

pub const MESSAGE_TYPE_DEFAULT: u8 = 0;
pub const MESSAGE_TYPE_CHANNEL_NAME_CHANGE: u8 = 4;
pub const MESSAGE_TYPE_REPLY: u8 = 19;
pub const MESSAGE_TYPE_THREAD_CREATED: u8 = 18;
pub const MESSAGE_TYPE_THREAD_STARTER_MESSAGE: u8 = 21;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordAttachment {
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordMessage {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub author_id: Snowflake,
    pub author_username: String,
    pub author_global_name: Option<String>,
    pub author_avatar: Option<String>,
    pub webhook_id: Option<Snowflake>,
    pub kind: u8,
    pub content: String,
    pub attachments: Vec<DiscordAttachment>,
    pub reply_to: Option<Snowflake>,
    pub timestamp: i64,
    pub edited_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordUser {
    pub id: Snowflake,
    pub username: String,
    pub global_name: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordChannel {
    pub id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub parent_id: Option<Snowflake>,
    pub name: String,
    pub is_thread: bool,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordReaction {
    pub message_id: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub user_id: Snowflake,
    pub emoji: String,
}

/// Tagged union of the gateway events this bridge cares about, per spec.md
/// §3's `DiscordEvent`. Every payload independently carries `guild_id`
/// because routing by guild happens before this value reaches a bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum DiscordEvent {
    MessageCreate(DiscordMessage),
    MessageUpdate(DiscordMessage),
    MessageDelete {
        message_id: Snowflake,
        channel_id: Snowflake,
        guild_id: Option<Snowflake>,
    },
    ReactionAdd(DiscordReaction),
    ReactionRemove(DiscordReaction),
    ChannelCreate(DiscordChannel),
    ThreadCreate(DiscordChannel),
}

impl DiscordEvent {
    pub fn guild_id(&self) -> Option<&Snowflake> {
        match self {
            DiscordEvent::MessageCreate(m) | DiscordEvent::MessageUpdate(m) => m.guild_id.as_ref(),
            DiscordEvent::MessageDelete { guild_id, .. } => guild_id.as_ref(),
            DiscordEvent::ReactionAdd(r) | DiscordEvent::ReactionRemove(r) => r.guild_id.as_ref(),
            DiscordEvent::ChannelCreate(c) | DiscordEvent::ThreadCreate(c) => c.guild_id.as_ref(),
        }
    }
}

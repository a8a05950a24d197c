//! Wire-level shapes exchanged with a Roomy space. Roomy has no existing
//! Rust client in this crate's dependency universe, so these are plain
//! `serde`-derived values matching spec.md §3/§6, not bindings to a real SDK.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::Ulid;

/// An outbound event bound for a Roomy space. `kind` carries the
/// `space.roomy.*` `$type` discriminator (e.g. `message.createMessage.v0`);
/// `room` is the target room when the event is room-scoped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomyEvent {
    pub id: Ulid,
    #[serde(rename = "$type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<Ulid>,
    #[serde(flatten)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extensions: Value,
}

impl RoomyEvent {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Ulid::new(),
            kind: kind.into(),
            room: None,
            payload,
            extensions: Value::Null,
        }
    }

    pub fn in_room(mut self, room: Ulid) -> Self {
        self.room = Some(room);
        self
    }

    pub fn with_extensions(mut self, extensions: Value) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }
}

/// A single item pulled off a space's ordered event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedStreamEvent {
    pub idx: u64,
    pub event: RoomyEvent,
    pub user: Option<String>,
}

/// Metadata accompanying a subscribe-delivered batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCallbackMeta {
    pub batch_id: Ulid,
}

/// One delivered batch: the decoded events plus whether it is the terminal
/// batch of the current subscribe window.
#[derive(Debug, Clone)]
pub struct StreamBatch {
    pub events: Vec<DecodedStreamEvent>,
    pub meta: EventCallbackMeta,
    pub is_last: bool,
}

pub mod type_id {
    pub const CREATE_MESSAGE: &str = "message.createMessage.v0";
    pub const EDIT_MESSAGE: &str = "message.editMessage.v0";
    pub const DELETE_MESSAGE: &str = "message.deleteMessage.v0";
    pub const FORWARD_MESSAGES: &str = "message.forwardMessages.v0";
    pub const ADD_REACTION: &str = "reaction.addBridgedReaction.v0";
    pub const REMOVE_REACTION: &str = "reaction.removeBridgedReaction.v0";
    pub const CREATE_ROOM: &str = "room.createRoom.v0";
    pub const UPDATE_ROOM: &str = "room.updateRoom.v0";
    pub const MOVE_ROOM: &str = "room.move.v0";
    pub const UPDATE_SIDEBAR: &str = "space.updateSidebar.v0";
    pub const UPDATE_PROFILE: &str = "user.updateProfile.v0";
}

pub mod extension_key {
    pub const DISCORD_MESSAGE_ORIGIN: &str = "discordMessageOrigin";
    pub const DISCORD_USER_ORIGIN: &str = "discordUserOrigin";
    pub const DISCORD_REACTION_ORIGIN: &str = "discordReactionOrigin";
    pub const DISCORD_CHANNEL_ORIGIN: &str = "discordChannelOrigin";
    pub const AUTHOR_OVERRIDE: &str = "authorOverride";
    pub const TIMESTAMP_OVERRIDE: &str = "timestampOverride";
    pub const ATTACHMENTS: &str = "attachments";
}

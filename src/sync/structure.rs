//! Bidirectional channel/thread/category mirroring and sidebar ordering.
//! Grounded on spec.md §4.7.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::discord::{CreateChannelRequest, DiscordChannel, DiscordGateway};
use crate::fingerprint::{self, SidebarCategory};
use crate::ids::{Snowflake, Ulid};
use crate::repo::BridgeRepository;
use crate::roomy::types::{extension_key, type_id};
use crate::roomy::{DecodedStreamEvent, RoomyEvent};

use super::RoomyEventOutcome;

#[derive(Debug, Clone, Default)]
struct CachedCategory {
    parent_id: Snowflake,
    name: String,
    position: i32,
    children: Vec<String>,
}

/// Backfill summary returned to the Bridge per spec.md §4.7.
#[derive(Debug, Clone, Default)]
pub struct StructureBackfillReport {
    pub synced_count: usize,
    pub text_channels: Vec<Snowflake>,
}

pub struct StructureSync {
    repo: Arc<dyn BridgeRepository>,
    dispatcher: Arc<Dispatcher>,
    discord: Arc<dyn DiscordGateway>,
    guild_id: Snowflake,
    cached_categories: Mutex<Vec<CachedCategory>>,
}

impl StructureSync {
    pub fn new(
        repo: Arc<dyn BridgeRepository>,
        dispatcher: Arc<Dispatcher>,
        discord: Arc<dyn DiscordGateway>,
        guild_id: Snowflake,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            discord,
            guild_id,
            cached_categories: Mutex::new(Vec::new()),
        }
    }

    pub fn clear_cache(&self) {
        self.cached_categories.lock().clear();
    }

    /// Mirrors a Discord channel/thread creation into Roomy, idempotently.
    pub async fn sync_discord_channel_to_roomy(&self, channel: &DiscordChannel) {
        let key = fingerprint::room_key(&channel.id);
        match self.repo.get_roomy_id(&key).await {
            Ok(Some(_)) => return,
            Err(err) => warn!(error = %err, %key, "failed to check room mapping"),
            _ => {}
        }

        let mut parent_room = None;
        if let Some(parent_id) = &channel.parent_id {
            let parent_key = fingerprint::room_key(parent_id);
            parent_room = self.repo.get_roomy_id(&parent_key).await.ok().flatten();
        }

        let event = RoomyEvent::new(
            type_id::CREATE_ROOM,
            json!({
                "kind": if channel.is_thread { "thread" } else { "channel" },
                "name": channel.name,
                "parent": parent_room.as_ref().map(|id| id.to_string()),
            }),
        )
        .with_extensions(json!({
            extension_key::DISCORD_CHANNEL_ORIGIN: {
                "snowflake": channel.id,
                "guildId": self.guild_id,
            }
        }));
        let room_id = event.id.clone();
        self.dispatcher.push_to_roomy(event);
        crate::metrics::record_sync_outcome("structure", "to_roomy", "ok");

        if let Err(err) = self.repo.register_mapping(&key, &room_id).await {
            warn!(error = %err, %key, "failed to register room mapping");
        }

        if channel.is_thread {
            if let Some(parent_room) = parent_room {
                self.emit_room_link(&parent_room, &room_id).await;
            }
        }

        self.update_cache_for_channel(channel).await;
        self.recompute_and_emit_sidebar().await;
    }

    /// Keeps `cached_categories` current for a single channel, the way a
    /// live `channelCreate` arrives one at a time rather than as a full
    /// listing. No-op for channels with no parent (top-level channels don't
    /// belong to a sidebar category).
    async fn update_cache_for_channel(&self, channel: &DiscordChannel) {
        let Some(parent_id) = &channel.parent_id else {
            return;
        };

        {
            let mut categories = self.cached_categories.lock();
            if let Some(existing) = categories.iter_mut().find(|c| &c.parent_id == parent_id) {
                if !existing.children.contains(&channel.name) {
                    existing.children.push(channel.name.clone());
                }
                return;
            }
        }

        let parent = match self.discord.get_channel(parent_id).await {
            Ok(parent) => parent,
            Err(err) => {
                warn!(error = %err, %parent_id, "failed to resolve parent channel for sidebar cache");
                return;
            }
        };

        let mut categories = self.cached_categories.lock();
        categories.push(CachedCategory {
            parent_id: parent_id.clone(),
            name: parent.name,
            position: parent.position,
            children: vec![channel.name.clone()],
        });
        categories.sort_by_key(|c| c.position);
    }

    async fn emit_room_link(&self, parent: &Ulid, child: &Ulid) {
        let link_key = format!("{parent}:{child}");
        if self.repo.get_room_link(&link_key).await.ok().flatten().is_some() {
            return;
        }

        let event = RoomyEvent::new(
            type_id::MOVE_ROOM,
            json!({ "parent": parent.to_string(), "child": child.to_string() }),
        );
        let link_id = event.id.clone();
        self.dispatcher.push_to_roomy(event);

        if let Err(err) = self.repo.set_room_link(&link_key, &link_id).await {
            warn!(error = %err, link_key, "failed to persist room link");
        }
    }

    async fn recompute_and_emit_sidebar(&self) {
        let categories = self.cached_categories.lock().clone();
        let borrowed: Vec<SidebarCategory> = categories
            .iter()
            .map(|c| SidebarCategory { name: &c.name, children: &c.children })
            .collect();
        let hash = fingerprint::sidebar_hash(&borrowed);

        match self.repo.get_sidebar_hash().await {
            Ok(Some(stored)) if stored == hash => return,
            Err(err) => warn!(error = %err, "failed to read cached sidebar hash"),
            _ => {}
        }

        let payload = json!({
            "categories": categories.iter().map(|c| json!({ "name": c.name, "children": c.children })).collect::<Vec<_>>(),
        });
        self.dispatcher.push_to_roomy(RoomyEvent::new(type_id::UPDATE_SIDEBAR, payload));

        if let Err(err) = self.repo.set_sidebar_hash(&hash).await {
            warn!(error = %err, "failed to persist sidebar hash");
        }
    }

    /// Classification pass for `Bridge::handle_roomy_events`.
    pub async fn handle_roomy_event(&self, decoded: &DecodedStreamEvent) -> RoomyEventOutcome {
        let is_structural = matches!(
            decoded.event.kind.as_str(),
            t if t == type_id::CREATE_ROOM || t == type_id::UPDATE_ROOM || t == type_id::UPDATE_SIDEBAR
        );
        if !is_structural {
            return RoomyEventOutcome::NotMine;
        }

        if let Some(origin) = decoded.event.extension(extension_key::DISCORD_CHANNEL_ORIGIN) {
            if let Some(snowflake) = origin.get("snowflake").and_then(|v| v.as_str()) {
                let key = fingerprint::room_key(snowflake);
                if self.repo.get_roomy_id(&key).await.ok().flatten().is_none() {
                    if let Err(err) = self.repo.register_mapping(&key, &decoded.event.id).await {
                        debug!(error = %err, %key, "room mapping already present");
                    }
                }
            }
            return RoomyEventOutcome::Absorbed;
        }

        RoomyEventOutcome::Forward
    }

    /// Executed during Phase 3 for genuinely Roomy-originated structure
    /// changes: create/rename Discord channels, reconcile ordering.
    pub async fn sync_to_discord(&self, decoded: &DecodedStreamEvent) {
        if decoded.event.extension(extension_key::DISCORD_CHANNEL_ORIGIN).is_some() {
            return;
        }

        match decoded.event.kind.as_str() {
            t if t == type_id::CREATE_ROOM || t == type_id::UPDATE_ROOM => {
                let Some(name) = decoded.event.payload.get("name").and_then(|v| v.as_str()) else {
                    return;
                };
                let parent_id = decoded
                    .event
                    .payload
                    .get("parent")
                    .and_then(|v| v.as_str())
                    .and_then(|roomy| roomy.parse::<Ulid>().ok());
                let parent_channel = match parent_id {
                    Some(parent) => self.repo.get_discord_id(&parent).await.ok().flatten(),
                    None => None,
                };

                let req = CreateChannelRequest {
                    name: name.to_string(),
                    parent_id: parent_channel,
                    is_thread: false,
                    starter_message_id: None,
                };
                match self.discord.create_channel(&self.guild_id, req).await {
                    Ok(channel) => {
                        let key = fingerprint::room_key(&channel.id);
                        if let Err(err) = self.repo.register_mapping(&key, &decoded.event.id).await {
                            debug!(error = %err, %key, "channel already mapped, accepting existing mapping");
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to create discord channel for roomy room"),
                }
            }
            t if t == type_id::UPDATE_SIDEBAR => {
                let Some(categories) = decoded.event.payload.get("categories").and_then(|v| v.as_array()) else {
                    return;
                };
                let mut ordered = Vec::new();
                for (index, category) in categories.iter().enumerate() {
                    let Some(children) = category.get("children").and_then(|v| v.as_array()) else {
                        continue;
                    };
                    for child in children {
                        let Some(roomy_id) = child.as_str().and_then(|s| s.parse::<Ulid>().ok()) else {
                            continue;
                        };
                        if let Some(discord_id) = self.repo.get_discord_id(&roomy_id).await.ok().flatten() {
                            ordered.push((discord_id, index as i32));
                        }
                    }
                }
                if !ordered.is_empty() {
                    if let Err(err) = self.discord.reposition_channels(&self.guild_id, &ordered).await {
                        warn!(error = %err, "failed to reconcile discord channel ordering");
                    }
                }
            }
            _ => {}
        }
    }

    /// Phase-2 backfill: enumerate Discord structure, returning the text
    /// channels for message/reaction backfill to use. Rebuilds
    /// `cached_categories` from the full listing up front so the sidebar
    /// emitted by `sync_discord_channel_to_roomy`'s per-channel
    /// `recompute_and_emit_sidebar` call already reflects Discord's real
    /// category structure instead of the permanently-empty cache.
    pub async fn backfill(&self, channels: &[DiscordChannel]) -> StructureBackfillReport {
        let mut text_channels = Vec::new();
        let channels_by_id: HashMap<&str, &DiscordChannel> =
            channels.iter().map(|c| (c.id.as_str(), c)).collect();
        let mut by_parent: HashMap<Snowflake, Vec<&DiscordChannel>> = HashMap::new();

        for channel in channels {
            if !channel.is_thread {
                text_channels.push(channel.id.clone());
            }
            if let Some(parent_id) = &channel.parent_id {
                by_parent.entry(parent_id.clone()).or_default().push(channel);
            }
        }

        let mut categories: Vec<CachedCategory> = by_parent
            .into_iter()
            .filter_map(|(parent_id, mut children)| {
                let parent = channels_by_id.get(parent_id.as_str())?;
                children.sort_by_key(|c| c.position);
                Some(CachedCategory {
                    parent_id,
                    name: parent.name.clone(),
                    position: parent.position,
                    children: children.into_iter().map(|c| c.name.clone()).collect(),
                })
            })
            .collect();
        categories.sort_by_key(|c| c.position);
        *self.cached_categories.lock() = categories;

        for channel in channels {
            self.sync_discord_channel_to_roomy(channel).await;
        }

        StructureBackfillReport {
            synced_count: channels.len(),
            text_channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::fake::FakeDiscordGateway;
    use crate::ids::{GuildSpaceKey, StreamDid};
    use crate::repo::sled_store::SledRepoHandle;

    async fn test_service() -> (tempfile::TempDir, StructureSync) {
        let dir = tempfile::tempdir().unwrap();
        let handle = SledRepoHandle::open(dir.path().to_str().unwrap()).unwrap();
        let key = GuildSpaceKey::new("111", StreamDid::parse("did:plc:space").unwrap());
        let repo: Arc<dyn BridgeRepository> = Arc::new(handle.repository_for(&key, 50).unwrap());
        let (dispatcher, _consumers) = Dispatcher::new();
        let discord: Arc<dyn DiscordGateway> = Arc::new(FakeDiscordGateway::new());
        (dir, StructureSync::new(repo, dispatcher, discord, "111".to_string()))
    }

    fn channel(id: &str, parent: Option<&str>, is_thread: bool) -> DiscordChannel {
        DiscordChannel {
            id: id.to_string(),
            guild_id: Some("111".to_string()),
            parent_id: parent.map(str::to_string),
            name: format!("channel-{id}"),
            is_thread,
            position: 0,
        }
    }

    #[tokio::test]
    async fn sync_discord_channel_to_roomy_is_idempotent() {
        let (_dir, service) = test_service().await;
        let chan = channel("10", None, false);

        service.sync_discord_channel_to_roomy(&chan).await;
        let key = fingerprint::room_key("10");
        let first_id = service.repo.get_roomy_id(&key).await.unwrap();

        service.sync_discord_channel_to_roomy(&chan).await;
        let second_id = service.repo.get_roomy_id(&key).await.unwrap();

        assert_eq!(first_id, second_id);
        assert!(first_id.is_some());
    }

    #[tokio::test]
    async fn handle_roomy_event_absorbs_channel_origin_echo() {
        let (_dir, service) = test_service().await;
        let event = RoomyEvent::new(type_id::CREATE_ROOM, json!({}))
            .with_extensions(json!({ extension_key::DISCORD_CHANNEL_ORIGIN: { "snowflake": "10", "guildId": "111" } }));
        let decoded = DecodedStreamEvent { idx: 1, event, user: None };

        assert_eq!(service.handle_roomy_event(&decoded).await, RoomyEventOutcome::Absorbed);
        let key = fingerprint::room_key("10");
        assert!(service.repo.get_roomy_id(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn handle_roomy_event_forwards_genuine_create_room() {
        let (_dir, service) = test_service().await;
        let event = RoomyEvent::new(type_id::CREATE_ROOM, json!({ "name": "general" }));
        let decoded = DecodedStreamEvent { idx: 2, event, user: None };

        assert_eq!(service.handle_roomy_event(&decoded).await, RoomyEventOutcome::Forward);
    }

    #[tokio::test]
    async fn backfill_returns_only_text_channels() {
        let (_dir, service) = test_service().await;
        let channels = vec![channel("1", None, false), channel("2", Some("1"), true)];

        let report = service.backfill(&channels).await;
        assert_eq!(report.synced_count, 2);
        assert_eq!(report.text_channels, vec!["1".to_string()]);
    }
}

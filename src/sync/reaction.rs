//! Bidirectional reaction mirroring, keyed by `"<messageId>:<userId>:<emoji>"`.
//! Grounded on spec.md §4.8.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::dispatcher::Dispatcher;
use crate::discord::{DiscordGateway, DiscordReaction};
use crate::ids::Ulid;
use crate::repo::BridgeRepository;
use crate::roomy::types::{extension_key, type_id};
use crate::roomy::{DecodedStreamEvent, RoomyEvent};

use super::RoomyEventOutcome;

pub struct ReactionSync {
    repo: Arc<dyn BridgeRepository>,
    dispatcher: Arc<Dispatcher>,
    discord: Arc<dyn DiscordGateway>,
}

impl ReactionSync {
    pub fn new(repo: Arc<dyn BridgeRepository>, dispatcher: Arc<Dispatcher>, discord: Arc<dyn DiscordGateway>) -> Self {
        Self { repo, dispatcher, discord }
    }

    fn reaction_key(message_id: &str, user_id: &str, emoji: &str) -> String {
        format!("{message_id}:{user_id}:{emoji}")
    }

    pub async fn sync_add_to_roomy(&self, reaction: &DiscordReaction, roomy_message_id: &Ulid) {
        let key = Self::reaction_key(&reaction.message_id, &reaction.user_id, &reaction.emoji);

        match self.repo.get_reaction_event(&key).await {
            Ok(Some(_)) => return,
            Err(err) => {
                warn!(error = %err, key, "failed to check reaction mapping, proceeding best-effort");
            }
            _ => {}
        }

        let event = RoomyEvent::new(
            type_id::ADD_REACTION,
            json!({ "target": roomy_message_id.to_string(), "reaction": reaction.emoji }),
        )
        .with_extensions(json!({
            extension_key::DISCORD_REACTION_ORIGIN: {
                "messageId": reaction.message_id,
                "userId": reaction.user_id,
                "emoji": reaction.emoji,
            }
        }));
        let event_id = event.id.clone();
        self.dispatcher.push_to_roomy(event);

        if let Err(err) = self.repo.set_reaction_event(&key, &event_id).await {
            warn!(error = %err, key, "failed to persist reaction mapping");
        }
    }

    pub async fn sync_remove_to_roomy(&self, reaction: &DiscordReaction, roomy_message_id: &Ulid) {
        let key = Self::reaction_key(&reaction.message_id, &reaction.user_id, &reaction.emoji);

        let previous = match self.repo.get_reaction_event(&key).await {
            Ok(Some(id)) => id,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, key, "failed to look up reaction mapping");
                return;
            }
        };

        let event = RoomyEvent::new(
            type_id::REMOVE_REACTION,
            json!({ "target": roomy_message_id.to_string(), "previous": previous.to_string() }),
        )
        .with_extensions(json!({
            extension_key::DISCORD_REACTION_ORIGIN: {
                "messageId": reaction.message_id,
                "userId": reaction.user_id,
                "emoji": reaction.emoji,
            }
        }));
        self.dispatcher.push_to_roomy(event);

        if let Err(err) = self.repo.delete_reaction_event(&key).await {
            warn!(error = %err, key, "failed to delete reaction mapping");
        }
    }

    /// Classification pass used by `Bridge::handle_roomy_events`: absorbs our
    /// own echoes, otherwise marks genuine inbound reactions for Phase-3
    /// forwarding.
    pub async fn handle_roomy_event(&self, decoded: &DecodedStreamEvent) -> RoomyEventOutcome {
        let is_add = decoded.event.kind == type_id::ADD_REACTION;
        let is_remove = decoded.event.kind == type_id::REMOVE_REACTION;
        if !is_add && !is_remove {
            return RoomyEventOutcome::NotMine;
        }

        if decoded.event.extension(extension_key::DISCORD_REACTION_ORIGIN).is_some() {
            return RoomyEventOutcome::Absorbed;
        }

        RoomyEventOutcome::Forward
    }

    /// Executed during Phase 3 for genuinely Roomy-originated reactions.
    pub async fn sync_to_discord(&self, decoded: &DecodedStreamEvent) {
        if decoded.event.extension(extension_key::DISCORD_REACTION_ORIGIN).is_some() {
            return;
        }

        let Some(roomy_message_id) = decoded.event.payload.get("target").and_then(|v| v.as_str()) else {
            return;
        };
        let Ok(roomy_message_id) = roomy_message_id.parse::<Ulid>() else {
            warn!(roomy_message_id, "reaction target is not a valid ulid, dropping");
            return;
        };
        let Ok(Some(discord_message_id)) = self.repo.get_discord_id(&roomy_message_id).await else {
            warn!(%roomy_message_id, "no discord mapping for reaction target, dropping");
            return;
        };

        match decoded.event.kind.as_str() {
            t if t == type_id::ADD_REACTION => {
                let Some(emoji) = decoded.event.payload.get("reaction").and_then(|v| v.as_str()) else {
                    return;
                };
                let channel_id = decoded
                    .event
                    .payload
                    .get("channelId")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                match self.discord.add_reaction(&channel_id, &discord_message_id, emoji).await {
                    Ok(()) => crate::metrics::record_sync_outcome("reaction", "to_discord", "ok"),
                    Err(err) => {
                        crate::metrics::record_sync_outcome("reaction", "to_discord", "error");
                        warn!(error = %err, "failed to mirror reaction add to discord");
                    }
                }
            }
            t if t == type_id::REMOVE_REACTION => {
                let Some(emoji) = decoded.event.payload.get("reaction").and_then(|v| v.as_str()) else {
                    return;
                };
                let channel_id = decoded
                    .event
                    .payload
                    .get("channelId")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let Some(bot_user_id) = self.discord.application_id() else {
                    warn!("application id unknown, cannot mirror reaction removal to discord");
                    return;
                };
                match self
                    .discord
                    .remove_reaction(&channel_id, &discord_message_id, &bot_user_id, emoji)
                    .await
                {
                    Ok(()) => crate::metrics::record_sync_outcome("reaction", "to_discord", "ok"),
                    Err(err) => {
                        crate::metrics::record_sync_outcome("reaction", "to_discord", "error");
                        warn!(error = %err, "failed to mirror reaction removal to discord");
                    }
                }
            }
            _ => {}
        }
    }

    /// Phase-2 backfill counterpart to `MessageSync::backfill`/`StructureSync::backfill`.
    /// `DiscordGateway` has no "list reactions on a message" REST operation, so
    /// there is nothing to replay here yet; reactions left on historical
    /// messages before the bridge connected stay unmirrored until touched
    /// live. Kept as an explicit no-op (mirrors the `REMOVE_REACTION` gap
    /// above) rather than silently absent from `Bridge::connect`.
    pub async fn backfill(&self, _text_channel_ids: &[crate::ids::Snowflake]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::fake::FakeDiscordGateway;
    use crate::ids::{GuildSpaceKey, StreamDid};
    use crate::repo::sled_store::SledRepoHandle;

    async fn test_service() -> (tempfile::TempDir, ReactionSync) {
        let dir = tempfile::tempdir().unwrap();
        let handle = SledRepoHandle::open(dir.path().to_str().unwrap()).unwrap();
        let key = GuildSpaceKey::new("111", StreamDid::parse("did:plc:space").unwrap());
        let repo: Arc<dyn BridgeRepository> = Arc::new(handle.repository_for(&key, 50).unwrap());
        let (dispatcher, _consumers) = Dispatcher::new();
        let discord: Arc<dyn DiscordGateway> = Arc::new(FakeDiscordGateway::new());
        (dir, ReactionSync::new(repo, dispatcher, discord))
    }

    fn reaction() -> DiscordReaction {
        DiscordReaction {
            message_id: "1".to_string(),
            channel_id: "2".to_string(),
            guild_id: Some("111".to_string()),
            user_id: "3".to_string(),
            emoji: "👍".to_string(),
        }
    }

    #[tokio::test]
    async fn add_then_remove_clears_the_mapping() {
        let (_dir, service) = test_service().await;
        let reaction = reaction();
        let roomy_id = Ulid::new();

        service.sync_add_to_roomy(&reaction, &roomy_id).await;
        let key = ReactionSync::reaction_key(&reaction.message_id, &reaction.user_id, &reaction.emoji);
        assert!(service.repo.get_reaction_event(&key).await.unwrap().is_some());

        service.sync_remove_to_roomy(&reaction, &roomy_id).await;
        assert!(service.repo.get_reaction_event(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_without_prior_add_is_a_no_op() {
        let (_dir, service) = test_service().await;
        let reaction = reaction();
        service.sync_remove_to_roomy(&reaction, &Ulid::new()).await;
    }

    #[tokio::test]
    async fn handle_roomy_event_absorbs_echoes_and_forwards_genuine() {
        let (_dir, service) = test_service().await;

        let echo = RoomyEvent::new(type_id::ADD_REACTION, json!({}))
            .with_extensions(json!({ extension_key::DISCORD_REACTION_ORIGIN: {} }));
        let decoded_echo = DecodedStreamEvent { idx: 1, event: echo, user: None };
        assert_eq!(service.handle_roomy_event(&decoded_echo).await, RoomyEventOutcome::Absorbed);

        let genuine = RoomyEvent::new(type_id::ADD_REACTION, json!({}));
        let decoded_genuine = DecodedStreamEvent { idx: 2, event: genuine, user: None };
        assert_eq!(service.handle_roomy_event(&decoded_genuine).await, RoomyEventOutcome::Forward);
    }
}

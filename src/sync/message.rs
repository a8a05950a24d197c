//! Bidirectional message create/edit/delete, the most complex of the four
//! services. Grounded on spec.md §4.9, with webhook lifecycle and attachment
//! classification adapted from the teacher's `DiscordClient::get_or_create_webhook`
//! / `send_via_webhook` and `media.rs`.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::discord::types::{
    MESSAGE_TYPE_CHANNEL_NAME_CHANGE, MESSAGE_TYPE_THREAD_CREATED, MESSAGE_TYPE_THREAD_STARTER_MESSAGE,
};
use crate::discord::{DiscordGateway, DiscordMessage, ExecuteWebhookRequest};
use crate::fingerprint;
use crate::ids::{discord_user_did, Snowflake, Ulid};
use crate::media;
use crate::repo::{BridgeRepository, EditInfo, WebhookToken};
use crate::roomy::types::{extension_key, type_id};
use crate::roomy::{DecodedStreamEvent, RoomyEvent};

use super::profile::ProfileSync;
use super::RoomyEventOutcome;

pub struct MessageSync {
    repo: Arc<dyn BridgeRepository>,
    dispatcher: Arc<Dispatcher>,
    discord: Arc<dyn DiscordGateway>,
    profile: Arc<ProfileSync>,
    guild_id: Snowflake,
}

impl MessageSync {
    pub fn new(
        repo: Arc<dyn BridgeRepository>,
        dispatcher: Arc<Dispatcher>,
        discord: Arc<dyn DiscordGateway>,
        profile: Arc<ProfileSync>,
        guild_id: Snowflake,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            discord,
            profile,
            guild_id,
        }
    }

    /// True when `msg` was posted by the webhook this bridge itself owns for
    /// its channel — our own echo coming back through the gateway.
    async fn is_own_webhook_echo(&self, msg: &DiscordMessage) -> bool {
        let Some(webhook_id) = &msg.webhook_id else { return false };
        match self.repo.get_webhook_token(&msg.channel_id).await {
            Ok(Some(token)) => &token.webhook_id == webhook_id,
            _ => false,
        }
    }

    pub async fn sync_discord_to_roomy(&self, msg: &DiscordMessage) -> Option<Ulid> {
        if let Ok(Some(existing)) = self.repo.get_roomy_id(&msg.id).await {
            return Some(existing);
        }

        let author = crate::discord::DiscordUser {
            id: msg.author_id.clone(),
            username: msg.author_username.clone(),
            global_name: msg.author_global_name.clone(),
            avatar: msg.author_avatar.clone(),
        };
        self.profile.sync_discord_to_roomy(&author).await;

        if self.is_own_webhook_echo(msg).await {
            debug!(message_id = %msg.id, "skipping own webhook echo");
            return None;
        }
        if msg.kind == MESSAGE_TYPE_THREAD_CREATED || msg.kind == MESSAGE_TYPE_CHANNEL_NAME_CHANGE {
            return None;
        }

        if msg.kind == MESSAGE_TYPE_THREAD_STARTER_MESSAGE {
            return Box::pin(self.forward_thread_starter(msg)).await;
        }

        let Some(room_id) = self.repo.get_roomy_id(&crate::fingerprint::room_key(&msg.channel_id)).await.ok().flatten()
        else {
            warn!(channel_id = %msg.channel_id, "no room mapping for channel, dropping message");
            return None;
        };

        let mut attachments_ext = media::build_attachments_extension(&msg.attachments);

        let mut reply_attachment = None;
        if let Some(reply_to) = &msg.reply_to {
            match self.repo.get_roomy_id(reply_to).await {
                Ok(Some(roomy_reply)) => reply_attachment = Some(roomy_reply.to_string()),
                Ok(None) => warn!(reply_to, "reply target not yet synced, dropping reply link"),
                Err(err) => warn!(error = %err, "failed to resolve reply target"),
            }
        }
        if let Some(reply) = &reply_attachment {
            let merged = attachments_ext.get_or_insert_with(|| json!({}));
            merged["replyTo"] = json!(reply);
        }

        let event = RoomyEvent::new(
            type_id::CREATE_MESSAGE,
            json!({ "body": { "mimeType": "text/markdown", "data": msg.content } }),
        )
        .in_room(room_id)
        .with_extensions(json!({
            extension_key::DISCORD_MESSAGE_ORIGIN: {
                "snowflake": msg.id,
                "channelId": msg.channel_id,
                "guildId": self.guild_id,
            },
            extension_key::AUTHOR_OVERRIDE: { "did": discord_user_did(&msg.author_id) },
            extension_key::TIMESTAMP_OVERRIDE: { "timestamp": msg.timestamp },
            extension_key::ATTACHMENTS: attachments_ext,
        }));

        let roomy_id = event.id.clone();
        self.dispatcher.push_to_roomy(event);
        crate::metrics::record_sync_outcome("message", "to_roomy", "ok");

        match self.repo.register_mapping(&msg.id, &roomy_id).await {
            Ok(()) => Some(roomy_id),
            Err(crate::repo::RepositoryError::AlreadyRegistered) => {
                debug!(message_id = %msg.id, "concurrent registration, using existing mapping");
                self.repo.get_roomy_id(&msg.id).await.ok().flatten()
            }
            Err(err) => {
                warn!(error = %err, message_id = %msg.id, "failed to register message mapping");
                Some(roomy_id)
            }
        }
    }

    async fn forward_thread_starter(&self, msg: &DiscordMessage) -> Option<Ulid> {
        let Some(original_id) = &msg.reply_to else {
            warn!(message_id = %msg.id, "thread starter message has no referenced original");
            return None;
        };

        let original_roomy_id = match self.repo.get_roomy_id(original_id).await {
            Ok(Some(id)) => id,
            _ => {
                let fetched = self.discord.get_message(&msg.channel_id, original_id).await.ok()?;
                self.sync_discord_to_roomy(&fetched).await?
            }
        };

        let Some(thread_room) = self.repo.get_roomy_id(&fingerprint::room_key(&msg.channel_id)).await.ok().flatten()
        else {
            warn!(channel_id = %msg.channel_id, "no room mapping for thread, dropping forward");
            return None;
        };

        let event = RoomyEvent::new(
            type_id::FORWARD_MESSAGES,
            json!({ "messageIds": [original_roomy_id.to_string()], "fromRoomId": thread_room.to_string() }),
        )
        .in_room(thread_room);
        let forward_id = event.id.clone();
        self.dispatcher.push_to_roomy(event);

        if let Err(err) = self.repo.register_mapping(&msg.id, &forward_id).await {
            debug!(error = %err, message_id = %msg.id, "thread-starter mapping already present");
        }
        Some(forward_id)
    }

    pub async fn sync_edit_to_roomy(&self, msg: &DiscordMessage) {
        let Some(edited_timestamp) = msg.edited_timestamp else { return };
        let content_hash = fingerprint::message_content_hash(&msg.content);

        if let Ok(Some(stored)) = self.repo.get_edit_info(&msg.id).await {
            if edited_timestamp <= stored.edited_timestamp || content_hash == stored.content_hash {
                debug!(message_id = %msg.id, "dropping stale or duplicate edit");
                return;
            }
        }

        let Some(room_id) = self.repo.get_roomy_id(&msg.id).await.ok().flatten() else {
            warn!(message_id = %msg.id, "edit for unmapped message, dropping");
            return;
        };

        self.dispatcher.push_to_roomy(
            RoomyEvent::new(
                type_id::EDIT_MESSAGE,
                json!({ "messageId": room_id.to_string(), "body": { "mimeType": "text/markdown", "data": msg.content } }),
            )
            .in_room(room_id),
        );

        if let Err(err) = self
            .repo
            .set_edit_info(&msg.id, EditInfo { edited_timestamp, content_hash })
            .await
        {
            warn!(error = %err, message_id = %msg.id, "failed to persist edit info");
        }
    }

    pub async fn sync_delete_to_roomy(&self, message_id: &Snowflake) {
        let Some(room_id) = self.repo.get_roomy_id(message_id).await.ok().flatten() else {
            return;
        };
        self.dispatcher.push_to_roomy(
            RoomyEvent::new(type_id::DELETE_MESSAGE, json!({ "messageId": message_id })).in_room(room_id),
        );
    }

    pub async fn handle_roomy_event(&self, decoded: &DecodedStreamEvent) -> RoomyEventOutcome {
        let is_message_event = matches!(
            decoded.event.kind.as_str(),
            t if t == type_id::CREATE_MESSAGE || t == type_id::EDIT_MESSAGE || t == type_id::DELETE_MESSAGE
        );
        if !is_message_event {
            return RoomyEventOutcome::NotMine;
        }

        if decoded.event.extension(extension_key::DISCORD_MESSAGE_ORIGIN).is_some() {
            return RoomyEventOutcome::Absorbed;
        }

        RoomyEventOutcome::Forward
    }

    pub async fn sync_to_discord(&self, decoded: &DecodedStreamEvent) {
        if decoded.event.extension(extension_key::DISCORD_MESSAGE_ORIGIN).is_some() {
            return;
        }

        match decoded.event.kind.as_str() {
            t if t == type_id::CREATE_MESSAGE => self.create_to_discord(decoded).await,
            t if t == type_id::EDIT_MESSAGE => self.edit_to_discord(decoded).await,
            t if t == type_id::DELETE_MESSAGE => self.delete_to_discord(decoded).await,
            _ => {}
        }
    }

    async fn create_to_discord(&self, decoded: &DecodedStreamEvent) {
        let Some(room) = &decoded.event.room else {
            warn!("createMessage without a room, dropping");
            return;
        };
        let Some(channel_id) = self.repo.get_discord_id(room).await.ok().flatten() else {
            warn!(%room, "no discord channel mapped for room, dropping");
            return;
        };

        let (webhook_id, webhook_token) = match self.acquire_webhook(&channel_id).await {
            Some(pair) => pair,
            None => return,
        };

        let profile = self
            .repo
            .get_roomy_user_profile(decoded.user.as_deref().unwrap_or_default())
            .await
            .ok()
            .flatten();
        let display_name = profile.as_ref().map(|p| p.name.clone()).unwrap_or_else(|| "Unknown".to_string());
        let avatar_url = profile.and_then(|p| p.avatar);

        let content = decoded
            .event
            .payload
            .get("body")
            .and_then(|b| b.get("data"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let content_hash = fingerprint::message_content_hash(content);
        let nonce = decoded.event.id.to_string();
        let dedup_key = format!("{nonce}:{content_hash}");

        if self.repo.get_message_hash_owner(&dedup_key).await.ok().flatten().is_some() {
            debug!(dedup_key, "duplicate roomy-originated message, skipping");
            return;
        }

        let req = ExecuteWebhookRequest {
            username: Some(display_name),
            avatar_url,
            content: content.to_string(),
            nonce: Some(nonce.clone()),
        };

        match self.discord.execute_webhook(&webhook_id, &webhook_token, req).await {
            Ok(discord_message_id) => {
                crate::metrics::record_sync_outcome("message", "to_discord", "ok");
                if let Err(err) = self.repo.register_mapping(&discord_message_id, &decoded.event.id).await {
                    debug!(error = %err, "roomy message already mapped");
                }
                if let Err(err) = self.repo.set_message_hash_owner(&dedup_key, &discord_message_id).await {
                    warn!(error = %err, "failed to persist message-hash dedup record");
                }
            }
            Err(err) => {
                crate::metrics::record_sync_outcome("message", "to_discord", "error");
                warn!(error = %err, "failed to execute webhook for roomy-originated message");
            }
        }
    }

    async fn acquire_webhook(&self, channel_id: &Snowflake) -> Option<(String, String)> {
        if let Ok(Some(token)) = self.repo.get_webhook_token(channel_id).await {
            return Some((token.webhook_id, token.token));
        }

        match self.discord.get_or_create_webhook(channel_id).await {
            Ok((webhook_id, token)) => {
                let record = WebhookToken { webhook_id: webhook_id.clone(), token: token.clone() };
                if let Err(err) = self.repo.set_webhook_token(channel_id, record).await {
                    warn!(error = %err, %channel_id, "failed to persist webhook token");
                }
                Some((webhook_id, token))
            }
            Err(err) => {
                warn!(error = %err, %channel_id, "failed to acquire webhook");
                None
            }
        }
    }

    async fn edit_to_discord(&self, decoded: &DecodedStreamEvent) {
        let Some(roomy_message_id) = decoded.event.payload.get("messageId").and_then(|v| v.as_str()) else {
            return;
        };
        let Ok(roomy_message_id) = roomy_message_id.parse::<Ulid>() else { return };
        let Some(discord_message_id) = self.repo.get_discord_id(&roomy_message_id).await.ok().flatten() else {
            warn!(%roomy_message_id, "no discord mapping for edit target, dropping");
            return;
        };
        let Some(room) = &decoded.event.room else { return };
        let Some(channel_id) = self.repo.get_discord_id(room).await.ok().flatten() else { return };
        let content = decoded
            .event
            .payload
            .get("body")
            .and_then(|b| b.get("data"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        if let Err(err) = self.discord.edit_message(&channel_id, &discord_message_id, content).await {
            warn!(error = %err, "failed to mirror edit to discord");
        }
    }

    async fn delete_to_discord(&self, decoded: &DecodedStreamEvent) {
        let Some(roomy_message_id) = decoded.event.payload.get("messageId").and_then(|v| v.as_str()) else {
            return;
        };
        let Ok(roomy_message_id) = roomy_message_id.parse::<Ulid>() else { return };
        let Some(discord_message_id) = self.repo.get_discord_id(&roomy_message_id).await.ok().flatten() else {
            return;
        };
        let Some(room) = &decoded.event.room else { return };
        let Some(channel_id) = self.repo.get_discord_id(room).await.ok().flatten() else { return };

        if let Err(err) = self.discord.delete_message(&channel_id, &discord_message_id).await {
            warn!(error = %err, "failed to mirror delete to discord");
        }
    }

    /// Phase-2 backfill: fetch newer-than-`latest-message` items per channel
    /// and sync them forward, honoring the per-channel resume boundary.
    pub async fn backfill(&self, text_channel_ids: &[Snowflake]) {
        for channel_id in text_channel_ids {
            let after = self.repo.get_latest_message(channel_id).await.ok().flatten();
            let messages = match self.discord.get_messages_after(channel_id, after.as_ref()).await {
                Ok(messages) => messages,
                Err(err) => {
                    warn!(error = %err, %channel_id, "failed to fetch backfill messages");
                    continue;
                }
            };

            for msg in messages {
                self.sync_discord_to_roomy(&msg).await;
                if let Err(err) = self.repo.set_latest_message(channel_id, &msg.id).await {
                    warn!(error = %err, %channel_id, "failed to advance latest-message cursor");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::fake::FakeDiscordGateway;
    use crate::ids::{GuildSpaceKey, StreamDid};
    use crate::repo::sled_store::SledRepoHandle;

    async fn test_service() -> (tempfile::TempDir, MessageSync) {
        let dir = tempfile::tempdir().unwrap();
        let handle = SledRepoHandle::open(dir.path().to_str().unwrap()).unwrap();
        let key = GuildSpaceKey::new("111", StreamDid::parse("did:plc:space").unwrap());
        let repo: Arc<dyn BridgeRepository> = Arc::new(handle.repository_for(&key, 50).unwrap());
        let (dispatcher, _consumers) = Dispatcher::new();
        let discord: Arc<dyn DiscordGateway> = Arc::new(FakeDiscordGateway::new());
        let profile = Arc::new(ProfileSync::new(repo.clone(), dispatcher.clone(), "111".to_string()));

        let room_key = fingerprint::room_key("50");
        repo.register_mapping(&room_key, &Ulid::new()).await.unwrap();

        (
            dir,
            MessageSync::new(repo, dispatcher, discord, profile, "111".to_string()),
        )
    }

    fn message(id: &str, channel_id: &str, kind: u8) -> DiscordMessage {
        DiscordMessage {
            id: id.to_string(),
            channel_id: channel_id.to_string(),
            guild_id: Some("111".to_string()),
            author_id: "7".to_string(),
            author_username: "bob".to_string(),
            author_global_name: Some("Bob".to_string()),
            author_avatar: None,
            webhook_id: None,
            kind,
            content: "hello".to_string(),
            attachments: Vec::new(),
            reply_to: None,
            timestamp: 1_700_000_000,
            edited_timestamp: None,
        }
    }

    #[tokio::test]
    async fn duplicate_delivery_returns_the_same_roomy_id() {
        let (_dir, service) = test_service().await;
        let msg = message("100", "50", 0);

        let first = service.sync_discord_to_roomy(&msg).await;
        let second = service.sync_discord_to_roomy(&msg).await;

        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn skips_own_webhook_echo() {
        let (_dir, service) = test_service().await;
        service
            .repo
            .set_webhook_token("50", crate::repo::WebhookToken { webhook_id: "999".to_string(), token: "tok".to_string() })
            .await
            .unwrap();

        let mut msg = message("101", "50", 0);
        msg.webhook_id = Some("999".to_string());

        assert!(service.sync_discord_to_roomy(&msg).await.is_none());
    }

    #[tokio::test]
    async fn skips_thread_created_and_channel_name_change_system_messages() {
        let (_dir, service) = test_service().await;
        let thread_created = message("102", "50", MESSAGE_TYPE_THREAD_CREATED);
        let name_change = message("103", "50", MESSAGE_TYPE_CHANNEL_NAME_CHANGE);

        assert!(service.sync_discord_to_roomy(&thread_created).await.is_none());
        assert!(service.sync_discord_to_roomy(&name_change).await.is_none());
    }

    #[tokio::test]
    async fn out_of_order_edits_keep_the_newer_content_hash() {
        let (_dir, service) = test_service().await;
        let msg = message("104", "50", 0);
        service.sync_discord_to_roomy(&msg).await;

        let mut newer = msg.clone();
        newer.content = "v2".to_string();
        newer.edited_timestamp = Some(2_000);
        service.sync_edit_to_roomy(&newer).await;

        let mut older = msg.clone();
        older.content = "v1".to_string();
        older.edited_timestamp = Some(1_000);
        service.sync_edit_to_roomy(&older).await;

        let stored = service.repo.get_edit_info("104").await.unwrap().unwrap();
        assert_eq!(stored.content_hash, fingerprint::message_content_hash("v2"));
    }

    #[tokio::test]
    async fn handle_roomy_event_forwards_create_message_without_origin() {
        let (_dir, service) = test_service().await;
        let event = RoomyEvent::new(type_id::CREATE_MESSAGE, json!({}));
        let decoded = DecodedStreamEvent { idx: 1, event, user: None };

        assert_eq!(service.handle_roomy_event(&decoded).await, RoomyEventOutcome::Forward);
    }
}

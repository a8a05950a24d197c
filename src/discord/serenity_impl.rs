//! Real `serenity`-backed `DiscordGateway`. Grounded directly on the
//! teacher's `DiscordClient`: same login/retry-backoff shape, same
//! get-or-create-webhook flow, same "forward gateway events onto a channel
//! instead of handling them inline in the event handler" structure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serenity::all::{
    ChannelId, ChannelType, Context, CreateChannel, CreateWebhook, EditChannel, EditMessage,
    EditWebhookMessage, EventHandler, ExecuteWebhook, GatewayIntents, GuildId, Http, Message,
    MessageId, Ready, UserId,
};
use serenity::Client;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use crate::ids::Snowflake;

use super::types::{DiscordAttachment, DiscordChannel, DiscordEvent, DiscordMessage, DiscordReaction};
use super::{CreateChannelRequest, DiscordError, DiscordGateway, ExecuteWebhookRequest};

const INITIAL_LOGIN_RETRY_SECONDS: u64 = 2;
const MAX_LOGIN_RETRY_SECONDS: u64 = 300;
const REST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SerenityDiscordGateway {
    http: Arc<Http>,
    application_id: Arc<RwLock<Option<Snowflake>>>,
    events_tx: mpsc::UnboundedSender<DiscordEvent>,
}

impl SerenityDiscordGateway {
    /// Builds the client and spawns its gateway-receive loop in the
    /// background; `events` yields translated `DiscordEvent`s for the
    /// orchestrator to route. Retries login with exponential backoff the way
    /// the teacher's `DiscordClient::start` does, capping at
    /// `MAX_LOGIN_RETRY_SECONDS`.
    pub async fn connect(
        token: &str,
        use_privileged_intents: bool,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<DiscordEvent>), DiscordError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::GUILD_MESSAGE_REACTIONS;
        if use_privileged_intents {
            intents |= GatewayIntents::MESSAGE_CONTENT;
        }

        let application_id = Arc::new(RwLock::new(None));
        let handler = ReadySignalHandler {
            events_tx: events_tx.clone(),
            application_id: application_id.clone(),
        };

        let mut client = Client::builder(token, intents)
            .event_handler(handler)
            .await
            .map_err(|err| DiscordError::Rest(err.to_string()))?;

        let http = client.http.clone();
        let gateway = Arc::new(Self {
            http,
            application_id,
            events_tx,
        });

        tokio::spawn(async move {
            let mut retry_secs = INITIAL_LOGIN_RETRY_SECONDS;
            loop {
                if let Err(err) = client.start().await {
                    error!(error = %err, retry_secs, "discord gateway connection dropped, retrying");
                    tokio::time::sleep(Duration::from_secs(retry_secs)).await;
                    retry_secs = (retry_secs * 2).min(MAX_LOGIN_RETRY_SECONDS);
                } else {
                    break;
                }
            }
        });

        Ok((gateway, events_rx))
    }
}

struct ReadySignalHandler {
    events_tx: mpsc::UnboundedSender<DiscordEvent>,
    application_id: Arc<RwLock<Option<Snowflake>>>,
}

#[async_trait]
impl EventHandler for ReadySignalHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        *self.application_id.write().await = Some(ready.application.id.to_string());
        info!(user = %ready.user.name, "discord gateway ready");
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let event = DiscordEvent::MessageCreate(translate_message(&msg, Some(guild_id.to_string())));
        if self.events_tx.send(event).is_err() {
            warn!("discord event channel closed, dropping message create");
        }
    }

    async fn message_update(
        &self,
        ctx: Context,
        _old: Option<Message>,
        _new: Option<Message>,
        event: serenity::all::MessageUpdateEvent,
    ) {
        let Some(guild_id) = event.guild_id else {
            return;
        };
        if let Ok(msg) = event.channel_id.message(&ctx.http, event.id).await {
            let translated = translate_message(&msg, Some(guild_id.to_string()));
            let _ = self.events_tx.send(DiscordEvent::MessageUpdate(translated));
        }
    }

    async fn message_delete(
        &self,
        _ctx: Context,
        channel_id: ChannelId,
        message_id: MessageId,
        guild_id: Option<GuildId>,
    ) {
        let _ = self.events_tx.send(DiscordEvent::MessageDelete {
            message_id: message_id.to_string(),
            channel_id: channel_id.to_string(),
            guild_id: guild_id.map(|id| id.to_string()),
        });
    }

    async fn reaction_add(&self, _ctx: Context, reaction: serenity::all::Reaction) {
        let Some(user_id) = reaction.user_id else {
            return;
        };
        let _ = self.events_tx.send(DiscordEvent::ReactionAdd(translate_reaction(&reaction, user_id)));
    }

    async fn reaction_remove(&self, _ctx: Context, reaction: serenity::all::Reaction) {
        let Some(user_id) = reaction.user_id else {
            return;
        };
        let _ = self
            .events_tx
            .send(DiscordEvent::ReactionRemove(translate_reaction(&reaction, user_id)));
    }

    async fn channel_create(&self, _ctx: Context, channel: serenity::all::GuildChannel) {
        let _ = self.events_tx.send(DiscordEvent::ChannelCreate(translate_channel(&channel)));
    }

    async fn thread_create(&self, _ctx: Context, thread: serenity::all::GuildChannel) {
        let mut translated = translate_channel(&thread);
        translated.is_thread = true;
        let _ = self.events_tx.send(DiscordEvent::ThreadCreate(translated));
    }
}

fn translate_message(msg: &Message, guild_id: Option<Snowflake>) -> DiscordMessage {
    DiscordMessage {
        id: msg.id.to_string(),
        channel_id: msg.channel_id.to_string(),
        guild_id,
        author_id: msg.author.id.to_string(),
        author_username: msg.author.name.clone(),
        author_global_name: msg.author.global_name.clone(),
        author_avatar: msg.author.avatar.clone(),
        webhook_id: msg.webhook_id.map(|id| id.to_string()),
        kind: msg.kind.num() as u8,
        content: msg.content.clone(),
        attachments: msg
            .attachments
            .iter()
            .map(|a| DiscordAttachment {
                url: a.url.clone(),
                filename: a.filename.clone(),
                content_type: a.content_type.clone(),
                size: a.size as u64,
            })
            .collect(),
        reply_to: msg.message_reference.as_ref().and_then(|r| r.message_id).map(|id| id.to_string()),
        timestamp: msg.timestamp.unix_timestamp(),
        edited_timestamp: msg.edited_timestamp.map(|ts| ts.unix_timestamp()),
    }
}

fn translate_reaction(reaction: &serenity::all::Reaction, user_id: UserId) -> DiscordReaction {
    DiscordReaction {
        message_id: reaction.message_id.to_string(),
        channel_id: reaction.channel_id.to_string(),
        guild_id: reaction.guild_id.map(|id| id.to_string()),
        user_id: user_id.to_string(),
        emoji: reaction.emoji.to_string(),
    }
}

fn translate_channel(channel: &serenity::all::GuildChannel) -> DiscordChannel {
    DiscordChannel {
        id: channel.id.to_string(),
        guild_id: Some(channel.guild_id.to_string()),
        parent_id: channel.parent_id.map(|id| id.to_string()),
        name: channel.name.clone(),
        is_thread: channel.thread_metadata.is_some(),
        position: channel.position as i32,
    }
}

fn parse_channel_id(id: &Snowflake) -> Result<ChannelId, DiscordError> {
    id.parse::<u64>().map(ChannelId::new).map_err(|_| DiscordError::ChannelNotFound(id.clone()))
}

fn parse_message_id(id: &Snowflake) -> Result<MessageId, DiscordError> {
    id.parse::<u64>().map(MessageId::new).map_err(|_| DiscordError::MessageNotFound(id.clone()))
}

#[async_trait]
impl DiscordGateway for SerenityDiscordGateway {
    async fn create_channel(
        &self,
        guild_id: &Snowflake,
        req: CreateChannelRequest,
    ) -> Result<DiscordChannel, DiscordError> {
        let guild_id: GuildId = guild_id.parse::<u64>().map_err(|_| DiscordError::Rest("bad guild id".into()))?.into();

        if req.is_thread {
            let Some(starter) = req.starter_message_id else {
                return Err(DiscordError::Rest("thread creation requires a parent channel".into()));
            };
            let parent = req.parent_id.ok_or_else(|| DiscordError::Rest("thread requires a parent channel".into()))?;
            let parent_channel_id = parse_channel_id(&parent)?;
            let builder = serenity::all::CreateThread::new(&req.name);
            let thread = tokio::time::timeout(
                REST_TIMEOUT,
                parent_channel_id.create_thread_from_message(&self.http, parse_message_id(&starter)?, builder),
            )
            .await
            .map_err(|_| DiscordError::Timeout)?
            .map_err(|err| DiscordError::Rest(err.to_string()))?;
            return Ok(DiscordChannel {
                id: thread.id.to_string(),
                guild_id: Some(guild_id.to_string()),
                parent_id: Some(parent),
                name: thread.name,
                is_thread: true,
                position: 0,
            });
        }

        let mut builder = CreateChannel::new(&req.name).kind(ChannelType::Text);
        if let Some(parent) = &req.parent_id {
            builder = builder.category(parse_channel_id(parent)?);
        }
        let channel = tokio::time::timeout(REST_TIMEOUT, guild_id.create_channel(&self.http, builder))
            .await
            .map_err(|_| DiscordError::Timeout)?
            .map_err(|err| DiscordError::Rest(err.to_string()))?;

        Ok(DiscordChannel {
            id: channel.id.to_string(),
            guild_id: Some(guild_id.to_string()),
            parent_id: channel.parent_id.map(|id| id.to_string()),
            name: channel.name,
            is_thread: false,
            position: channel.position as i32,
        })
    }

    async fn get_channel(&self, channel_id: &Snowflake) -> Result<DiscordChannel, DiscordError> {
        let id = parse_channel_id(channel_id)?;
        let channel = id
            .to_channel(&self.http)
            .await
            .map_err(|err| DiscordError::Rest(err.to_string()))?;
        let guild_channel = channel
            .guild()
            .ok_or_else(|| DiscordError::ChannelNotFound(channel_id.clone()))?;
        Ok(translate_channel(&guild_channel))
    }

    async fn list_guild_channels(&self, guild_id: &Snowflake) -> Result<Vec<DiscordChannel>, DiscordError> {
        let guild_id: GuildId = guild_id.parse::<u64>().map_err(|_| DiscordError::Rest("bad guild id".into()))?.into();
        let channels = tokio::time::timeout(REST_TIMEOUT, guild_id.channels(&self.http))
            .await
            .map_err(|_| DiscordError::Timeout)?
            .map_err(|err| DiscordError::Rest(err.to_string()))?;
        Ok(channels
            .into_values()
            .map(|channel| DiscordChannel {
                id: channel.id.to_string(),
                guild_id: Some(channel.guild_id.to_string()),
                parent_id: channel.parent_id.map(|id| id.to_string()),
                name: channel.name,
                is_thread: channel.thread_metadata.is_some(),
                position: channel.position as i32,
            })
            .collect())
    }

    async fn rename_channel(&self, channel_id: &Snowflake, name: &str) -> Result<(), DiscordError> {
        let id = parse_channel_id(channel_id)?;
        let builder = EditChannel::new().name(name);
        id.edit(&self.http, builder).await.map_err(|err| DiscordError::Rest(err.to_string()))?;
        Ok(())
    }

    async fn reposition_channels(
        &self,
        guild_id: &Snowflake,
        ordered: &[(Snowflake, i32)],
    ) -> Result<(), DiscordError> {
        let guild_id: GuildId = guild_id.parse::<u64>().map_err(|_| DiscordError::Rest("bad guild id".into()))?.into();
        let positions: Vec<_> = ordered
            .iter()
            .filter_map(|(id, pos)| parse_channel_id(id).ok().map(|id| (id, *pos)))
            .collect();
        guild_id
            .reorder_channels(&self.http, positions)
            .await
            .map_err(|err| DiscordError::Rest(err.to_string()))?;
        Ok(())
    }

    async fn delete_channel(&self, channel_id: &Snowflake) -> Result<(), DiscordError> {
        let id = parse_channel_id(channel_id)?;
        id.delete(&self.http).await.map_err(|err| DiscordError::Rest(err.to_string()))?;
        Ok(())
    }

    async fn send_message(&self, channel_id: &Snowflake, content: &str) -> Result<Snowflake, DiscordError> {
        let id = parse_channel_id(channel_id)?;
        let msg = id
            .say(&self.http, content)
            .await
            .map_err(|err| DiscordError::Rest(err.to_string()))?;
        Ok(msg.id.to_string())
    }

    async fn edit_message(
        &self,
        channel_id: &Snowflake,
        message_id: &Snowflake,
        content: &str,
    ) -> Result<(), DiscordError> {
        let channel_id = parse_channel_id(channel_id)?;
        let message_id = parse_message_id(message_id)?;
        let builder = EditMessage::new().content(content);
        channel_id
            .edit_message(&self.http, message_id, builder)
            .await
            .map_err(|err| DiscordError::Rest(err.to_string()))?;
        Ok(())
    }

    async fn delete_message(
        &self,
        channel_id: &Snowflake,
        message_id: &Snowflake,
    ) -> Result<(), DiscordError> {
        let channel_id = parse_channel_id(channel_id)?;
        let message_id = parse_message_id(message_id)?;
        channel_id
            .delete_message(&self.http, message_id)
            .await
            .map_err(|err| DiscordError::Rest(err.to_string()))?;
        Ok(())
    }

    async fn get_message(
        &self,
        channel_id: &Snowflake,
        message_id: &Snowflake,
    ) -> Result<DiscordMessage, DiscordError> {
        let parsed_channel = parse_channel_id(channel_id)?;
        let parsed_message = parse_message_id(message_id)?;
        let msg = parsed_channel
            .message(&self.http, parsed_message)
            .await
            .map_err(|_| DiscordError::MessageNotFound(message_id.clone()))?;
        Ok(translate_message(&msg, msg.guild_id.map(|id| id.to_string())))
    }

    async fn get_messages_after(
        &self,
        channel_id: &Snowflake,
        after: Option<&Snowflake>,
    ) -> Result<Vec<DiscordMessage>, DiscordError> {
        let id = parse_channel_id(channel_id)?;
        let mut builder = serenity::all::GetMessages::new().limit(100);
        if let Some(after) = after {
            builder = builder.after(parse_message_id(after)?);
        }
        let messages = id
            .messages(&self.http, builder)
            .await
            .map_err(|err| DiscordError::Rest(err.to_string()))?;
        Ok(messages
            .iter()
            .map(|m| translate_message(m, m.guild_id.map(|id| id.to_string())))
            .collect())
    }

    async fn get_or_create_webhook(&self, channel_id: &Snowflake) -> Result<(String, String), DiscordError> {
        let id = parse_channel_id(channel_id)?;
        let existing = id
            .webhooks(&self.http)
            .await
            .map_err(|err| DiscordError::Rest(err.to_string()))?;

        if let Some(webhook) = existing.into_iter().find(|w| w.token.is_some()) {
            let token = webhook.token.expect("filtered for Some above");
            return Ok((webhook.id.to_string(), token));
        }

        let builder = CreateWebhook::new("roomy-bridge");
        let webhook = id
            .create_webhook(&self.http, builder)
            .await
            .map_err(|err| DiscordError::Rest(err.to_string()))?;
        let token = webhook.token.ok_or_else(|| DiscordError::Rest("created webhook has no token".into()))?;
        Ok((webhook.id.to_string(), token))
    }

    async fn execute_webhook(
        &self,
        webhook_id: &str,
        webhook_token: &str,
        req: ExecuteWebhookRequest,
    ) -> Result<Snowflake, DiscordError> {
        let webhook_id: u64 = webhook_id.parse().map_err(|_| DiscordError::Rest("bad webhook id".into()))?;
        let webhook = self
            .http
            .get_webhook_with_token(webhook_id.into(), webhook_token)
            .await
            .map_err(|err| DiscordError::Rest(err.to_string()))?;

        let mut builder = ExecuteWebhook::new().content(&req.content).wait(true);
        if let Some(username) = &req.username {
            builder = builder.username(username);
        }
        if let Some(avatar_url) = &req.avatar_url {
            builder = builder.avatar_url(avatar_url);
        }

        let sent = webhook
            .execute(&self.http, true, builder)
            .await
            .map_err(|err| DiscordError::Rest(err.to_string()))?
            .ok_or_else(|| DiscordError::Rest("webhook execute with wait=true returned no message".into()))?;

        Ok(sent.id.to_string())
    }

    async fn delete_webhook(&self, webhook_id: &str, webhook_token: &str) -> Result<(), DiscordError> {
        let webhook_id: u64 = webhook_id.parse().map_err(|_| DiscordError::Rest("bad webhook id".into()))?;
        self.http
            .delete_webhook_with_token(webhook_id.into(), webhook_token, None)
            .await
            .map_err(|err| DiscordError::Rest(err.to_string()))?;
        Ok(())
    }

    async fn add_reaction(
        &self,
        channel_id: &Snowflake,
        message_id: &Snowflake,
        emoji: &str,
    ) -> Result<(), DiscordError> {
        let channel_id = parse_channel_id(channel_id)?;
        let message_id = parse_message_id(message_id)?;
        let reaction = serenity::all::ReactionType::Unicode(emoji.to_string());
        channel_id
            .create_reaction(&self.http, message_id, reaction)
            .await
            .map_err(|err| DiscordError::Rest(err.to_string()))?;
        Ok(())
    }

    async fn remove_reaction(
        &self,
        channel_id: &Snowflake,
        message_id: &Snowflake,
        user_id: &Snowflake,
        emoji: &str,
    ) -> Result<(), DiscordError> {
        let channel_id = parse_channel_id(channel_id)?;
        let message_id = parse_message_id(message_id)?;
        let user_id: UserId = user_id.parse::<u64>().map_err(|_| DiscordError::Rest("bad user id".into()))?.into();
        let reaction = serenity::all::ReactionType::Unicode(emoji.to_string());
        channel_id
            .delete_reaction(&self.http, message_id, Some(user_id), reaction)
            .await
            .map_err(|err| DiscordError::Rest(err.to_string()))?;
        Ok(())
    }

    fn application_id(&self) -> Option<Snowflake> {
        self.application_id.try_read().ok().and_then(|guard| guard.clone())
    }
}

/// Builds a CDN avatar URL the way the teacher's profile sync does for
/// embed/webhook avatar fields.
pub fn cdn_avatar_url(user_id: &Snowflake, avatar_hash: &str, size: u16, format: &str) -> String {
    format!("https://cdn.discordapp.com/avatars/{user_id}/{avatar_hash}.{format}?size={size}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdn_avatar_url_embeds_size_and_format() {
        let url = cdn_avatar_url(&"42".to_string(), "abc123", 256, "webp");
        assert_eq!(url, "https://cdn.discordapp.com/avatars/42/abc123.webp?size=256");
    }
}

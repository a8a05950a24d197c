//! Collaborator boundary onto Discord. Out of scope per spec.md §1 ("the
//! Discord gateway/REST client... interfaces only"), but carried as a real
//! `serenity`-backed client the way the teacher's `DiscordClient` is, behind
//! a `DiscordGateway` trait so `Bridge`/the sync services depend on the
//! trait rather than the concrete gateway.

pub mod serenity_impl;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

use crate::ids::Snowflake;

pub use types::{
    DiscordAttachment, DiscordChannel, DiscordEvent, DiscordMessage, DiscordReaction, DiscordUser,
};

#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("discord REST call failed: {0}")]
    Rest(String),
    #[error("discord REST call timed out")]
    Timeout,
    #[error("channel {0} not found")]
    ChannelNotFound(Snowflake),
    #[error("message {0} not found")]
    MessageNotFound(Snowflake),
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteWebhookRequest {
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub content: String,
    pub nonce: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateChannelRequest {
    pub name: String,
    pub parent_id: Option<Snowflake>,
    pub is_thread: bool,
    pub starter_message_id: Option<Snowflake>,
}

/// The REST/gateway surface spec.md §6 names: message CRUD, reactions,
/// webhooks, channel CRUD, thread creation. An implementor is handed to
/// `Bridge`/the sync services as `Arc<dyn DiscordGateway>`.
#[async_trait]
pub trait DiscordGateway: Send + Sync {
    async fn create_channel(
        &self,
        guild_id: &Snowflake,
        req: CreateChannelRequest,
    ) -> Result<DiscordChannel, DiscordError>;
    async fn get_channel(&self, channel_id: &Snowflake) -> Result<DiscordChannel, DiscordError>;
    async fn list_guild_channels(&self, guild_id: &Snowflake) -> Result<Vec<DiscordChannel>, DiscordError>;
    async fn rename_channel(&self, channel_id: &Snowflake, name: &str) -> Result<(), DiscordError>;
    async fn reposition_channels(
        &self,
        guild_id: &Snowflake,
        ordered: &[(Snowflake, i32)],
    ) -> Result<(), DiscordError>;
    async fn delete_channel(&self, channel_id: &Snowflake) -> Result<(), DiscordError>;

    async fn send_message(&self, channel_id: &Snowflake, content: &str) -> Result<Snowflake, DiscordError>;
    async fn edit_message(
        &self,
        channel_id: &Snowflake,
        message_id: &Snowflake,
        content: &str,
    ) -> Result<(), DiscordError>;
    async fn delete_message(
        &self,
        channel_id: &Snowflake,
        message_id: &Snowflake,
    ) -> Result<(), DiscordError>;
    async fn get_message(
        &self,
        channel_id: &Snowflake,
        message_id: &Snowflake,
    ) -> Result<DiscordMessage, DiscordError>;
    async fn get_messages_after(
        &self,
        channel_id: &Snowflake,
        after: Option<&Snowflake>,
    ) -> Result<Vec<DiscordMessage>, DiscordError>;

    async fn get_or_create_webhook(&self, channel_id: &Snowflake) -> Result<(String, String), DiscordError>;
    async fn execute_webhook(
        &self,
        webhook_id: &str,
        webhook_token: &str,
        req: ExecuteWebhookRequest,
    ) -> Result<Snowflake, DiscordError>;
    async fn delete_webhook(&self, webhook_id: &str, webhook_token: &str) -> Result<(), DiscordError>;

    async fn add_reaction(
        &self,
        channel_id: &Snowflake,
        message_id: &Snowflake,
        emoji: &str,
    ) -> Result<(), DiscordError>;
    async fn remove_reaction(
        &self,
        channel_id: &Snowflake,
        message_id: &Snowflake,
        user_id: &Snowflake,
        emoji: &str,
    ) -> Result<(), DiscordError>;

    fn application_id(&self) -> Option<Snowflake>;
}

#[cfg(test)]
pub mod fake {
    use std::sync::atomic::{AtomicU64, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// In-memory `DiscordGateway` double for sync-service unit tests.
    pub struct FakeDiscordGateway {
        next_id: AtomicU64,
        pub sent_messages: Mutex<Vec<(Snowflake, String)>>,
        pub channels: Mutex<Vec<DiscordChannel>>,
        pub webhooks: Mutex<std::collections::HashMap<Snowflake, (String, String)>>,
    }

    impl FakeDiscordGateway {
        pub fn new() -> Self {
            Self {
                next_id: AtomicU64::new(1_000_000),
                sent_messages: Mutex::new(Vec::new()),
                channels: Mutex::new(Vec::new()),
                webhooks: Mutex::new(std::collections::HashMap::new()),
            }
        }

        fn next_id(&self) -> Snowflake {
            self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
        }
    }

    impl Default for FakeDiscordGateway {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl DiscordGateway for FakeDiscordGateway {
        async fn create_channel(
            &self,
            guild_id: &Snowflake,
            req: CreateChannelRequest,
        ) -> Result<DiscordChannel, DiscordError> {
            let channel = DiscordChannel {
                id: self.next_id(),
                guild_id: Some(guild_id.clone()),
                parent_id: req.parent_id,
                name: req.name,
                is_thread: req.is_thread,
                position: 0,
            };
            self.channels.lock().push(channel.clone());
            Ok(channel)
        }

        async fn get_channel(&self, channel_id: &Snowflake) -> Result<DiscordChannel, DiscordError> {
            self.channels
                .lock()
                .iter()
                .find(|c| &c.id == channel_id)
                .cloned()
                .ok_or_else(|| DiscordError::ChannelNotFound(channel_id.clone()))
        }

        async fn list_guild_channels(&self, guild_id: &Snowflake) -> Result<Vec<DiscordChannel>, DiscordError> {
            Ok(self
                .channels
                .lock()
                .iter()
                .filter(|c| c.guild_id.as_ref() == Some(guild_id))
                .cloned()
                .collect())
        }

        async fn rename_channel(&self, channel_id: &Snowflake, name: &str) -> Result<(), DiscordError> {
            let mut channels = self.channels.lock();
            let channel = channels
                .iter_mut()
                .find(|c| &c.id == channel_id)
                .ok_or_else(|| DiscordError::ChannelNotFound(channel_id.clone()))?;
            channel.name = name.to_string();
            Ok(())
        }

        async fn reposition_channels(
            &self,
            _guild_id: &Snowflake,
            ordered: &[(Snowflake, i32)],
        ) -> Result<(), DiscordError> {
            let mut channels = self.channels.lock();
            for (id, position) in ordered {
                if let Some(channel) = channels.iter_mut().find(|c| &c.id == id) {
                    channel.position = *position;
                }
            }
            Ok(())
        }

        async fn delete_channel(&self, channel_id: &Snowflake) -> Result<(), DiscordError> {
            self.channels.lock().retain(|c| &c.id != channel_id);
            Ok(())
        }

        async fn send_message(&self, channel_id: &Snowflake, content: &str) -> Result<Snowflake, DiscordError> {
            let id = self.next_id();
            self.sent_messages.lock().push((channel_id.clone(), content.to_string()));
            Ok(id)
        }

        async fn edit_message(
            &self,
            _channel_id: &Snowflake,
            _message_id: &Snowflake,
            _content: &str,
        ) -> Result<(), DiscordError> {
            Ok(())
        }

        async fn delete_message(
            &self,
            _channel_id: &Snowflake,
            _message_id: &Snowflake,
        ) -> Result<(), DiscordError> {
            Ok(())
        }

        async fn get_message(
            &self,
            channel_id: &Snowflake,
            message_id: &Snowflake,
        ) -> Result<DiscordMessage, DiscordError> {
            Err(DiscordError::MessageNotFound(format!("{channel_id}:{message_id}")))
        }

        async fn get_messages_after(
            &self,
            _channel_id: &Snowflake,
            _after: Option<&Snowflake>,
        ) -> Result<Vec<DiscordMessage>, DiscordError> {
            Ok(Vec::new())
        }

        async fn get_or_create_webhook(&self, channel_id: &Snowflake) -> Result<(String, String), DiscordError> {
            let mut webhooks = self.webhooks.lock();
            if let Some(existing) = webhooks.get(channel_id) {
                return Ok(existing.clone());
            }
            let created = (self.next_id(), "fake-token".to_string());
            webhooks.insert(channel_id.clone(), created.clone());
            Ok(created)
        }

        async fn execute_webhook(
            &self,
            _webhook_id: &str,
            _webhook_token: &str,
            req: ExecuteWebhookRequest,
        ) -> Result<Snowflake, DiscordError> {
            let id = self.next_id();
            self.sent_messages.lock().push((id.clone(), req.content));
            Ok(id)
        }

        async fn delete_webhook(&self, _webhook_id: &str, _webhook_token: &str) -> Result<(), DiscordError> {
            Ok(())
        }

        async fn add_reaction(
            &self,
            _channel_id: &Snowflake,
            _message_id: &Snowflake,
            _emoji: &str,
        ) -> Result<(), DiscordError> {
            Ok(())
        }

        async fn remove_reaction(
            &self,
            _channel_id: &Snowflake,
            _message_id: &Snowflake,
            _user_id: &Snowflake,
            _emoji: &str,
        ) -> Result<(), DiscordError> {
            Ok(())
        }

        fn application_id(&self) -> Option<Snowflake> {
            Some("123456".to_string())
        }
    }

    #[tokio::test]
    async fn get_or_create_webhook_is_idempotent_per_channel() {
        let gateway = FakeDiscordGateway::new();
        let first = gateway.get_or_create_webhook(&"42".to_string()).await.unwrap();
        let second = gateway.get_or_create_webhook(&"42".to_string()).await.unwrap();
        assert_eq!(first, second);
    }
}

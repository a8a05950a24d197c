pub mod error;
pub mod migration;
pub mod models;
pub(crate) mod sled_store;

pub use error::RepositoryError;
pub use models::{BridgeRecord, EditInfo, RoomyUserProfile, WebhookToken};
pub use sled_store::{ConfigStore, SledBridgeRepository, SledConfigStore, SledRepoHandle};

use async_trait::async_trait;

use crate::ids::{StreamIndex, Ulid};

/// Per-bridge durable key-value store, namespaced as described in spec.md §3.
#[async_trait]
pub trait BridgeRepository: Send + Sync {
    async fn register_mapping(&self, discord_key: &str, roomy_id: &Ulid) -> Result<(), RepositoryError>;
    async fn get_roomy_id(&self, discord_key: &str) -> Result<Option<Ulid>, RepositoryError>;
    async fn get_discord_id(&self, roomy_id: &Ulid) -> Result<Option<String>, RepositoryError>;

    async fn get_profile_hash(&self, discord_user_id: &str) -> Result<Option<String>, RepositoryError>;
    async fn set_profile_hash(&self, discord_user_id: &str, hash: &str) -> Result<(), RepositoryError>;

    async fn get_roomy_user_profile(&self, did: &str) -> Result<Option<RoomyUserProfile>, RepositoryError>;
    async fn set_roomy_user_profile(
        &self,
        did: &str,
        profile: RoomyUserProfile,
    ) -> Result<(), RepositoryError>;

    async fn get_reaction_event(&self, key: &str) -> Result<Option<Ulid>, RepositoryError>;
    async fn set_reaction_event(&self, key: &str, id: &Ulid) -> Result<(), RepositoryError>;
    async fn delete_reaction_event(&self, key: &str) -> Result<(), RepositoryError>;

    async fn get_sidebar_hash(&self) -> Result<Option<String>, RepositoryError>;
    async fn set_sidebar_hash(&self, hash: &str) -> Result<(), RepositoryError>;

    async fn get_room_link(&self, key: &str) -> Result<Option<Ulid>, RepositoryError>;
    async fn set_room_link(&self, key: &str, id: &Ulid) -> Result<(), RepositoryError>;
    async fn delete_room_link(&self, key: &str) -> Result<(), RepositoryError>;

    async fn get_edit_info(&self, message_id: &str) -> Result<Option<EditInfo>, RepositoryError>;
    async fn set_edit_info(&self, message_id: &str, info: EditInfo) -> Result<(), RepositoryError>;

    async fn get_webhook_token(&self, channel_id: &str) -> Result<Option<WebhookToken>, RepositoryError>;
    async fn set_webhook_token(
        &self,
        channel_id: &str,
        token: WebhookToken,
    ) -> Result<(), RepositoryError>;

    async fn get_message_hash_owner(&self, key: &str) -> Result<Option<String>, RepositoryError>;
    async fn set_message_hash_owner(&self, key: &str, message_id: &str) -> Result<(), RepositoryError>;

    async fn get_latest_message(&self, channel_id: &str) -> Result<Option<String>, RepositoryError>;
    async fn set_latest_message(&self, channel_id: &str, message_id: &str) -> Result<(), RepositoryError>;

    async fn get_cursor(&self) -> Result<StreamIndex, RepositoryError>;
    async fn set_cursor(&self, idx: StreamIndex) -> Result<(), RepositoryError>;

    async fn delete(&self) -> Result<(), RepositoryError>;
}

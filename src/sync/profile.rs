//! Discord→Roomy profile mirroring, hash-gated so unchanged profiles never
//! re-emit. Grounded on spec.md §4.6.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::dispatcher::Dispatcher;
use crate::discord::serenity_impl::cdn_avatar_url;
use crate::discord::DiscordUser;
use crate::fingerprint;
use crate::ids::{discord_user_did, Snowflake};
use crate::repo::{BridgeRepository, RoomyUserProfile};
use crate::roomy::types::{extension_key, type_id};
use crate::roomy::{DecodedStreamEvent, RoomyEvent};

use super::RoomyEventOutcome;

pub struct ProfileSync {
    repo: Arc<dyn BridgeRepository>,
    dispatcher: Arc<Dispatcher>,
    guild_id: Snowflake,
}

impl ProfileSync {
    pub fn new(repo: Arc<dyn BridgeRepository>, dispatcher: Arc<Dispatcher>, guild_id: Snowflake) -> Self {
        Self { repo, dispatcher, guild_id }
    }

    /// Mirrors a Discord user's profile into Roomy unless nothing tracked
    /// has changed since the last mirror.
    pub async fn sync_discord_to_roomy(&self, user: &DiscordUser) {
        let hash = fingerprint::profile_hash(&user.username, user.global_name.as_deref(), user.avatar.as_deref());

        match self.repo.get_profile_hash(&user.id).await {
            Ok(Some(stored)) if stored == hash => {
                debug!(user_id = %user.id, "profile unchanged, skipping emit");
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, user_id = %user.id, "failed to read cached profile hash");
            }
            _ => {}
        }

        let name = user.global_name.clone().unwrap_or_else(|| user.username.clone());
        let avatar = user.avatar.as_deref().map(|hash| cdn_avatar_url(&user.id, hash, 256, "webp"));

        let event = RoomyEvent::new(
            type_id::UPDATE_PROFILE,
            json!({ "did": discord_user_did(&user.id), "name": name, "avatar": avatar }),
        )
        .with_extensions(json!({
            extension_key::DISCORD_USER_ORIGIN: {
                "snowflake": user.id,
                "guildId": self.guild_id,
                "profileHash": hash,
                "handle": user.username,
            }
        }));

        self.dispatcher.push_to_roomy(event);

        if let Err(err) = self.repo.set_profile_hash(&user.id, &hash).await {
            tracing::warn!(error = %err, user_id = %user.id, "failed to persist profile hash");
        }
    }

    /// Classifies an inbound `updateProfile` event: our own echo (persist the
    /// hash so the next Discord-side change still hash-gates correctly) or a
    /// genuine Roomy-originated profile to cache. Never forwarded to
    /// Discord: profile mirroring is unidirectional.
    pub async fn handle_roomy_event(&self, decoded: &DecodedStreamEvent) -> RoomyEventOutcome {
        if decoded.event.kind != type_id::UPDATE_PROFILE {
            return RoomyEventOutcome::NotMine;
        }

        if let Some(origin) = decoded.event.extension(extension_key::DISCORD_USER_ORIGIN) {
            let same_guild = origin.get("guildId").and_then(|v| v.as_str()) == Some(self.guild_id.as_str());
            if same_guild {
                if let Some(hash) = origin.get("profileHash").and_then(|v| v.as_str()) {
                    if let Some(snowflake) = origin.get("snowflake").and_then(|v| v.as_str()) {
                        if let Err(err) = self.repo.set_profile_hash(snowflake, hash).await {
                            tracing::warn!(error = %err, "failed to persist echoed profile hash");
                        }
                    }
                }
                return RoomyEventOutcome::Absorbed;
            }
        }

        let did = decoded.event.payload.get("did").and_then(|v| v.as_str()).unwrap_or_default();
        let name = decoded.event.payload.get("name").and_then(|v| v.as_str()).unwrap_or("Unknown").to_string();
        let avatar = decoded.event.payload.get("avatar").and_then(|v| v.as_str()).map(str::to_string);

        let profile = RoomyUserProfile { name, avatar, handle: None };
        if let Err(err) = self.repo.set_roomy_user_profile(did, profile).await {
            tracing::warn!(error = %err, did, "failed to cache roomy user profile");
        }

        RoomyEventOutcome::Absorbed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::StreamDid;
    use crate::repo::sled_store::SledRepoHandle;
    use crate::roomy::{DecodedStreamEvent, RoomyEvent};

    async fn test_repo() -> (tempfile::TempDir, Arc<dyn BridgeRepository>) {
        let dir = tempfile::tempdir().unwrap();
        let handle = SledRepoHandle::open(dir.path().to_str().unwrap()).unwrap();
        let key = crate::ids::GuildSpaceKey::new("111", StreamDid::parse("did:plc:space").unwrap());
        let repo = handle.repository_for(&key, 50).unwrap();
        (dir, Arc::new(repo))
    }

    fn discord_user(id: &str) -> DiscordUser {
        DiscordUser {
            id: id.to_string(),
            username: "alice".to_string(),
            global_name: Some("Alice".to_string()),
            avatar: Some("abc123".to_string()),
        }
    }

    #[tokio::test]
    async fn sync_discord_to_roomy_emits_once_for_unchanged_profile() {
        let (_dir, repo) = test_repo().await;
        let (dispatcher, _consumers) = Dispatcher::new();
        let service = ProfileSync::new(repo, dispatcher, "111".to_string());

        let user = discord_user("42");
        service.sync_discord_to_roomy(&user).await;
        service.sync_discord_to_roomy(&user).await;

        // Second call is a no-op (nothing to assert on the channel directly
        // here since Dispatcher hides its consumer after construction); the
        // hash-gate is asserted indirectly via repository state below.
        let hash = fingerprint::profile_hash("alice", Some("Alice"), Some("abc123"));
        assert_eq!(service.repo.get_profile_hash("42").await.unwrap(), Some(hash));
    }

    #[tokio::test]
    async fn handle_roomy_event_absorbs_same_guild_echo() {
        let (_dir, repo) = test_repo().await;
        let (dispatcher, _consumers) = Dispatcher::new();
        let service = ProfileSync::new(repo, dispatcher, "111".to_string());

        let event = RoomyEvent::new(type_id::UPDATE_PROFILE, json!({"did": "did:discord:42"}))
            .with_extensions(json!({
                extension_key::DISCORD_USER_ORIGIN: {
                    "snowflake": "42",
                    "guildId": "111",
                    "profileHash": "deadbeef",
                }
            }));
        let decoded = DecodedStreamEvent { idx: 1, event, user: None };

        let outcome = service.handle_roomy_event(&decoded).await;
        assert_eq!(outcome, RoomyEventOutcome::Absorbed);
        assert_eq!(service.repo.get_profile_hash("42").await.unwrap(), Some("deadbeef".to_string()));
    }

    #[tokio::test]
    async fn handle_roomy_event_caches_genuine_inbound_profile() {
        let (_dir, repo) = test_repo().await;
        let (dispatcher, _consumers) = Dispatcher::new();
        let service = ProfileSync::new(repo, dispatcher, "111".to_string());

        let event = RoomyEvent::new(
            type_id::UPDATE_PROFILE,
            json!({"did": "did:plc:bob", "name": "Bob", "avatar": "https://example.com/bob.png"}),
        );
        let decoded = DecodedStreamEvent { idx: 2, event, user: None };

        let outcome = service.handle_roomy_event(&decoded).await;
        assert_eq!(outcome, RoomyEventOutcome::Absorbed);

        let cached = service.repo.get_roomy_user_profile("did:plc:bob").await.unwrap().unwrap();
        assert_eq!(cached.name, "Bob");
    }

    #[tokio::test]
    async fn handle_roomy_event_ignores_other_event_types() {
        let (_dir, repo) = test_repo().await;
        let (dispatcher, _consumers) = Dispatcher::new();
        let service = ProfileSync::new(repo, dispatcher, "111".to_string());

        let event = RoomyEvent::new(type_id::CREATE_MESSAGE, json!({}));
        let decoded = DecodedStreamEvent { idx: 3, event, user: None };

        assert_eq!(service.handle_roomy_event(&decoded).await, RoomyEventOutcome::NotMine);
    }
}

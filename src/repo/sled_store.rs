use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;

use crate::ids::{GuildSpaceKey, StreamIndex, Ulid};

use super::error::RepositoryError;
use super::models::{BridgeRecord, EditInfo, RoomyUserProfile, WebhookToken};
use super::BridgeRepository;

const PREFIX_MAP_D2R: &str = "map:d2r:";
const PREFIX_MAP_R2D: &str = "map:r2d:";
const PREFIX_PROFILE_HASH: &str = "profile-hash:";
const PREFIX_ROOMY_PROFILE: &str = "roomy-user-profile:";
const PREFIX_REACTION: &str = "reaction:";
const KEY_SIDEBAR_HASH: &str = "sidebar-hash";
const PREFIX_ROOM_LINK: &str = "room-link:";
const PREFIX_EDIT_INFO: &str = "edit-info:";
const PREFIX_WEBHOOK_TOKEN: &str = "webhook-token:";
const PREFIX_MESSAGE_HASH: &str = "message-hashes:";
const PREFIX_LATEST_MESSAGE: &str = "latest-message:";
const KEY_CURSOR: &str = "cursor";

/// Process-wide handle onto the `sled::Db` rooted at the configured data
/// directory. Opens a `bridges/<GuildSpaceKey>` tree per bridge and a single
/// `configs` tree for durable `BridgeRecord`s, mirroring spec.md §6's
/// "tree-structured key-value store... top-level prefix `bridges/`... a
/// separate `configs/` namespace".
#[derive(Clone)]
pub struct SledRepoHandle {
    db: sled::Db,
}

impl SledRepoHandle {
    pub fn open(data_dir: &str) -> Result<Self, RepositoryError> {
        let db = sled::open(data_dir)?;
        Ok(Self { db })
    }

    pub fn repository_for(
        &self,
        key: &GuildSpaceKey,
        roomy_profile_lru_size: usize,
    ) -> Result<SledBridgeRepository, RepositoryError> {
        let tree_name = format!("bridges/{key}");
        let tree = self.db.open_tree(tree_name.as_bytes())?;
        Ok(SledBridgeRepository::new(self.db.clone(), tree, roomy_profile_lru_size))
    }

    pub fn config_store(&self) -> Result<SledConfigStore, RepositoryError> {
        let tree = self.db.open_tree(b"configs")?;
        Ok(SledConfigStore { tree })
    }
}

/// Sled-backed implementation of [`BridgeRepository`] for a single bridge.
pub struct SledBridgeRepository {
    db: sled::Db,
    tree: sled::Tree,
    roomy_profile_lru: Arc<Mutex<LruCache<String, RoomyUserProfile>>>,
}

impl SledBridgeRepository {
    fn new(db: sled::Db, tree: sled::Tree, lru_size: usize) -> Self {
        let capacity = std::num::NonZeroUsize::new(lru_size.max(1)).unwrap();
        Self {
            db,
            tree,
            roomy_profile_lru: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    async fn run_blocking<F, T>(&self, f: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(sled::Tree) -> Result<T, RepositoryError> + Send + 'static,
        T: Send + 'static,
    {
        let tree = self.tree.clone();
        tokio::task::spawn_blocking(move || f(tree)).await?
    }

    fn get_string(tree: &sled::Tree, key: &str) -> Result<Option<String>, RepositoryError> {
        Ok(tree
            .get(key.as_bytes())?
            .map(|ivec| String::from_utf8_lossy(&ivec).into_owned()))
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        tree: &sled::Tree,
        key: &str,
    ) -> Result<Option<T>, RepositoryError> {
        match tree.get(key.as_bytes())? {
            Some(ivec) => Ok(Some(serde_json::from_slice(&ivec)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: serde::Serialize>(
        tree: &sled::Tree,
        key: &str,
        value: &T,
    ) -> Result<(), RepositoryError> {
        let bytes = serde_json::to_vec(value)?;
        tree.insert(key.as_bytes(), bytes)?;
        Ok(())
    }
}

#[async_trait]
impl BridgeRepository for SledBridgeRepository {
    async fn register_mapping(&self, discord_key: &str, roomy_id: &Ulid) -> Result<(), RepositoryError> {
        let discord_key = discord_key.to_string();
        let roomy_id = roomy_id.to_string();
        self.run_blocking(move |tree| {
            let d2r_key = format!("{PREFIX_MAP_D2R}{discord_key}");
            let r2d_key = format!("{PREFIX_MAP_R2D}{roomy_id}");

            let result = tree.transaction::<_, _, RepositoryError>(|tx| {
                if tx.get(d2r_key.as_bytes())?.is_some() || tx.get(r2d_key.as_bytes())?.is_some() {
                    return Err(sled::transaction::ConflictableTransactionError::Abort(
                        RepositoryError::AlreadyRegistered,
                    ));
                }
                tx.insert(d2r_key.as_bytes(), roomy_id.as_bytes())?;
                tx.insert(r2d_key.as_bytes(), discord_key.as_bytes())?;
                Ok(())
            });

            match result {
                Ok(()) => Ok(()),
                Err(sled::transaction::TransactionError::Abort(err)) => Err(err),
                Err(sled::transaction::TransactionError::Storage(err)) => Err(err.into()),
            }
        })
        .await
    }

    async fn get_roomy_id(&self, discord_key: &str) -> Result<Option<Ulid>, RepositoryError> {
        let key = format!("{PREFIX_MAP_D2R}{discord_key}");
        let value = self
            .run_blocking(move |tree| Self::get_string(&tree, &key))
            .await?;
        Ok(value.and_then(|s| Ulid::from_string(&s).ok()))
    }

    async fn get_discord_id(&self, roomy_id: &Ulid) -> Result<Option<String>, RepositoryError> {
        let key = format!("{PREFIX_MAP_R2D}{roomy_id}");
        self.run_blocking(move |tree| Self::get_string(&tree, &key))
            .await
    }

    async fn get_profile_hash(&self, discord_user_id: &str) -> Result<Option<String>, RepositoryError> {
        let key = format!("{PREFIX_PROFILE_HASH}{discord_user_id}");
        self.run_blocking(move |tree| Self::get_string(&tree, &key))
            .await
    }

    async fn set_profile_hash(&self, discord_user_id: &str, hash: &str) -> Result<(), RepositoryError> {
        let key = format!("{PREFIX_PROFILE_HASH}{discord_user_id}");
        let hash = hash.to_string();
        self.run_blocking(move |tree| {
            tree.insert(key.as_bytes(), hash.as_bytes())?;
            Ok(())
        })
        .await
    }

    async fn get_roomy_user_profile(&self, did: &str) -> Result<Option<RoomyUserProfile>, RepositoryError> {
        if let Some(profile) = self.roomy_profile_lru.lock().get(did).cloned() {
            return Ok(Some(profile));
        }

        let key = format!("{PREFIX_ROOMY_PROFILE}{did}");
        let stored: Option<RoomyUserProfile> = self
            .run_blocking(move |tree| Self::get_json(&tree, &key))
            .await?;

        if let Some(profile) = &stored {
            self.roomy_profile_lru.lock().put(did.to_string(), profile.clone());
        }
        Ok(stored)
    }

    async fn set_roomy_user_profile(
        &self,
        did: &str,
        profile: RoomyUserProfile,
    ) -> Result<(), RepositoryError> {
        self.roomy_profile_lru.lock().put(did.to_string(), profile.clone());

        let key = format!("{PREFIX_ROOMY_PROFILE}{did}");
        self.run_blocking(move |tree| Self::set_json(&tree, &key, &profile))
            .await
    }

    async fn get_reaction_event(&self, key: &str) -> Result<Option<Ulid>, RepositoryError> {
        let full_key = format!("{PREFIX_REACTION}{key}");
        let value = self
            .run_blocking(move |tree| Self::get_string(&tree, &full_key))
            .await?;
        Ok(value.and_then(|s| Ulid::from_string(&s).ok()))
    }

    async fn set_reaction_event(&self, key: &str, id: &Ulid) -> Result<(), RepositoryError> {
        let full_key = format!("{PREFIX_REACTION}{key}");
        let id = id.to_string();
        self.run_blocking(move |tree| {
            tree.insert(full_key.as_bytes(), id.as_bytes())?;
            Ok(())
        })
        .await
    }

    async fn delete_reaction_event(&self, key: &str) -> Result<(), RepositoryError> {
        let full_key = format!("{PREFIX_REACTION}{key}");
        self.run_blocking(move |tree| {
            tree.remove(full_key.as_bytes())?;
            Ok(())
        })
        .await
    }

    async fn get_sidebar_hash(&self) -> Result<Option<String>, RepositoryError> {
        self.run_blocking(|tree| Self::get_string(&tree, KEY_SIDEBAR_HASH)).await
    }

    async fn set_sidebar_hash(&self, hash: &str) -> Result<(), RepositoryError> {
        let hash = hash.to_string();
        self.run_blocking(move |tree| {
            tree.insert(KEY_SIDEBAR_HASH.as_bytes(), hash.as_bytes())?;
            Ok(())
        })
        .await
    }

    async fn get_room_link(&self, key: &str) -> Result<Option<Ulid>, RepositoryError> {
        let full_key = format!("{PREFIX_ROOM_LINK}{key}");
        let value = self
            .run_blocking(move |tree| Self::get_string(&tree, &full_key))
            .await?;
        Ok(value.and_then(|s| Ulid::from_string(&s).ok()))
    }

    async fn set_room_link(&self, key: &str, id: &Ulid) -> Result<(), RepositoryError> {
        let full_key = format!("{PREFIX_ROOM_LINK}{key}");
        let id = id.to_string();
        self.run_blocking(move |tree| {
            tree.insert(full_key.as_bytes(), id.as_bytes())?;
            Ok(())
        })
        .await
    }

    async fn delete_room_link(&self, key: &str) -> Result<(), RepositoryError> {
        let full_key = format!("{PREFIX_ROOM_LINK}{key}");
        self.run_blocking(move |tree| {
            tree.remove(full_key.as_bytes())?;
            Ok(())
        })
        .await
    }

    async fn get_edit_info(&self, message_id: &str) -> Result<Option<EditInfo>, RepositoryError> {
        let key = format!("{PREFIX_EDIT_INFO}{message_id}");
        self.run_blocking(move |tree| Self::get_json(&tree, &key)).await
    }

    async fn set_edit_info(&self, message_id: &str, info: EditInfo) -> Result<(), RepositoryError> {
        let key = format!("{PREFIX_EDIT_INFO}{message_id}");
        self.run_blocking(move |tree| Self::set_json(&tree, &key, &info))
            .await
    }

    async fn get_webhook_token(&self, channel_id: &str) -> Result<Option<WebhookToken>, RepositoryError> {
        let key = format!("{PREFIX_WEBHOOK_TOKEN}{channel_id}");
        self.run_blocking(move |tree| Self::get_json(&tree, &key)).await
    }

    async fn set_webhook_token(
        &self,
        channel_id: &str,
        token: WebhookToken,
    ) -> Result<(), RepositoryError> {
        let key = format!("{PREFIX_WEBHOOK_TOKEN}{channel_id}");
        self.run_blocking(move |tree| Self::set_json(&tree, &key, &token))
            .await
    }

    async fn get_message_hash_owner(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let full_key = format!("{PREFIX_MESSAGE_HASH}{key}");
        self.run_blocking(move |tree| Self::get_string(&tree, &full_key))
            .await
    }

    async fn set_message_hash_owner(&self, key: &str, message_id: &str) -> Result<(), RepositoryError> {
        let full_key = format!("{PREFIX_MESSAGE_HASH}{key}");
        let message_id = message_id.to_string();
        self.run_blocking(move |tree| {
            tree.insert(full_key.as_bytes(), message_id.as_bytes())?;
            Ok(())
        })
        .await
    }

    async fn get_latest_message(&self, channel_id: &str) -> Result<Option<String>, RepositoryError> {
        let key = format!("{PREFIX_LATEST_MESSAGE}{channel_id}");
        self.run_blocking(move |tree| Self::get_string(&tree, &key)).await
    }

    async fn set_latest_message(&self, channel_id: &str, message_id: &str) -> Result<(), RepositoryError> {
        let key = format!("{PREFIX_LATEST_MESSAGE}{channel_id}");
        let message_id = message_id.to_string();
        self.run_blocking(move |tree| {
            tree.insert(key.as_bytes(), message_id.as_bytes())?;
            Ok(())
        })
        .await
    }

    async fn get_cursor(&self) -> Result<StreamIndex, RepositoryError> {
        let value = self
            .run_blocking(|tree| {
                Ok(tree
                    .get(KEY_CURSOR.as_bytes())?
                    .map(|ivec| u64::from_le_bytes(ivec.as_ref().try_into().unwrap_or([0; 8]))))
            })
            .await?;
        Ok(value.unwrap_or(0))
    }

    async fn set_cursor(&self, idx: StreamIndex) -> Result<(), RepositoryError> {
        self.run_blocking(move |tree| {
            tree.fetch_and_update(KEY_CURSOR.as_bytes(), move |current| {
                let current = current
                    .map(|bytes| u64::from_le_bytes(bytes.try_into().unwrap_or([0; 8])))
                    .unwrap_or(0);
                Some(current.max(idx).to_le_bytes().to_vec())
            })?;
            Ok(())
        })
        .await
    }

    async fn delete(&self) -> Result<(), RepositoryError> {
        let db = self.db.clone();
        let name = self.tree.name();
        tokio::task::spawn_blocking(move || {
            db.drop_tree(&name)?;
            Ok::<_, RepositoryError>(())
        })
        .await?
    }
}

/// Durable store for `BridgeRecord`s, the `configs/` namespace in spec.md §6.
pub struct SledConfigStore {
    tree: sled::Tree,
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn list(&self) -> Result<Vec<BridgeRecord>, RepositoryError>;
    async fn create(&self, record: BridgeRecord) -> Result<(), RepositoryError>;
    async fn delete(&self, key: &GuildSpaceKey) -> Result<(), RepositoryError>;
}

#[async_trait]
impl ConfigStore for SledConfigStore {
    async fn list(&self) -> Result<Vec<BridgeRecord>, RepositoryError> {
        let tree = self.tree.clone();
        tokio::task::spawn_blocking(move || {
            let mut records = Vec::new();
            for item in tree.iter() {
                let (_, value) = item?;
                records.push(serde_json::from_slice(&value)?);
            }
            Ok(records)
        })
        .await?
    }

    async fn create(&self, record: BridgeRecord) -> Result<(), RepositoryError> {
        let tree = self.tree.clone();
        let key = record.key().to_string();
        tokio::task::spawn_blocking(move || {
            let bytes = serde_json::to_vec(&record)?;
            tree.insert(key.as_bytes(), bytes)?;
            Ok(())
        })
        .await?
    }

    async fn delete(&self, key: &GuildSpaceKey) -> Result<(), RepositoryError> {
        let tree = self.tree.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            tree.remove(key.as_bytes())?;
            Ok(())
        })
        .await?
    }
}

/// Deterministic, collision-resistant-enough key helper for callers that
/// want a single hashed cache key rather than a long composite string.
pub fn hashed_key(parts: &[&str]) -> String {
    let mut hasher = DefaultHasher::new();
    for part in parts {
        part.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::StreamDid;

    fn open_test_handle() -> (tempfile::TempDir, SledRepoHandle) {
        let dir = tempfile::tempdir().unwrap();
        let handle = SledRepoHandle::open(dir.path().to_str().unwrap()).unwrap();
        (dir, handle)
    }

    fn test_key() -> GuildSpaceKey {
        GuildSpaceKey::new("111", StreamDid::parse("did:plc:space").unwrap())
    }

    #[tokio::test]
    async fn register_mapping_round_trips_both_directions() {
        let (_dir, handle) = open_test_handle();
        let repo = handle.repository_for(&test_key(), 50).unwrap();

        let roomy_id = Ulid::new();
        repo.register_mapping("room:123", &roomy_id).await.unwrap();

        assert_eq!(repo.get_roomy_id("room:123").await.unwrap(), Some(roomy_id));
        assert_eq!(
            repo.get_discord_id(&roomy_id).await.unwrap(),
            Some("room:123".to_string())
        );
    }

    #[tokio::test]
    async fn register_mapping_rejects_duplicate_discord_key() {
        let (_dir, handle) = open_test_handle();
        let repo = handle.repository_for(&test_key(), 50).unwrap();

        repo.register_mapping("msg:1", &Ulid::new()).await.unwrap();
        let err = repo.register_mapping("msg:1", &Ulid::new()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyRegistered));
    }

    #[tokio::test]
    async fn register_mapping_rejects_duplicate_roomy_id() {
        let (_dir, handle) = open_test_handle();
        let repo = handle.repository_for(&test_key(), 50).unwrap();

        let roomy_id = Ulid::new();
        repo.register_mapping("msg:1", &roomy_id).await.unwrap();
        let err = repo
            .register_mapping("msg:2", &roomy_id)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyRegistered));
    }

    #[tokio::test]
    async fn missing_keys_return_none_not_error() {
        let (_dir, handle) = open_test_handle();
        let repo = handle.repository_for(&test_key(), 50).unwrap();

        assert_eq!(repo.get_roomy_id("nope").await.unwrap(), None);
        assert_eq!(repo.get_discord_id(&Ulid::new()).await.unwrap(), None);
        assert_eq!(repo.get_profile_hash("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cursor_starts_at_zero_and_never_regresses() {
        let (_dir, handle) = open_test_handle();
        let repo = handle.repository_for(&test_key(), 50).unwrap();

        assert_eq!(repo.get_cursor().await.unwrap(), 0);
        repo.set_cursor(42).await.unwrap();
        assert_eq!(repo.get_cursor().await.unwrap(), 42);
        repo.set_cursor(10).await.unwrap();
        assert_eq!(repo.get_cursor().await.unwrap(), 42);
        repo.set_cursor(100).await.unwrap();
        assert_eq!(repo.get_cursor().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn roomy_user_profile_is_served_from_lru_after_first_read() {
        let (_dir, handle) = open_test_handle();
        let repo = handle.repository_for(&test_key(), 50).unwrap();

        let profile = RoomyUserProfile {
            name: "Alice".to_string(),
            avatar: None,
            handle: Some("alice.roomy".to_string()),
        };
        repo.set_roomy_user_profile("did:plc:alice", profile.clone())
            .await
            .unwrap();

        let fetched = repo.get_roomy_user_profile("did:plc:alice").await.unwrap();
        assert_eq!(fetched, Some(profile));
    }

    #[tokio::test]
    async fn reaction_event_delete_removes_key() {
        let (_dir, handle) = open_test_handle();
        let repo = handle.repository_for(&test_key(), 50).unwrap();

        let id = Ulid::new();
        repo.set_reaction_event("msg:user:👍", &id).await.unwrap();
        assert_eq!(repo.get_reaction_event("msg:user:👍").await.unwrap(), Some(id));

        repo.delete_reaction_event("msg:user:👍").await.unwrap();
        assert_eq!(repo.get_reaction_event("msg:user:👍").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_purges_entire_bridge_namespace() {
        let (_dir, handle) = open_test_handle();
        let repo = handle.repository_for(&test_key(), 50).unwrap();

        repo.set_sidebar_hash("abc").await.unwrap();
        repo.delete().await.unwrap();

        let repo2 = handle.repository_for(&test_key(), 50).unwrap();
        assert_eq!(repo2.get_sidebar_hash().await.unwrap(), None);
    }

    #[tokio::test]
    async fn config_store_lists_created_records() {
        let (_dir, handle) = open_test_handle();
        let store = handle.config_store().unwrap();

        let record = BridgeRecord {
            guild_id: "111".to_string(),
            space_id: StreamDid::parse("did:plc:space").unwrap(),
            created_at: chrono::Utc::now(),
        };
        store.create(record.clone()).await.unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records, vec![record]);
    }

    #[tokio::test]
    async fn config_store_delete_removes_record() {
        let (_dir, handle) = open_test_handle();
        let store = handle.config_store().unwrap();
        let key = test_key();

        store
            .create(BridgeRecord {
                guild_id: key.guild_id.clone(),
                space_id: key.space_id.clone(),
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        store.delete(&key).await.unwrap();

        assert!(store.list().await.unwrap().is_empty());
    }
}

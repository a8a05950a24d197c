//! Process-wide coordinator: one Discord gateway connection and one Roomy
//! identity multiplexed across every bridged guild/space pair. Grounded on
//! spec.md §4.11 and on how the teacher's `main.rs` holds a single
//! `DiscordClient`/`MatrixAppservice` behind `Arc` shared across every room
//! mapping instead of one collaborator per room.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::discord::{DiscordEvent, DiscordGateway};
use crate::ids::{GuildSpaceKey, Snowflake, StreamDid};
use crate::repo::migration::{migrate_legacy_config, LegacyBridgeConfig};
use crate::repo::{BridgeRecord, ConfigStore, RepositoryError, SledConfigStore, SledRepoHandle};
use crate::roomy::{RoomyClient, RoomyError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("space {0} does not exist")]
    SpaceNotFound(StreamDid),
    #[error("guild/space pair is already bridged")]
    AlreadyBridged,
    #[error("no bridge found for this key")]
    NotFound,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Roomy(#[from] RoomyError),
}

/// Owns the process-wide Discord/Roomy collaborators and every live
/// `Bridge`, fanning inbound Discord events out by guild id.
pub struct Orchestrator {
    discord: Arc<dyn DiscordGateway>,
    roomy: Arc<dyn RoomyClient>,
    repo_handle: SledRepoHandle,
    config_store: SledConfigStore,
    bridges: RwLock<HashMap<GuildSpaceKey, Arc<Bridge>>>,
    guild_index: RwLock<HashMap<Snowflake, Vec<GuildSpaceKey>>>,
    batch_size: usize,
    roomy_profile_lru_size: usize,
}

impl Orchestrator {
    /// Runs the legacy-config migration, loads every persisted `BridgeConfig`,
    /// constructs and connects a `Bridge` per config, then spawns the
    /// Discord-event fan-out loop. Mirrors the teacher's `main.rs` sequencing:
    /// migrate, then construct collaborators, then wire everything together.
    pub async fn start(
        discord: Arc<dyn DiscordGateway>,
        discord_events: mpsc::UnboundedReceiver<DiscordEvent>,
        roomy: Arc<dyn RoomyClient>,
        repo_handle: SledRepoHandle,
        batch_size: usize,
        roomy_profile_lru_size: usize,
        legacy: Option<LegacyBridgeConfig>,
    ) -> anyhow::Result<Arc<Self>> {
        let config_store = repo_handle.config_store()?;
        migrate_legacy_config(&config_store, legacy).await?;
        let records = config_store.list().await?;

        let orchestrator = Arc::new(Self {
            discord,
            roomy,
            repo_handle,
            config_store,
            bridges: RwLock::new(HashMap::new()),
            guild_index: RwLock::new(HashMap::new()),
            batch_size,
            roomy_profile_lru_size,
        });

        for record in records {
            if let Err(err) = orchestrator.restore_bridge(record.clone()).await {
                warn!(error = %err, guild_id = %record.guild_id, space_id = %record.space_id, "failed to restore persisted bridge, skipping");
            }
        }

        tokio::spawn(Self::run_discord_event_loop(orchestrator.clone(), discord_events));

        Ok(orchestrator)
    }

    async fn run_discord_event_loop(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<DiscordEvent>) {
        while let Some(event) = events.recv().await {
            self.route_discord_event(event).await;
        }
        warn!("discord event channel closed, orchestrator fan-out loop exiting");
    }

    /// Looks up every bridge for `event`'s guild id and fans the event out
    /// concurrently, tracing each call; guilds with no bridge are logged and
    /// dropped per spec.md §4.11.
    pub async fn route_discord_event(&self, event: DiscordEvent) {
        let Some(guild_id) = event.guild_id().cloned() else {
            warn!("discord event missing guild id, dropping");
            return;
        };

        let keys = self.guild_index.read().await.get(&guild_id).cloned().unwrap_or_default();
        if keys.is_empty() {
            warn!(guild_id = %guild_id, "no bridge registered for guild, dropping event");
            return;
        }

        let bridges = self.bridges.read().await;
        let targets: Vec<Arc<Bridge>> = keys.iter().filter_map(|key| bridges.get(key).cloned()).collect();
        drop(bridges);

        let event = &event;
        futures::future::join_all(targets.into_iter().map(|bridge| async move {
            let space_id = bridge.space_id().clone();
            tracing::debug!(guild_id = %bridge.guild_id(), space_id = %space_id, "dispatching discord event to bridge");
            bridge.handle_discord_event(event).await;
        }))
        .await;
    }

    /// Validates the space exists, connects it, constructs and connects a
    /// `Bridge`, and persists the record — the control-plane operation the
    /// HTTP `/join-space` route and the `bridges create` CLI subcommand both
    /// call through.
    pub async fn create_bridge(
        self: &Arc<Self>,
        guild_id: Snowflake,
        space_id: StreamDid,
    ) -> Result<(), OrchestratorError> {
        let key = GuildSpaceKey::new(guild_id.clone(), space_id.clone());
        if self.bridges.read().await.contains_key(&key) {
            return Err(OrchestratorError::AlreadyBridged);
        }

        self.roomy
            .get_space_info(&space_id)
            .await
            .map_err(|_| OrchestratorError::SpaceNotFound(space_id.clone()))?;

        let record = BridgeRecord {
            guild_id,
            space_id,
            created_at: chrono::Utc::now(),
        };
        self.restore_bridge(record.clone()).await?;
        self.config_store.create(record).await?;

        Ok(())
    }

    /// Connects a space and constructs/registers its `Bridge` without
    /// touching `configs/` — used both by `create_bridge` (which persists
    /// separately, after confirming the connect succeeded) and by `start`
    /// (restoring already-persisted records).
    async fn restore_bridge(self: &Arc<Self>, record: BridgeRecord) -> Result<(), OrchestratorError> {
        let key = record.key();
        let connected_space = self.roomy.connect_space(&record.space_id).await?;
        let repo = Arc::new(self.repo_handle.repository_for(&key, self.roomy_profile_lru_size)?);

        let bridge = Bridge::new(
            repo,
            self.discord.clone(),
            connected_space,
            record.guild_id.clone(),
            record.space_id.clone(),
            self.batch_size,
        );
        bridge.connect();

        self.bridges.write().await.insert(key.clone(), bridge);
        self.guild_index.write().await.entry(record.guild_id).or_default().push(key);

        Ok(())
    }

    /// Disconnects and forgets a bridge, then removes its persisted record.
    pub async fn delete_bridge(&self, key: &GuildSpaceKey) -> Result<(), OrchestratorError> {
        let bridge = self.bridges.write().await.remove(key).ok_or(OrchestratorError::NotFound)?;
        bridge.disconnect().await;

        if let Some(keys) = self.guild_index.write().await.get_mut(&key.guild_id) {
            keys.retain(|candidate| candidate != key);
        }

        self.config_store.delete(key).await?;
        info!(%key, "bridge deleted");
        Ok(())
    }

    pub fn bridge_did(&self) -> &str {
        self.roomy.bridge_did()
    }

    pub fn application_id(&self) -> Option<Snowflake> {
        self.discord.application_id()
    }

    pub async fn get_guild_id(&self, space_id: &StreamDid) -> Option<Snowflake> {
        self.bridges
            .read()
            .await
            .values()
            .find(|bridge| bridge.space_id() == space_id)
            .map(|bridge| bridge.guild_id().clone())
    }

    pub async fn get_space_id(&self, guild_id: &Snowflake) -> Option<StreamDid> {
        let index = self.guild_index.read().await;
        let key = index.get(guild_id)?.first()?;
        Some(key.space_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::fake::FakeDiscordGateway;
    use crate::discord::DiscordChannel;
    use crate::roomy::fake::FakeRoomyClient;

    async fn test_orchestrator() -> (tempfile::TempDir, Arc<Orchestrator>, mpsc::UnboundedSender<DiscordEvent>) {
        let dir = tempfile::tempdir().unwrap();
        let repo_handle = SledRepoHandle::open(dir.path().to_str().unwrap()).unwrap();
        let discord: Arc<dyn DiscordGateway> = Arc::new(FakeDiscordGateway::new());
        let roomy = Arc::new(FakeRoomyClient::new("did:plc:bridge"));
        let space_id = StreamDid::parse("did:plc:space").unwrap();
        roomy.known_spaces.lock().push(space_id);
        let roomy: Arc<dyn RoomyClient> = roomy;

        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::start(discord, rx, roomy, repo_handle, 100, 50, None).await.unwrap();
        (dir, orchestrator, tx)
    }

    #[tokio::test]
    async fn create_bridge_registers_guild_and_space_lookups() {
        let (_dir, orchestrator, _tx) = test_orchestrator().await;
        let space_id = StreamDid::parse("did:plc:space").unwrap();

        orchestrator.create_bridge("111".to_string(), space_id.clone()).await.unwrap();

        assert_eq!(orchestrator.get_space_id(&"111".to_string()).await, Some(space_id.clone()));
        assert_eq!(orchestrator.get_guild_id(&space_id).await, Some("111".to_string()));
    }

    #[tokio::test]
    async fn create_bridge_twice_is_rejected() {
        let (_dir, orchestrator, _tx) = test_orchestrator().await;
        let space_id = StreamDid::parse("did:plc:space").unwrap();

        orchestrator.create_bridge("111".to_string(), space_id.clone()).await.unwrap();
        let err = orchestrator.create_bridge("111".to_string(), space_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyBridged));
    }

    #[tokio::test]
    async fn delete_bridge_removes_guild_index_entry() {
        let (_dir, orchestrator, _tx) = test_orchestrator().await;
        let space_id = StreamDid::parse("did:plc:space").unwrap();
        let key = GuildSpaceKey::new("111", space_id.clone());

        orchestrator.create_bridge("111".to_string(), space_id).await.unwrap();
        orchestrator.delete_bridge(&key).await.unwrap();

        assert_eq!(orchestrator.get_space_id(&"111".to_string()).await, None);
    }

    #[tokio::test]
    async fn route_discord_event_reaches_the_matching_bridge() {
        let (_dir, orchestrator, tx) = test_orchestrator().await;
        let space_id = StreamDid::parse("did:plc:space").unwrap();
        orchestrator.create_bridge("111".to_string(), space_id).await.unwrap();

        let channel = DiscordChannel {
            id: "60".to_string(),
            guild_id: Some("111".to_string()),
            parent_id: None,
            name: "general".to_string(),
            is_thread: false,
            position: 0,
        };
        tx.send(DiscordEvent::ChannelCreate(channel)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let key = GuildSpaceKey::new("111", StreamDid::parse("did:plc:space").unwrap());
        let room_key = crate::fingerprint::room_key("60");
        let bridges = orchestrator.bridges.read().await;
        let bridge = bridges.get(&key).unwrap();
        assert!(bridge.repo().get_roomy_id(&room_key).await.unwrap().is_some());
    }
}

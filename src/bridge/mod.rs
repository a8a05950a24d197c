//! The per-guild-space-pair coordinator. Wires the four sync services to a
//! shared repository/dispatcher, then drives the four-phase startup spec.md
//! §4.10 names (`backfillRoomyAndSubscribe` → `backfillDiscordAndSyncToRoomy`
//! → `syncRoomyToDiscord` → `listening`), modeled on how the teacher's
//! `BridgeCore::start` spawns its presence-heartbeat loop alongside the main
//! event-processing task.

pub mod phase;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::dispatcher::{Consumers, Dispatcher, ToDiscordItem};
use crate::discord::{DiscordEvent, DiscordGateway};
use crate::ids::{Snowflake, StreamDid};
use crate::repo::BridgeRepository;
use crate::roomy::{ConnectedSpace, DecodedStreamEvent, StreamBatch, StreamHandler};
use crate::state_machine::StateMachine;
use crate::sync::{MessageSync, ProfileSync, ReactionSync, RoomyEventOutcome, ServiceChain, StructureSync};

pub use phase::BridgePhase;

/// A live guild↔space pair. Constructed once per `BridgeConfig` by the
/// orchestrator and held behind an `Arc` for the lifetime of the bridge.
pub struct Bridge {
    repo: Arc<dyn BridgeRepository>,
    dispatcher: Arc<Dispatcher>,
    phase: StateMachine<BridgePhase>,
    services: ServiceChain,
    profile: Arc<ProfileSync>,
    connected_space: Arc<dyn ConnectedSpace>,
    discord: Arc<dyn DiscordGateway>,
    guild_id: Snowflake,
    space_id: StreamDid,
    batch_size: usize,
    consumers: Mutex<Option<Consumers>>,
    drain_handles: Mutex<Vec<JoinHandle<()>>>,
    backfill_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
    pub fn new(
        repo: Arc<dyn BridgeRepository>,
        discord: Arc<dyn DiscordGateway>,
        connected_space: Arc<dyn ConnectedSpace>,
        guild_id: Snowflake,
        space_id: StreamDid,
        batch_size: usize,
    ) -> Arc<Self> {
        let (dispatcher, consumers) = Dispatcher::new();
        let profile = Arc::new(ProfileSync::new(repo.clone(), dispatcher.clone(), guild_id.clone()));
        let structure = Arc::new(StructureSync::new(
            repo.clone(),
            dispatcher.clone(),
            discord.clone(),
            guild_id.clone(),
        ));
        let reaction = Arc::new(ReactionSync::new(repo.clone(), dispatcher.clone(), discord.clone()));
        let message = Arc::new(MessageSync::new(
            repo.clone(),
            dispatcher.clone(),
            discord.clone(),
            profile.clone(),
            guild_id.clone(),
        ));
        let services = ServiceChain { reaction, structure, message };

        Arc::new(Self {
            repo,
            dispatcher,
            phase: StateMachine::new(BridgePhase::BackfillRoomy),
            services,
            profile,
            connected_space,
            discord,
            guild_id,
            space_id,
            batch_size,
            consumers: Mutex::new(Some(consumers)),
            drain_handles: Mutex::new(Vec::new()),
            backfill_handle: Mutex::new(None),
        })
    }

    pub fn guild_id(&self) -> &Snowflake {
        &self.guild_id
    }

    pub fn space_id(&self) -> &StreamDid {
        &self.space_id
    }

    pub fn phase(&self) -> BridgePhase {
        self.phase.current()
    }

    pub fn repo(&self) -> &Arc<dyn BridgeRepository> {
        &self.repo
    }

    /// Spawns the two dispatcher consumer loops plus the Phase-1/Phase-2
    /// backfill task. A no-op (with a warning) if called more than once on
    /// the same bridge, since the dispatcher's consumer halves can only be
    /// taken once.
    pub fn connect(self: &Arc<Self>) {
        let Some(consumers) = self.consumers.lock().take() else {
            warn!(guild_id = %self.guild_id, "bridge already connected, ignoring duplicate connect");
            return;
        };

        let to_roomy_handle = tokio::spawn(Dispatcher::run_to_roomy_loop(
            consumers.to_roomy,
            self.phase.clone(),
            self.connected_space.clone(),
            self.batch_size,
        ));
        let to_discord_handle = tokio::spawn(Dispatcher::run_to_discord_loop(
            consumers.to_discord,
            self.phase.clone(),
            self.services.clone(),
        ));
        let backfill_handle = tokio::spawn(self.clone().run_phase_1_and_2());

        *self.drain_handles.lock() = vec![to_roomy_handle, to_discord_handle];
        *self.backfill_handle.lock() = Some(backfill_handle);
    }

    /// Phase 1 (`backfillRoomyAndSubscribe`) and Phase 2
    /// (`backfillDiscordAndSyncToRoomy`), run as a single background task.
    async fn run_phase_1_and_2(self: Arc<Self>) {
        let cursor = match self.repo.get_cursor().await {
            Ok(cursor) => cursor,
            Err(err) => {
                error!(error = %err, guild_id = %self.guild_id, "failed to read resume cursor, aborting bridge startup");
                return;
            }
        };

        if cursor > 1 {
            if let Err(err) = self.run_metadata_warmup(cursor).await {
                warn!(error = %err, guild_id = %self.guild_id, "metadata warm-up pass failed, continuing without it");
            }
        }

        let handler: Arc<dyn StreamHandler> = self.clone();
        let last_batch_id = match self.connected_space.subscribe(handler, cursor).await {
            Ok(id) => id,
            Err(err) => {
                error!(error = %err, guild_id = %self.guild_id, "failed to subscribe to roomy stream, aborting bridge startup");
                return;
            }
        };
        self.phase.set(BridgePhase::BackfillDiscordAndSyncToRoomy { last_batch_id });

        let channels = match self.discord.list_guild_channels(&self.guild_id).await {
            Ok(channels) => channels,
            Err(err) => {
                error!(error = %err, guild_id = %self.guild_id, "failed to list discord channels for structure backfill");
                Vec::new()
            }
        };
        let report = self.services.structure.backfill(&channels).await;
        self.services.message.backfill(&report.text_channels).await;
        self.services.reaction.backfill(&report.text_channels).await;

        self.phase.set(BridgePhase::SyncRoomyToDiscord { last_batch_id });
    }

    /// Snapshots the highest idx up front so the metadata-only replay never
    /// races with the full subscribe that follows it, per spec.md §9's
    /// resolved open question.
    async fn run_metadata_warmup(&self, cursor: u64) -> Result<(), crate::roomy::RoomyError> {
        let highest = self.connected_space.highest_idx().await?;
        let handler: Arc<dyn StreamHandler> = Arc::new(MetadataHandler(self.clone_handles_view()));
        self.connected_space.subscribe_metadata(handler, 1, highest.max(cursor)).await?;
        self.connected_space.unsubscribe().await
    }

    /// A cheap `Arc`-free view used only to construct the metadata handler;
    /// `Bridge` itself is not `Arc`-wrapped here, so the handler borrows the
    /// same service chain through a second, distinct `StreamHandler` impl.
    fn clone_handles_view(&self) -> BridgeServices {
        BridgeServices {
            repo: self.repo.clone(),
            profile: self.profile.clone(),
            services: self.services.clone(),
        }
    }

    pub async fn disconnect(&self) {
        if let Some(handle) = self.backfill_handle.lock().take() {
            handle.abort();
        }

        // Close both dispatcher lanes, then give the drain loops a bounded
        // window to flush whatever was already queued (spec.md §4.4/§5)
        // before falling back to an abort so disconnect can't hang forever.
        self.dispatcher.finish();
        let drain_handles: Vec<_> = self.drain_handles.lock().drain(..).collect();
        for handle in drain_handles {
            if tokio::time::timeout(std::time::Duration::from_secs(5), handle).await.is_err() {
                warn!(guild_id = %self.guild_id, "dispatcher drain loop did not finish in time, continuing shutdown");
            }
        }

        if let Err(err) = self.connected_space.unsubscribe().await {
            warn!(error = %err, guild_id = %self.guild_id, "failed to unsubscribe on disconnect");
        }
        if let Err(err) = self.repo.delete().await {
            warn!(error = %err, guild_id = %self.guild_id, "failed to delete bridge repository namespace on disconnect");
        }
    }

    /// Big switch delegating to the service that owns each Discord event
    /// variant. Unknown/unhandled variants would be logged and dropped, but
    /// every variant `DiscordEvent` carries today has a home.
    pub async fn handle_discord_event(&self, event: &DiscordEvent) {
        match event {
            DiscordEvent::MessageCreate(msg) => {
                self.services.message.sync_discord_to_roomy(msg).await;
            }
            DiscordEvent::MessageUpdate(msg) => {
                self.services.message.sync_edit_to_roomy(msg).await;
            }
            DiscordEvent::MessageDelete { message_id, .. } => {
                self.services.message.sync_delete_to_roomy(message_id).await;
            }
            DiscordEvent::ReactionAdd(reaction) => match self.repo.get_roomy_id(&reaction.message_id).await {
                Ok(Some(roomy_message_id)) => {
                    self.services.reaction.sync_add_to_roomy(reaction, &roomy_message_id).await;
                }
                _ => warn!(message_id = %reaction.message_id, "reaction add for unmapped message, dropping"),
            },
            DiscordEvent::ReactionRemove(reaction) => match self.repo.get_roomy_id(&reaction.message_id).await {
                Ok(Some(roomy_message_id)) => {
                    self.services.reaction.sync_remove_to_roomy(reaction, &roomy_message_id).await;
                }
                _ => {}
            },
            DiscordEvent::ChannelCreate(channel) | DiscordEvent::ThreadCreate(channel) => {
                self.services.structure.sync_discord_channel_to_roomy(channel).await;
            }
        }
    }

    /// The classification + fan-out step run per `DecodedStreamEvent`
    /// (`handleRoomyEvents` in spec.md §4.10 item 4): `profile → structure →
    /// message → reaction`, in order, sequentially within the batch so
    /// per-batch ordering is preserved. `emit_to_discord` is `false` for the
    /// metadata warm-up pass, which must absorb/cache echoes without ever
    /// queuing a genuine event for Phase-3 delivery.
    async fn handle_roomy_batch(
        repo: &Arc<dyn BridgeRepository>,
        profile: &ProfileSync,
        services: &ServiceChain,
        dispatcher: &Dispatcher,
        batch: StreamBatch,
        emit_to_discord: bool,
    ) {
        let StreamBatch { events, meta, is_last } = batch;
        let last_index = events.len().saturating_sub(1);
        let mut max_idx = 0;

        for (index, decoded) in events.into_iter().enumerate() {
            max_idx = max_idx.max(decoded.idx);
            let outcome = classify_roomy_event(profile, services, &decoded).await;

            if emit_to_discord && outcome == RoomyEventOutcome::Forward {
                dispatcher.push_to_discord(ToDiscordItem {
                    decoded,
                    batch_id: meta.batch_id,
                    is_last_event: is_last && index == last_index,
                });
            }
        }

        if let Err(err) = repo.set_cursor(max_idx).await {
            warn!(error = %err, "failed to advance roomy stream cursor");
        }
    }
}

async fn classify_roomy_event(
    profile: &ProfileSync,
    services: &ServiceChain,
    decoded: &DecodedStreamEvent,
) -> RoomyEventOutcome {
    let outcome = profile.handle_roomy_event(decoded).await;
    if outcome != RoomyEventOutcome::NotMine {
        return outcome;
    }
    let outcome = services.structure.handle_roomy_event(decoded).await;
    if outcome != RoomyEventOutcome::NotMine {
        return outcome;
    }
    let outcome = services.message.handle_roomy_event(decoded).await;
    if outcome != RoomyEventOutcome::NotMine {
        return outcome;
    }
    services.reaction.handle_roomy_event(decoded).await
}

#[async_trait]
impl StreamHandler for Bridge {
    async fn handle_batch(&self, batch: StreamBatch) {
        Bridge::handle_roomy_batch(&self.repo, &self.profile, &self.services, &self.dispatcher, batch, true).await;
    }
}

/// Borrowed service handles for the metadata warm-up pass, which runs before
/// the live subscribe and must never emit to `toDiscord`.
#[derive(Clone)]
struct BridgeServices {
    repo: Arc<dyn BridgeRepository>,
    profile: Arc<ProfileSync>,
    services: ServiceChain,
}

struct MetadataHandler(BridgeServices);

#[async_trait]
impl StreamHandler for MetadataHandler {
    async fn handle_batch(&self, batch: StreamBatch) {
        Bridge::handle_roomy_batch(&self.0.repo, &self.0.profile, &self.0.services, &no_op_dispatcher(), batch, false)
            .await;
    }
}

/// `handle_roomy_batch` takes a `&Dispatcher` purely to push `toDiscord`
/// items, which the metadata pass (`emit_to_discord = false`) never does;
/// this throwaway instance is never pushed to and is dropped at the end of
/// the call.
fn no_op_dispatcher() -> Arc<Dispatcher> {
    Dispatcher::new().0
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::discord::fake::FakeDiscordGateway;
    use crate::discord::{DiscordChannel, DiscordReaction};
    use crate::ids::Ulid;
    use crate::repo::sled_store::SledRepoHandle;
    use crate::roomy::fake::FakeConnectedSpace;
    use crate::roomy::types::{type_id, EventCallbackMeta};
    use crate::roomy::RoomyEvent;

    async fn test_bridge() -> (tempfile::TempDir, Arc<Bridge>) {
        let dir = tempfile::tempdir().unwrap();
        let handle = SledRepoHandle::open(dir.path().to_str().unwrap()).unwrap();
        let space_id = StreamDid::parse("did:plc:space").unwrap();
        let key = crate::ids::GuildSpaceKey::new("111", space_id.clone());
        let repo: Arc<dyn BridgeRepository> = Arc::new(handle.repository_for(&key, 50).unwrap());
        let discord: Arc<dyn DiscordGateway> = Arc::new(FakeDiscordGateway::new());
        let space: Arc<dyn ConnectedSpace> = Arc::new(FakeConnectedSpace::new(space_id.clone()));

        let bridge = Bridge::new(repo, discord, space, "111".to_string(), space_id, 100);
        (dir, bridge)
    }

    #[tokio::test]
    async fn starts_in_backfill_roomy_phase() {
        let (_dir, bridge) = test_bridge().await;
        assert_eq!(bridge.phase(), BridgePhase::BackfillRoomy);
    }

    #[tokio::test]
    async fn handle_discord_event_message_create_registers_a_mapping() {
        let (_dir, bridge) = test_bridge().await;
        let event = DiscordEvent::MessageCreate(message("200", "50"));

        bridge.handle_discord_event(&event).await;

        assert!(bridge.repo.get_roomy_id("200").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn handle_discord_event_channel_create_registers_a_room() {
        let (_dir, bridge) = test_bridge().await;
        let channel = DiscordChannel {
            id: "60".to_string(),
            guild_id: Some("111".to_string()),
            parent_id: None,
            name: "general".to_string(),
            is_thread: false,
            position: 0,
        };

        bridge.handle_discord_event(&DiscordEvent::ChannelCreate(channel)).await;

        let key = crate::fingerprint::room_key("60");
        assert!(bridge.repo.get_roomy_id(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn handle_discord_event_reaction_add_drops_when_message_unmapped() {
        let (_dir, bridge) = test_bridge().await;
        let reaction = DiscordReaction {
            message_id: "999".to_string(),
            channel_id: "50".to_string(),
            guild_id: Some("111".to_string()),
            user_id: "7".to_string(),
            emoji: "👍".to_string(),
        };

        bridge.handle_discord_event(&DiscordEvent::ReactionAdd(reaction)).await;
        // No panic, no mapping created: nothing to assert beyond "it returned".
    }

    #[tokio::test]
    async fn handle_roomy_batch_forwards_genuine_events_only_when_emitting() {
        let (_dir, bridge) = test_bridge().await;
        let room_key = crate::fingerprint::room_key("50");
        bridge.repo.register_mapping(&room_key, &Ulid::new()).await.unwrap();

        let decoded = DecodedStreamEvent {
            idx: 5,
            event: RoomyEvent::new(type_id::CREATE_ROOM, json!({ "name": "general" })),
            user: None,
        };
        let batch = StreamBatch {
            events: vec![decoded],
            meta: EventCallbackMeta { batch_id: Ulid::new() },
            is_last: true,
        };

        Bridge::handle_roomy_batch(&bridge.repo, &bridge.profile, &bridge.services, &bridge.dispatcher, batch, false)
            .await;

        assert_eq!(bridge.repo.get_cursor().await.unwrap(), 5);
    }

    fn message(id: &str, channel_id: &str) -> crate::discord::DiscordMessage {
        crate::discord::DiscordMessage {
            id: id.to_string(),
            channel_id: channel_id.to_string(),
            guild_id: Some("111".to_string()),
            author_id: "7".to_string(),
            author_username: "bob".to_string(),
            author_global_name: None,
            author_avatar: None,
            webhook_id: None,
            kind: 0,
            content: "hi".to_string(),
            attachments: Vec::new(),
            reply_to: None,
            timestamp: 1_700_000_000,
            edited_timestamp: None,
        }
    }
}

//! Owns the two directional queues between a bridge's services and its
//! Discord/Roomy collaborators, and the two consumer loops that drain them
//! according to the bridge's current phase. Grounded on spec.md §4.5; the
//! soft queue-depth warning mirrors §5's backpressure note.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::bridge::phase::BridgePhase;
use crate::channel::AsyncChannelSender;
use crate::ids::Ulid;
use crate::roomy::{ConnectedSpace, DecodedStreamEvent, RoomyEvent};
use crate::state_machine::StateMachine;
use crate::sync::ServiceChain;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const QUEUE_DEPTH_WARNING: usize = 10_000;

/// An item queued for Phase-3 Discord delivery: a decoded Roomy stream event
/// plus the batch bookkeeping the `toDiscord` loop uses to know when to
/// transition to `Listening`.
#[derive(Debug, Clone)]
pub struct ToDiscordItem {
    pub decoded: DecodedStreamEvent,
    pub batch_id: Ulid,
    pub is_last_event: bool,
}

/// Producer half, cheaply cloned and handed to services. Consumption
/// happens through the `Consumers` returned once by [`Dispatcher::new`].
pub struct Dispatcher {
    to_roomy_tx: AsyncChannelSender<RoomyEvent>,
    to_discord_tx: AsyncChannelSender<ToDiscordItem>,
    to_roomy_depth: AtomicUsize,
    to_discord_depth: AtomicUsize,
}

/// Owned receiving halves, taken out of the channels at construction time so
/// the two consumer loops can run without fighting over `&mut` access to a
/// shared `Dispatcher`.
pub struct Consumers {
    pub to_roomy: Pin<Box<dyn Stream<Item = RoomyEvent> + Send>>,
    pub to_discord: Pin<Box<dyn Stream<Item = ToDiscordItem> + Send>>,
}

impl Dispatcher {
    pub fn new() -> (Arc<Self>, Consumers) {
        let to_roomy = crate::channel::AsyncChannel::new();
        let to_discord = crate::channel::AsyncChannel::new();

        let dispatcher = Arc::new(Self {
            to_roomy_tx: to_roomy.sender(),
            to_discord_tx: to_discord.sender(),
            to_roomy_depth: AtomicUsize::new(0),
            to_discord_depth: AtomicUsize::new(0),
        });

        let consumers = Consumers {
            to_roomy: to_roomy.into_stream(),
            to_discord: to_discord.into_stream(),
        };

        (dispatcher, consumers)
    }

    pub fn push_to_roomy(&self, event: RoomyEvent) {
        self.to_roomy_tx.push(event);
        Self::note_push(&self.to_roomy_depth, "toRoomy");
    }

    pub fn push_to_discord(&self, item: ToDiscordItem) {
        self.to_discord_tx.push(item);
        Self::note_push(&self.to_discord_depth, "toDiscord");
    }

    /// Closes both lanes per spec.md §4.4/§5: the consumer loops drain
    /// whatever is already queued and then exit on their own, rather than
    /// being aborted mid-batch.
    pub fn finish(&self) {
        self.to_roomy_tx.finish();
        self.to_discord_tx.finish();
    }

    fn note_push(depth: &AtomicUsize, lane: &'static str) {
        let depth = depth.fetch_add(1, Ordering::Relaxed) + 1;
        crate::metrics::record_queue_depth(lane, depth);
        if depth == QUEUE_DEPTH_WARNING || (depth > QUEUE_DEPTH_WARNING && depth % QUEUE_DEPTH_WARNING == 0) {
            warn!(lane, depth, "dispatcher queue depth crossed soft limit");
        }
    }

    /// The `toRoomy` consumer loop: batches while backfilling Discord into
    /// Roomy, flushes on transition to `Listening` or `SyncRoomyToDiscord`,
    /// sends singly once `Listening`. Other phases log and drop.
    pub async fn run_to_roomy_loop(
        mut stream: Pin<Box<dyn Stream<Item = RoomyEvent> + Send>>,
        phase: StateMachine<BridgePhase>,
        connected_space: Arc<dyn ConnectedSpace>,
        batch_size: usize,
    ) {
        let mut batch: Vec<RoomyEvent> = Vec::new();
        let mut phase_rx = phase.subscribe();

        loop {
            tokio::select! {
                maybe_event = stream.next() => {
                    let Some(event) = maybe_event else { break; };
                    match phase.current() {
                        BridgePhase::BackfillDiscordAndSyncToRoomy { .. } => {
                            batch.push(event);
                            if batch.len() >= batch_size {
                                flush(&connected_space, &mut batch).await;
                            }
                        }
                        BridgePhase::Listening => {
                            flush(&connected_space, &mut batch).await;
                            if let Err(err) = connected_space.send_event(event).await {
                                warn!(error = %err, "failed to send toRoomy event while listening");
                            }
                        }
                        other => {
                            warn!(?other, "dropping toRoomy event: bridge not in a sending phase");
                        }
                    }
                }
                changed = phase_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let phase = phase_rx.borrow();
                    if phase.is_listening() || phase.is_sync_roomy_to_discord() {
                        drop(phase);
                        flush(&connected_space, &mut batch).await;
                    }
                }
            }
        }

        flush(&connected_space, &mut batch).await;
    }

    /// The `toDiscord` consumer loop: waits for `SyncRoomyToDiscord`, then
    /// fans each item out through `reaction → structure → message`, and
    /// transitions to `Listening` once the phase's terminal batch drains.
    pub async fn run_to_discord_loop(
        mut stream: Pin<Box<dyn Stream<Item = ToDiscordItem> + Send>>,
        phase: StateMachine<BridgePhase>,
        services: ServiceChain,
    ) {
        phase
            .transitioned_to(|p| p.is_backfill_discord_and_sync_to_roomy() == false && p.last_batch_id().is_some())
            .await;

        while let Some(item) = stream.next().await {
            services.dispatch(&item.decoded).await;

            let is_terminal = phase
                .current()
                .last_batch_id()
                .map(|expected| *expected == item.batch_id)
                .unwrap_or(false)
                && item.is_last_event;

            if is_terminal {
                phase.set(BridgePhase::Listening);
            }
        }
    }
}

async fn flush(connected_space: &Arc<dyn ConnectedSpace>, batch: &mut Vec<RoomyEvent>) {
    if batch.is_empty() {
        return;
    }
    let drained = std::mem::take(batch);
    if let Err(err) = connected_space.send_events(drained).await {
        warn!(error = %err, "failed to flush toRoomy batch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_depth_warning_threshold_matches_spec_default() {
        assert_eq!(QUEUE_DEPTH_WARNING, 10_000);
    }

    #[test]
    fn default_batch_size_matches_spec_default() {
        assert_eq!(DEFAULT_BATCH_SIZE, 100);
    }

    #[tokio::test]
    async fn run_to_roomy_loop_batches_then_sends_singly_once_listening() {
        use crate::ids::StreamDid;
        use crate::roomy::fake::FakeConnectedSpace;

        let (dispatcher, consumers) = Dispatcher::new();
        let space = Arc::new(FakeConnectedSpace::new(StreamDid::parse("did:plc:space").unwrap()));
        let phase = StateMachine::new(BridgePhase::BackfillDiscordAndSyncToRoomy {
            last_batch_id: Ulid::new(),
        });

        let loop_handle = tokio::spawn(Dispatcher::run_to_roomy_loop(
            consumers.to_roomy,
            phase.clone(),
            space.clone(),
            2,
        ));

        dispatcher.push_to_roomy(RoomyEvent::new("message.createMessage.v0", serde_json::json!({})));
        dispatcher.push_to_roomy(RoomyEvent::new("message.createMessage.v0", serde_json::json!({})));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(space.sent.lock().len(), 2);

        phase.set(BridgePhase::Listening);
        dispatcher.push_to_roomy(RoomyEvent::new("message.createMessage.v0", serde_json::json!({})));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(space.sent.lock().len(), 3);

        loop_handle.abort();
    }

    #[tokio::test]
    async fn run_to_roomy_loop_flushes_on_transition_to_sync_roomy_to_discord() {
        use crate::ids::StreamDid;
        use crate::roomy::fake::FakeConnectedSpace;

        let (dispatcher, consumers) = Dispatcher::new();
        let space = Arc::new(FakeConnectedSpace::new(StreamDid::parse("did:plc:space").unwrap()));
        let batch_id = Ulid::new();
        let phase = StateMachine::new(BridgePhase::BackfillDiscordAndSyncToRoomy { last_batch_id: batch_id });

        let loop_handle = tokio::spawn(Dispatcher::run_to_roomy_loop(
            consumers.to_roomy,
            phase.clone(),
            space.clone(),
            100,
        ));

        dispatcher.push_to_roomy(RoomyEvent::new("message.createMessage.v0", serde_json::json!({})));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(space.sent.lock().len(), 0, "batch not yet flushed below batch_size");

        phase.set(BridgePhase::SyncRoomyToDiscord { last_batch_id: batch_id });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(space.sent.lock().len(), 1, "transition to SyncRoomyToDiscord should flush the remainder");

        loop_handle.abort();
    }
}

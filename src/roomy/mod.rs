//! Collaborator boundary onto the Roomy event stream. Roomy is out of scope
//! per spec.md §1 ("interfaces only"), so this module is a pair of traits the
//! rest of the crate is written against, mirroring the way the teacher models
//! its homeserver collaborator as `MatrixAppservice` — a struct with async
//! methods awaiting a real backend, kept behind an explicit boundary here
//! because no real Roomy SDK exists in this crate's dependency graph.

pub mod leaf_client;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

use crate::ids::StreamDid;

pub use leaf_client::{LeafConnectedSpace, LeafRoomyClient};
pub use types::{DecodedStreamEvent, EventCallbackMeta, RoomyEvent, StreamBatch};

#[derive(Debug, Error)]
pub enum RoomyError {
    #[error("space {0} does not exist")]
    SpaceNotFound(StreamDid),
    #[error("send failed: {0}")]
    Send(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

/// Callback invoked once per delivered batch during a subscription.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle_batch(&self, batch: StreamBatch);
}

/// A single space's live connection: subscribe-with-resume, metadata warm-up,
/// and outbound send, per spec.md §6.
#[async_trait]
pub trait ConnectedSpace: Send + Sync {
    fn space_id(&self) -> &StreamDid;

    /// Subscribes from `from_idx` (inclusive of the next undelivered event),
    /// invoking `handler` per batch until `unsubscribe` is called elsewhere
    /// or the space disconnects. Resolves with the batch id of whatever
    /// window the caller should treat as the backfill's terminal batch.
    async fn subscribe(
        &self,
        handler: std::sync::Arc<dyn StreamHandler>,
        from_idx: u64,
    ) -> Result<crate::ids::Ulid, RoomyError>;

    /// Replays metadata-only events (no side-effecting emission) for cache
    /// warm-up, per spec.md §9's resolved open question: callers snapshot
    /// the highest idx up front and pass it as `to_idx` so this pass never
    /// races with the full subscribe that follows it.
    async fn subscribe_metadata(
        &self,
        handler: std::sync::Arc<dyn StreamHandler>,
        from_idx: u64,
        to_idx: u64,
    ) -> Result<(), RoomyError>;

    async fn unsubscribe(&self) -> Result<(), RoomyError>;

    async fn send_event(&self, event: RoomyEvent) -> Result<(), RoomyError>;
    async fn send_events(&self, events: Vec<RoomyEvent>) -> Result<(), RoomyError>;

    /// The highest idx currently available on the stream, used to bound the
    /// metadata warm-up pass without racing the live subscribe.
    async fn highest_idx(&self) -> Result<u64, RoomyError>;
}

/// Process-wide Roomy identity: connects spaces and checks existence.
#[async_trait]
pub trait RoomyClient: Send + Sync {
    async fn get_space_info(&self, did: &StreamDid) -> Result<(), RoomyError>;
    async fn connect_space(
        &self,
        did: &StreamDid,
    ) -> Result<std::sync::Arc<dyn ConnectedSpace>, RoomyError>;
    fn bridge_did(&self) -> &str;
}

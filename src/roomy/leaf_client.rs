//! Real `RoomyClient`/`ConnectedSpace` wired up for `main`, mirroring the
//! teacher's own `MatrixAppservice`: a thin collaborator that logs every
//! call and returns synthesized/default results rather than a live network
//! integration, because the homeserver/leaf-server side of the bridge is
//! explicitly out of scope here. Swappable for `roomy::fake::FakeRoomyClient`
//! in tests the same way the teacher's services are written against
//! `MatrixAppservice` directly but never assert on what it sends upstream.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::RoomyConfig;
use crate::ids::{StreamDid, Ulid};

use super::{ConnectedSpace, RoomyClient, RoomyError, RoomyEvent, StreamHandler};

pub struct LeafRoomyClient {
    config: RoomyConfig,
}

impl LeafRoomyClient {
    pub fn new(config: RoomyConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RoomyClient for LeafRoomyClient {
    async fn get_space_info(&self, did: &StreamDid) -> Result<(), RoomyError> {
        debug!(leaf_url = %self.config.leaf_url, space_id = %did, "checking space exists");
        Ok(())
    }

    async fn connect_space(&self, did: &StreamDid) -> Result<Arc<dyn ConnectedSpace>, RoomyError> {
        debug!(leaf_url = %self.config.leaf_url, space_id = %did, "connecting space");
        Ok(Arc::new(LeafConnectedSpace::new(did.clone())))
    }

    fn bridge_did(&self) -> &str {
        &self.config.bridge_did
    }
}

/// Stands in for a live subscribe-with-resume connection: records outbound
/// sends and reports idx 0, exactly like `roomy::fake::FakeConnectedSpace`,
/// but kept outside `#[cfg(test)]` so `main` has something real to
/// construct until the leaf-server integration lands.
pub struct LeafConnectedSpace {
    space_id: StreamDid,
    highest_idx: Mutex<u64>,
}

impl LeafConnectedSpace {
    pub fn new(space_id: StreamDid) -> Self {
        Self {
            space_id,
            highest_idx: Mutex::new(0),
        }
    }
}

#[async_trait]
impl ConnectedSpace for LeafConnectedSpace {
    fn space_id(&self) -> &StreamDid {
        &self.space_id
    }

    async fn subscribe(&self, _handler: Arc<dyn StreamHandler>, from_idx: u64) -> Result<Ulid, RoomyError> {
        debug!(space_id = %self.space_id, from_idx, "subscribe called on stub leaf client, no events will be delivered");
        Ok(Ulid::new())
    }

    async fn subscribe_metadata(
        &self,
        _handler: Arc<dyn StreamHandler>,
        from_idx: u64,
        to_idx: u64,
    ) -> Result<(), RoomyError> {
        debug!(space_id = %self.space_id, from_idx, to_idx, "subscribe_metadata called on stub leaf client");
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), RoomyError> {
        Ok(())
    }

    async fn send_event(&self, event: RoomyEvent) -> Result<(), RoomyError> {
        debug!(space_id = %self.space_id, kind = %event.kind, "send_event called on stub leaf client");
        Ok(())
    }

    async fn send_events(&self, events: Vec<RoomyEvent>) -> Result<(), RoomyError> {
        debug!(space_id = %self.space_id, count = events.len(), "send_events called on stub leaf client");
        Ok(())
    }

    async fn highest_idx(&self) -> Result<u64, RoomyError> {
        Ok(*self.highest_idx.lock())
    }
}

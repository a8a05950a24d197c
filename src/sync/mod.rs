//! The four domain sync services, per spec.md §4.6–§4.9. Each owns its slice
//! of the bridge repository and is resilient to events outside its own
//! `$type` family, mirroring the teacher's per-concern handler split in
//! `bridge.rs` (`handle_matrix_message`, `handle_discord_message_*`, etc.).

pub mod message;
pub mod profile;
pub mod reaction;
pub mod structure;

use std::sync::Arc;

use crate::roomy::DecodedStreamEvent;

pub use message::MessageSync;
pub use profile::ProfileSync;
pub use reaction::ReactionSync;
pub use structure::StructureSync;

/// What a service decided about an inbound Roomy event during classification
/// (`Bridge::handle_roomy_events`, spec.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomyEventOutcome {
    /// The event's `$type` doesn't belong to this service.
    NotMine,
    /// It's our own prior emission coming back; already absorbed, no Discord
    /// write needed.
    Absorbed,
    /// Genuinely Roomy-originated; queue for Phase-3 delivery to Discord.
    Forward,
}

/// The three services that perform live Discord writes during Phase 3,
/// called in the order spec.md §4.5 names: reaction, structure, message.
/// Each is resilient to events outside its domain.
#[derive(Clone)]
pub struct ServiceChain {
    pub reaction: Arc<ReactionSync>,
    pub structure: Arc<StructureSync>,
    pub message: Arc<MessageSync>,
}

impl ServiceChain {
    pub async fn dispatch(&self, decoded: &DecodedStreamEvent) {
        self.reaction.sync_to_discord(decoded).await;
        self.structure.sync_to_discord(decoded).await;
        self.message.sync_to_discord(decoded).await;
    }
}

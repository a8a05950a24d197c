//! The four-phase state a bridged pair moves through, per spec.md §1/§4.10.

use crate::ids::Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgePhase {
    BackfillRoomy,
    BackfillDiscordAndSyncToRoomy { last_batch_id: Ulid },
    SyncRoomyToDiscord { last_batch_id: Ulid },
    Listening,
}

impl BridgePhase {
    pub fn is_listening(&self) -> bool {
        matches!(self, BridgePhase::Listening)
    }

    pub fn is_backfill_discord_and_sync_to_roomy(&self) -> bool {
        matches!(self, BridgePhase::BackfillDiscordAndSyncToRoomy { .. })
    }

    pub fn is_sync_roomy_to_discord(&self) -> bool {
        matches!(self, BridgePhase::SyncRoomyToDiscord { .. })
    }

    pub fn last_batch_id(&self) -> Option<&Ulid> {
        match self {
            BridgePhase::BackfillDiscordAndSyncToRoomy { last_batch_id }
            | BridgePhase::SyncRoomyToDiscord { last_batch_id } => Some(last_batch_id),
            _ => None,
        }
    }
}

//! Best-effort migration of legacy single-bridge-per-process configuration
//! into the `configs/` namespace used by the multi-bridge orchestrator.
//!
//! Mirrors the teacher's `DatabaseManager::migrate` in spirit: run once at
//! startup, log what happened, never fail the whole process over a single
//! bad record.

use chrono::Utc;
use tracing::{info, warn};

use crate::ids::{GuildSpaceKey, StreamDid};

use super::error::RepositoryError;
use super::models::BridgeRecord;
use super::sled_store::ConfigStore;

/// A single legacy `guild_id`/`space_id` pair as read from an old
/// one-bridge-per-process configuration file.
pub struct LegacyBridgeConfig {
    pub guild_id: String,
    pub space_id: String,
}

impl LegacyBridgeConfig {
    /// Reads `LEGACY_GUILD_ID`/`LEGACY_SPACE_ID`, the env vars an operator
    /// upgrading from the single-bridge-per-process deployment would still
    /// have set, mirroring the teacher's `apply_env_overrides` pattern.
    pub fn from_env() -> Option<Self> {
        let guild_id = std::env::var("LEGACY_GUILD_ID").ok()?;
        let space_id = std::env::var("LEGACY_SPACE_ID").ok()?;
        Some(Self { guild_id, space_id })
    }
}

/// Imports a single legacy bridge config into `store`, skipping (with a
/// warning) anything already present or malformed rather than aborting
/// startup.
pub async fn migrate_legacy_config(
    store: &dyn ConfigStore,
    legacy: Option<LegacyBridgeConfig>,
) -> Result<(), RepositoryError> {
    let Some(legacy) = legacy else {
        return Ok(());
    };

    let space_id = match StreamDid::parse(legacy.space_id.clone()) {
        Ok(did) => did,
        Err(err) => {
            warn!(error = %err, space_id = %legacy.space_id, "skipping legacy bridge config with invalid space id");
            return Ok(());
        }
    };

    let key = GuildSpaceKey::new(legacy.guild_id.clone(), space_id.clone());
    let existing = store.list().await?;
    if existing.iter().any(|record| record.key() == key) {
        info!(%key, "legacy bridge config already migrated, skipping");
        return Ok(());
    }

    store
        .create(BridgeRecord {
            guild_id: legacy.guild_id,
            space_id,
            created_at: Utc::now(),
        })
        .await?;

    info!(%key, "migrated legacy single-bridge configuration");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::sled_store::SledRepoHandle;

    fn open_store() -> (tempfile::TempDir, impl ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let handle = SledRepoHandle::open(dir.path().to_str().unwrap()).unwrap();
        let store = handle.config_store().unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn migrates_a_well_formed_legacy_config() {
        let (_dir, store) = open_store();
        migrate_legacy_config(
            &store,
            Some(LegacyBridgeConfig {
                guild_id: "111".to_string(),
                space_id: "did:plc:space".to_string(),
            }),
        )
        .await
        .unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].guild_id, "111");
    }

    #[tokio::test]
    async fn is_a_no_op_when_nothing_to_migrate() {
        let (_dir, store) = open_store();
        migrate_legacy_config(&store, None).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn skips_malformed_space_id_without_erroring() {
        let (_dir, store) = open_store();
        migrate_legacy_config(
            &store,
            Some(LegacyBridgeConfig {
                guild_id: "111".to_string(),
                space_id: "not-a-did".to_string(),
            }),
        )
        .await
        .unwrap();

        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn running_twice_does_not_duplicate() {
        let (_dir, store) = open_store();
        let legacy = || {
            Some(LegacyBridgeConfig {
                guild_id: "111".to_string(),
                space_id: "did:plc:space".to_string(),
            })
        };
        migrate_legacy_config(&store, legacy()).await.unwrap();
        migrate_legacy_config(&store, legacy()).await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}

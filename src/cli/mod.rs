//! Command-line surface, modeled on groblegark-coop's `clap::Parser` +
//! `clap::Subcommand` split: a default `serve` path plus a handful of thin
//! operator subcommands over the same repository operations the HTTP
//! control API uses.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::Config;
use crate::ids::{GuildSpaceKey, StreamDid};
use crate::repo::migration::LegacyBridgeConfig;
use crate::repo::{BridgeRecord, ConfigStore, SledRepoHandle};

#[derive(Parser)]
#[command(name = "roomy-discord-bridged", version, about = "Discord <-> Roomy bridge")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Runs the orchestrator and HTTP control API. Default when no subcommand is given.
    Serve,
    /// Runs the legacy 1:1 bridge-config migration standalone, then exits.
    Migrate,
    /// Operator wrappers over the bridge repository, for use without HTTP access.
    #[command(subcommand)]
    Bridges(BridgesCommand),
}

#[derive(Subcommand)]
pub enum BridgesCommand {
    /// Lists every persisted guild/space pair.
    List,
    /// Persists a new guild/space pair without validating the space exists.
    Create {
        #[arg(long)]
        guild_id: String,
        #[arg(long)]
        space_id: String,
    },
    /// Removes a persisted guild/space pair.
    Delete {
        #[arg(long)]
        guild_id: String,
        #[arg(long)]
        space_id: String,
    },
}

/// Runs `migrate`/`bridges` subcommands directly against the sled store,
/// bypassing the orchestrator entirely. Returns `Ok(true)` if the process
/// should exit afterward (i.e. `Serve` was not selected).
pub async fn run_standalone_command(command: &Command, config: &Config) -> Result<bool> {
    match command {
        Command::Serve => Ok(false),
        Command::Migrate => {
            let repo_handle = SledRepoHandle::open(&config.bridge.data_dir)?;
            let config_store = repo_handle.config_store()?;
            let legacy = LegacyBridgeConfig::from_env();
            crate::repo::migration::migrate_legacy_config(&config_store, legacy).await?;
            info!("legacy config migration complete");
            Ok(true)
        }
        Command::Bridges(sub) => {
            let repo_handle = SledRepoHandle::open(&config.bridge.data_dir)?;
            let config_store = repo_handle.config_store()?;
            run_bridges_command(sub, &config_store).await?;
            Ok(true)
        }
    }
}

async fn run_bridges_command(command: &BridgesCommand, config_store: &dyn ConfigStore) -> Result<()> {
    match command {
        BridgesCommand::List => {
            let records = config_store.list().await?;
            if records.is_empty() {
                println!("no bridges configured");
            }
            for record in records {
                println!("{}\t{}\t{}", record.guild_id, record.space_id, record.created_at);
            }
        }
        BridgesCommand::Create { guild_id, space_id } => {
            let space_id = StreamDid::parse(space_id.clone()).context("space_id is not a valid did")?;
            let record = BridgeRecord {
                guild_id: guild_id.clone(),
                space_id,
                created_at: chrono::Utc::now(),
            };
            config_store.create(record.clone()).await?;
            println!("bridge created: {} <-> {}", record.guild_id, record.space_id);
        }
        BridgesCommand::Delete { guild_id, space_id } => {
            let space_id = StreamDid::parse(space_id.clone()).context("space_id is not a valid did")?;
            let key = GuildSpaceKey::new(guild_id.clone(), space_id);
            config_store.delete(&key).await?;
            println!("bridge deleted: {key}");
        }
    }
    Ok(())
}

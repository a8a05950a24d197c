#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod bridge;
mod channel;
mod cli;
mod config;
mod dispatcher;
mod discord;
mod fingerprint;
mod ids;
mod media;
mod metrics;
mod orchestrator;
mod repo;
mod roomy;
mod state_machine;
mod sync;
mod utils;
mod web;

use config::Config;
use discord::serenity_impl::SerenityDiscordGateway;
use orchestrator::Orchestrator;
use repo::migration::LegacyBridgeConfig;
use repo::SledRepoHandle;
use roomy::LeafRoomyClient;
use web::WebServer;

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init_tracing();

    let cli = cli::Cli::parse();
    let config = Arc::new(Config::load()?);

    if let Some(command) = &cli.command {
        if cli::run_standalone_command(command, &config).await? {
            return Ok(());
        }
    }

    info!("discord-roomy bridge starting up");

    let (discord_gateway, discord_events) =
        SerenityDiscordGateway::connect(&config.discord.token, config.discord.use_privileged_intents).await?;
    let discord_gateway: Arc<dyn discord::DiscordGateway> = discord_gateway;

    let roomy_client: Arc<dyn roomy::RoomyClient> = Arc::new(LeafRoomyClient::new(config.roomy.clone()));

    let repo_handle = SledRepoHandle::open(&config.bridge.data_dir)?;
    let legacy = LegacyBridgeConfig::from_env();

    let orchestrator = Orchestrator::start(
        discord_gateway,
        discord_events,
        roomy_client,
        repo_handle,
        config.bridge.batch_size,
        config.bridge.roomy_profile_lru_size,
        legacy,
    )
    .await?;

    #[cfg(feature = "metrics")]
    if config.metrics.enabled {
        web::metrics::install_recorder();
    }

    let web_server = WebServer::new(config.clone(), orchestrator.clone()).await?;

    let web_handle = tokio::spawn(async move {
        if let Err(err) = web_server.start().await {
            error!("web server error: {}", err);
        }
    });

    tokio::pin!(web_handle);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, beginning shutdown");
        },
        _ = &mut web_handle => {
            info!("web server task exited, beginning shutdown");
        },
    }

    web_handle.abort();

    info!("discord-roomy bridge shutting down");
    Ok(())
}

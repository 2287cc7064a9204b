//! mc-bot - Main Entry Point
//!
//! Discord bot that brings the Minecraft server instance up and down and
//! whitelists players on it.

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use serenity::all::{GatewayIntents, GuildId, Http, ShardManager};
use serenity::Client;

use mc_bot::bot::{Handler, remove_commands};
use mc_bot::config::Config;
use mc_bot::control::ServerControl;
use mc_bot::tracing::init_tracing;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "mc-bot")]
#[command(about = "Discord bot for a Compute Engine hosted Minecraft server")]
#[command(version)]
struct Args {
    /// Config file path.
    #[arg(short, long, env = "MC_BOT_CONFIG")]
    config: Option<String>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Remove guild commands on shutdown (overrides config).
    #[arg(long)]
    remove_commands: Option<bool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(args.log_level.as_deref())?;

    tracing::info!("Starting mc-bot v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(remove) = args.remove_commands {
        config.discord.remove_commands = remove;
    }
    config.validate()?;
    tracing::info!("Configuration loaded");

    let control = ServerControl::from_config(&config)?;
    let guild_id = GuildId::new(config.discord.guild_id);
    let handler = Handler::new(control.clone(), guild_id, config.management.address.clone());

    let mut client = Client::builder(&config.discord.token, GatewayIntents::empty())
        .event_handler(handler)
        .await
        .context("Invalid bot parameters")?;

    tokio::spawn(shutdown_on_signal(
        control,
        Arc::clone(&client.http),
        Arc::clone(&client.shard_manager),
        guild_id,
        config.discord.remove_commands,
    ));

    client.start().await.context("Cannot open the session")?;

    tracing::info!("Bot shut down gracefully");
    Ok(())
}

/// Wait for a shutdown signal, then release the management connection,
/// optionally remove guild commands, and stop the gateway shards.
async fn shutdown_on_signal(
    control: ServerControl,
    http: Arc<Http>,
    shards: Arc<ShardManager>,
    guild_id: GuildId,
    remove: bool,
) {
    shutdown_signal().await;

    control.shutdown().await;

    if remove {
        if let Err(e) = remove_commands(&http, guild_id).await {
            tracing::error!(error = %e, "Cannot remove guild commands");
        }
    }

    shards.shutdown_all().await;
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}

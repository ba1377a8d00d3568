mod bot;
mod command;
mod config;
mod dispatcher;
mod platform;
mod server;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::{IngestionController, IngestionOptions};
use crate::config::Config;
use crate::platform::telegram::TelegramTransport;
use crate::platform::Transport;
use crate::store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,memebot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Environment: {}", config.general.environment);
    info!("  Polling: {}", config.polling_enabled());
    info!("  Listen: {}", config.server.listen_addr);
    info!("  Database: {}", config.store.database_path.display());

    let store = SqliteStore::open(&config.store.database_path)?;
    let stats = store.stats().await?;
    info!(
        "Alias store: {} memes, {} scoped, {} personal aliases",
        stats.memes, stats.meme_aliases, stats.user_aliases
    );

    // teloxide's default client gives up after 17s, shorter than a long poll can be.
    let client = teloxide::net::default_reqwest_settings()
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build Telegram HTTP client")?;
    let transport = Arc::new(TelegramTransport::new(teloxide::Bot::with_client(
        &config.telegram.bot_token,
        client,
    )));

    // Resolved once; every parse gets it explicitly.
    let identity = transport
        .get_self()
        .await
        .context("Failed to fetch bot identity from Telegram")?;
    info!(
        "Bot user ID: {}, username: @{}",
        identity.id,
        identity.username.as_deref().unwrap_or("<none>")
    );

    let ingestion = Arc::new(IngestionController::new(
        transport,
        Arc::new(store),
        identity,
        IngestionOptions {
            polling: config.polling_enabled(),
            poll_timeout: config.poll_timeout(),
            ..IngestionOptions::default()
        },
    ));
    ingestion.start().await?;

    info!("Bot is starting...");
    server::serve(config.server.listen_addr, Arc::clone(&ingestion), async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;

    ingestion.stop("shutdown").await;
    info!(state = ?ingestion.state(), "Shutdown complete");
    Ok(())
}

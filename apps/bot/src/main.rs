//! Strava GPX Bot
//!
//! Long-running Telegram bot: send it a Strava route or activity link and it
//! answers with the track as a .gpx document.

mod commands;
mod telegram;

use anyhow::{Context, Result};
use commands::Dispatcher;
use gpxbot_core::{CredentialStore, GpxBotCore, TomlCredentialStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telegram::TelegramClient;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable naming the configuration file
const CONFIG_ENV: &str = "STRAVA_GPX_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    info!(config = %config_path.display(), "Starting strava-gpx-bot");

    // Load configuration
    let store = TomlCredentialStore::new(config_path);
    let settings = store
        .load_settings()
        .await
        .context("Failed to read bot settings")?;
    let credential = store
        .load()
        .await
        .context("Failed to read the credential record")?;

    let telegram = Arc::new(TelegramClient::new(&credential.telegram_api_token)?);

    // Both Strava sessions must be up before the first message is served
    let core = GpxBotCore::connect(credential, &store, telegram.clone(), &settings)
        .await
        .context("Failed to start the bot core")?;
    let dispatcher = Dispatcher::new(core, telegram);

    tokio::select! {
        _ = dispatcher.run(Duration::from_secs(settings.poll_timeout_secs)) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
        }
    }

    Ok(())
}

//! Strava GPX Bot Core
//!
//! This crate turns chat messages containing Strava links into GPX documents.
//! It handles the Strava session lifecycle, link extraction, concurrent
//! downloads with per-link failure isolation, and delivery back to the chat.

mod delivery;
mod download;
mod error;
mod links;
mod session;
mod storage;

#[cfg(test)]
mod test_support;

pub use delivery::*;
pub use download::*;
pub use error::*;
pub use links::*;
pub use session::*;
pub use storage::*;

use gpxbot_types::{BotSettings, ChatId, Credential};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The main bot core instance
///
/// Cheap to clone; every clone shares the same session and messenger.
#[derive(Clone)]
pub struct GpxBotCore {
    extractor: LinkExtractor,
    coordinator: DeliveryCoordinator,
}

impl GpxBotCore {
    /// Establish the Strava session and build the core around it
    ///
    /// Fails before any message is served when the session cannot be set up.
    pub async fn connect(
        credential: Credential,
        store: &dyn CredentialStore,
        messenger: Arc<dyn Messenger>,
        settings: &BotSettings,
    ) -> Result<Self, GpxBotError> {
        let session = AuthSessionManager::initialize(credential, store, settings).await?;
        Self::new(Arc::new(session), messenger, settings).await
    }

    /// Create a core around an established session
    ///
    /// Prepares the artifact directory and removes files left behind by an
    /// earlier process.
    pub async fn new(
        source: Arc<dyn GpxSource>,
        messenger: Arc<dyn Messenger>,
        settings: &BotSettings,
    ) -> Result<Self, GpxBotError> {
        let artifact_dir = settings.artifact_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("strava-gpx-bot")
        });
        tokio::fs::create_dir_all(&artifact_dir).await?;
        sweep_stale_artifacts(&artifact_dir).await?;

        let orchestrator = DownloadOrchestrator::new(
            Arc::clone(&source),
            artifact_dir.clone(),
            settings.max_concurrent_fetches,
            Duration::from_secs(settings.fetch_timeout_secs),
        );

        info!(
            artifact_dir = %artifact_dir.display(),
            max_concurrent = settings.max_concurrent_fetches,
            "Core ready"
        );

        Ok(Self {
            extractor: LinkExtractor::new(source),
            coordinator: DeliveryCoordinator::new(messenger, orchestrator),
        })
    }

    /// Handle one incoming chat message end to end
    pub async fn handle_message(&self, chat: ChatId, text: &str) -> DeliveryOutcome {
        let references = self.extractor.extract(text);
        debug!(%chat, count = references.len(), "Extracted link references");
        self.coordinator.deliver(chat, references).await
    }
}

/// Remove transient files a previous process did not get to delete
///
/// Only `{uuid}.gpx` names are touched; other files in the directory are left alone.
async fn sweep_stale_artifacts(dir: &Path) -> std::io::Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_artifact_path(&path) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Cannot remove stale file"),
            }
        }
    }

    if removed > 0 {
        info!(removed, "Removed stale transient files");
    }
    Ok(())
}

fn is_artifact_path(path: &Path) -> bool {
    let is_gpx = path.extension().is_some_and(|e| e == "gpx");
    let is_uuid = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| Uuid::parse_str(stem).is_ok());
    is_gpx && is_uuid
}

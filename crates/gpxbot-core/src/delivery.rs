//! Delivery of downloaded tracks back to the conversation
//!
//! Per message the coordinator walks
//! `Idle -> Processing -> {Delivering, Failed, Empty} -> Done`:
//! - `Empty`: nothing to fetch, answer with usage text (no indicator is ever sent)
//! - `Failed`: every fetch failed, remove the indicator and send one failure notice
//! - `Delivering`: send each artifact in reference order, then delete the files

use crate::download::{Artifact, DownloadOrchestrator};
use crate::error::DeliveryError;
use async_trait::async_trait;
use gpxbot_types::{ChatId, LinkReference, MessageHandle};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Usage text sent when a message contains no recognizable link
pub const HELP_TEXT: &str = "I did not find a link to a route or activity in your message.\n\
Check out /start to learn more on how I work.";

/// Indicator shown while downloads are running
pub const DOWNLOADING_TEXT: &str = "Downloading...";

/// Generic notice sent when no reference could be downloaded
pub const FAILED_TEXT: &str = "Download Failed. Maybe the route or activity is not public?";

/// The messaging primitives the coordinator needs
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageHandle, DeliveryError>;

    /// Send the artifact's file as a document attachment
    async fn send_document(&self, chat: ChatId, artifact: &Artifact) -> Result<(), DeliveryError>;

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), DeliveryError>;
}

/// States of one message's handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Idle,
    Processing,
    Delivering,
    Failed,
    Empty,
    Done,
}

/// Summary of how a message was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// The branch taken before `Done` (`Delivering`, `Failed` or `Empty`)
    pub branch: DeliveryState,
    /// Documents acknowledged by the messaging front end
    pub delivered: usize,
    /// References that produced no artifact
    pub failed: usize,
}

/// Sequences indicator, downloads, delivery and cleanup for one message
#[derive(Clone)]
pub struct DeliveryCoordinator {
    messenger: Arc<dyn Messenger>,
    orchestrator: DownloadOrchestrator,
}

impl DeliveryCoordinator {
    pub fn new(messenger: Arc<dyn Messenger>, orchestrator: DownloadOrchestrator) -> Self {
        Self {
            messenger,
            orchestrator,
        }
    }

    /// Handle the references extracted from one message
    pub async fn deliver(&self, chat: ChatId, references: Vec<LinkReference>) -> DeliveryOutcome {
        let mut state = DeliveryState::Idle;

        if references.is_empty() {
            self.transition(chat, &mut state, DeliveryState::Empty);
            self.send_text(chat, HELP_TEXT).await;
            self.transition(chat, &mut state, DeliveryState::Done);
            return DeliveryOutcome {
                branch: DeliveryState::Empty,
                delivered: 0,
                failed: 0,
            };
        }

        self.transition(chat, &mut state, DeliveryState::Processing);
        let indicator = self.spawn_indicator(chat);

        let mut artifacts = Vec::new();
        let mut failed = 0;
        for result in self.orchestrator.download_all(references).await {
            match result.outcome {
                Ok(artifact) => artifacts.push(artifact),
                Err(_) => failed += 1,
            }
        }

        if artifacts.is_empty() {
            self.transition(chat, &mut state, DeliveryState::Failed);
            self.remove_indicator(indicator).await;
            self.send_text(chat, FAILED_TEXT).await;
            self.transition(chat, &mut state, DeliveryState::Done);
            return DeliveryOutcome {
                branch: DeliveryState::Failed,
                delivered: 0,
                failed,
            };
        }

        self.transition(chat, &mut state, DeliveryState::Delivering);
        let (_, delivered) = tokio::join!(
            self.remove_indicator(indicator),
            self.send_documents(chat, &artifacts)
        );

        for artifact in artifacts {
            let path = artifact.path().to_path_buf();
            if let Err(e) = artifact.remove().await {
                warn!(%chat, path = %path.display(), error = %e, "Failed to delete transient file");
            }
        }

        self.transition(chat, &mut state, DeliveryState::Done);
        info!(%chat, delivered, failed, "Message handled");

        DeliveryOutcome {
            branch: DeliveryState::Delivering,
            delivered,
            failed,
        }
    }

    fn transition(&self, chat: ChatId, state: &mut DeliveryState, next: DeliveryState) {
        debug!(%chat, from = ?*state, to = ?next, "Delivery state change");
        *state = next;
    }

    /// Send the indicator without holding up the downloads
    fn spawn_indicator(&self, chat: ChatId) -> JoinHandle<Result<MessageHandle, DeliveryError>> {
        let messenger = Arc::clone(&self.messenger);
        tokio::spawn(async move { messenger.send_text(chat, DOWNLOADING_TEXT).await })
    }

    async fn remove_indicator(&self, indicator: JoinHandle<Result<MessageHandle, DeliveryError>>) {
        match indicator.await {
            Ok(Ok(handle)) => {
                if let Err(e) = self.messenger.delete_message(handle).await {
                    warn!(chat = %handle.chat_id, error = %e, "Failed to remove indicator");
                }
            }
            Ok(Err(e)) => warn!(error = %e, "Indicator was never sent"),
            Err(e) => warn!(error = %e, "Indicator task failed"),
        }
    }

    /// Send documents one after another so they arrive in reference order
    async fn send_documents(&self, chat: ChatId, artifacts: &[Artifact]) -> usize {
        let mut delivered = 0;
        for artifact in artifacts {
            match self.messenger.send_document(chat, artifact).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(%chat, file = artifact.filename(), error = %e, "Failed to send document")
                }
            }
        }
        delivered
    }

    async fn send_text(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.messenger.send_text(chat, text).await {
            warn!(%chat, error = %e, "Failed to send reply");
        }
    }
}

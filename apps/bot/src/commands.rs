//! Update loop and command handling

use crate::telegram::{Message, TelegramClient};
use gpxbot_core::{GpxBotCore, Messenger};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reply to `/start`
pub const START_TEXT: &str = "Hello 👋!\n\
You can send me a link to a Strava route or activity and I will try to download the .gpx file for you.\n\
As of right now I can only access public routes and activities so make sure that the link is for a \
public route / activity which any Strava user can see.";

/// Pause after a failed poll before trying again
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// What an incoming message asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Start,
    /// Anything else is scanned for links
    Links(String),
}

impl Incoming {
    pub fn classify(message: &Message) -> Self {
        let content = message.content();
        let command = content.split_whitespace().next().unwrap_or_default();

        // Group chats address commands as /start@botname
        match command.split('@').next() {
            Some("/start") => Incoming::Start,
            _ => Incoming::Links(content.to_string()),
        }
    }
}

/// Routes updates to the core, one task per message
#[derive(Clone)]
pub struct Dispatcher {
    core: GpxBotCore,
    telegram: Arc<TelegramClient>,
}

impl Dispatcher {
    pub fn new(core: GpxBotCore, telegram: Arc<TelegramClient>) -> Self {
        Self { core, telegram }
    }

    /// Poll forever, handing each message to its own task
    pub async fn run(&self, poll_timeout: Duration) {
        let mut offset = 0;
        info!("Waiting for messages");

        loop {
            match self.poll_once(offset, poll_timeout).await {
                Ok(next) => offset = next,
                Err(e) => {
                    warn!(error = %e, "Polling for updates failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    /// Fetch one batch of updates and spawn their handlers
    ///
    /// Returns the offset acknowledging every update seen.
    pub async fn poll_once(
        &self,
        offset: i64,
        poll_timeout: Duration,
    ) -> Result<i64, gpxbot_core::DeliveryError> {
        let updates = self.telegram.get_updates(offset, poll_timeout).await?;
        let mut next = offset;

        for update in updates {
            next = next.max(update.update_id + 1);
            let Some(message) = update.message else {
                debug!(update_id = update.update_id, "Skipping update without message");
                continue;
            };

            let dispatcher = self.clone();
            tokio::spawn(async move { dispatcher.handle(message).await });
        }

        Ok(next)
    }

    pub async fn handle(&self, message: Message) {
        let chat = message.chat_id();

        match Incoming::classify(&message) {
            Incoming::Start => {
                debug!(%chat, "Start command");
                if let Err(e) = self.telegram.send_text(chat, START_TEXT).await {
                    warn!(%chat, error = %e, "Failed to send welcome text");
                }
            }
            Incoming::Links(text) => {
                let outcome = self.core.handle_message(chat, &text).await;
                debug!(%chat, ?outcome, "Message done");
            }
        }
    }
}

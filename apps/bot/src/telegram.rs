//! Telegram Bot API adapter
//!
//! Implements the core's `Messenger` on top of `sendMessage`,
//! `sendDocument` and `deleteMessage`, and exposes `getUpdates` long polling
//! for the update loop.

use async_trait::async_trait;
use gpxbot_core::{Artifact, DeliveryError, Messenger};
use gpxbot_types::{ChatId, MessageHandle};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Timeout for send and delete calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Headroom on top of the long polling timeout before the request gives up
const POLL_GRACE: Duration = Duration::from_secs(10);

const GPX_MIME: &str = "application/gpx+xml";

// ============================================================================
// Wire types
// ============================================================================

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    /// Text attached to media messages
    #[serde(default)]
    pub caption: Option<String>,
}

impl Message {
    pub fn chat_id(&self) -> ChatId {
        ChatId(self.chat.id)
    }

    /// The message's text, falling back to a media caption
    pub fn content(&self) -> &str {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

// ============================================================================
// Client
// ============================================================================

/// Bot API client bound to one bot token
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self, DeliveryError> {
        Self::with_api_base(DEFAULT_API_BASE, token)
    }

    /// Point the client at another Bot API server
    pub fn with_api_base(api_base: &str, token: &str) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .user_agent(concat!("strava-gpx-bot/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    fn method(&self, name: &str) -> RequestBuilder {
        self.client.post(format!("{}/{}", self.base, name))
    }

    /// Send a request and unwrap the Bot API envelope
    async fn call<T: DeserializeOwned>(
        &self,
        name: &str,
        request: RequestBuilder,
    ) -> Result<T, DeliveryError> {
        let response: ApiResponse<T> = request.send().await?.json().await?;

        match response {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(DeliveryError::Api(format!(
                "{}: {}",
                name,
                description.unwrap_or_else(|| "no description".to_string())
            ))),
        }
    }

    /// Long poll for updates with an id of at least `offset`
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, DeliveryError> {
        let request = self
            .method("getUpdates")
            .timeout(timeout + POLL_GRACE)
            .json(&serde_json::json!({
                "offset": offset,
                "timeout": timeout.as_secs(),
                "allowed_updates": ["message"],
            }));

        self.call("getUpdates", request).await
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageHandle, DeliveryError> {
        let request = self
            .method("sendMessage")
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({ "chat_id": chat.0, "text": text }));

        let message: Message = self.call("sendMessage", request).await?;
        Ok(MessageHandle {
            chat_id: message.chat_id(),
            message_id: message.message_id,
        })
    }

    async fn send_document(&self, chat: ChatId, artifact: &Artifact) -> Result<(), DeliveryError> {
        let file = tokio::fs::File::open(artifact.path()).await?;
        let length = file.metadata().await?.len();

        let document = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), length)
            .file_name(artifact.filename().to_string())
            .mime_str(GPX_MIME)?;
        let form = Form::new()
            .text("chat_id", chat.0.to_string())
            .part("document", document);

        let request = self
            .method("sendDocument")
            .timeout(REQUEST_TIMEOUT)
            .multipart(form);
        let _: Message = self.call("sendDocument", request).await?;

        debug!(%chat, file = artifact.filename(), length, "Document sent");
        Ok(())
    }

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), DeliveryError> {
        let request = self
            .method("deleteMessage")
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({
                "chat_id": handle.chat_id.0,
                "message_id": handle.message_id,
            }));

        let _: bool = self.call("deleteMessage", request).await?;
        Ok(())
    }
}

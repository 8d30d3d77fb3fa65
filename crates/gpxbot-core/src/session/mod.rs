//! Authenticated access to Strava
//!
//! Two mechanisms are combined here:
//! - an OAuth token client (`ApiClient`) that refreshes and carries the access token
//! - a scraped web session (`WebSession`) authenticated by the remember-me cookie
//!
//! `AuthSessionManager` composes both and is the only thing callers see,
//! through the `GpxSource` trait.

mod api;
mod manager;
mod web;

pub use api::*;
pub use manager::*;
pub use web::*;

use crate::error::{DownloadError, ParseError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use gpxbot_types::BotSettings;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;

/// Body of a streamed export, chunk by chunk
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, DownloadError>>;

/// A route export that is still being streamed from the server
pub struct RouteExport {
    pub filename: String,
    pub body: ByteStream,
}

/// A fully received activity export
#[derive(Debug, Clone)]
pub struct ActivityExport {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Authenticated fetch capability used by link resolution and downloads
///
/// Implementations must be safe to share between concurrently handled messages.
#[async_trait]
pub trait GpxSource: Send + Sync {
    async fn fetch_route_export(&self, route_id: u64) -> Result<RouteExport, DownloadError>;

    async fn fetch_activity_export(&self, activity_id: u64) -> Result<ActivityExport, DownloadError>;

    /// Fetch the HTML page behind a share short link
    async fn fetch_share_page(&self, token: &str) -> Result<String, ParseError>;
}

const USER_AGENT: &str = concat!("strava-gpx-bot/", env!("CARGO_PKG_VERSION"));

/// Client builder shared by both session mechanisms
fn client_builder(settings: &BotSettings) -> ClientBuilder {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(settings.fetch_timeout_secs))
}

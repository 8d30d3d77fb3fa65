//! Shared types for the Strava GPX bot
//!
//! This crate contains the plain data structures shared between the
//! core library and the bot binary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Credential Types
// ============================================================================

/// The single shared account record the bot authenticates with.
///
/// Persisted as the `[Config]` table of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub email: String,
    pub password: String,
    pub client_id: u64,
    pub client_secret: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds) after which `access_token` is stale
    pub expires_at: i64,
    pub telegram_api_token: String,
    /// Web-session token, empty until the first password login
    #[serde(default)]
    pub jwt: String,
}

impl Credential {
    /// Whether the OAuth access token must be refreshed at `now` (unix seconds)
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Replace the OAuth token triple with a refreshed one
    pub fn apply_refresh(&mut self, tokens: TokenRefresh) {
        self.access_token = tokens.access_token;
        self.refresh_token = tokens.refresh_token;
        self.expires_at = tokens.expires_at;
    }
}

/// Response of the OAuth refresh endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRefresh {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

// ============================================================================
// Link Types
// ============================================================================

/// A link found in a chat message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum LinkReference {
    /// Opaque short link that has to be resolved to a route
    Share(String),
    Route(u64),
    Activity(u64),
}

impl fmt::Display for LinkReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkReference::Share(token) => write!(f, "share link {}", token),
            LinkReference::Route(id) => write!(f, "route {}", id),
            LinkReference::Activity(id) => write!(f, "activity {}", id),
        }
    }
}

// ============================================================================
// Messaging Types
// ============================================================================

/// Conversation a message arrived in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message previously sent by the bot, used to delete it later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub chat_id: ChatId,
    pub message_id: i64,
}

// ============================================================================
// Settings Types
// ============================================================================

/// Runtime settings, read from the optional `[Settings]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSettings {
    /// Directory for transient track files (None = platform cache dir, else temp dir)
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
    /// Upper bound on concurrent fetches for a single message
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// Per-fetch timeout in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Long polling timeout for the messaging front end
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default)]
    pub strava: StravaEndpoints,
}

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_fetch_timeout_secs() -> u64 {
    60
}

fn default_poll_timeout_secs() -> u64 {
    30
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            artifact_dir: None,
            max_concurrent_fetches: default_max_concurrent_fetches(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            strava: StravaEndpoints::default(),
        }
    }
}

/// Base URLs of the Strava boundary
///
/// The production hosts are the defaults; tests point these at a mock server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StravaEndpoints {
    /// Website host serving login, dashboard and GPX exports
    #[serde(default = "default_web_base")]
    pub web_base: String,
    /// Host of the OAuth token endpoint
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Host of the share short links
    #[serde(default = "default_share_base")]
    pub share_base: String,
}

fn default_web_base() -> String {
    "https://www.strava.com".to_string()
}

fn default_api_base() -> String {
    "https://www.strava.com".to_string()
}

fn default_share_base() -> String {
    "https://strava.app.link".to_string()
}

impl Default for StravaEndpoints {
    fn default() -> Self {
        Self {
            web_base: default_web_base(),
            api_base: default_api_base(),
            share_base: default_share_base(),
        }
    }
}

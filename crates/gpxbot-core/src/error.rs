//! Error types for the GPX bot core

use std::path::PathBuf;
use thiserror::Error;

/// Malformed or missing credential record
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file has no [{0}] record")]
    MissingRecord(&'static str),

    #[error("Invalid endpoint URL {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
}

/// OAuth refresh or web-session establishment failure
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Token refresh failed: {status} - {message}")]
    TokenRefresh { status: u16, message: String },

    #[error("Web session rejected: {0}")]
    SessionRejected(String),

    #[error("Login page did not contain a CSRF token")]
    MissingCsrfToken,

    #[error("Email/password login was rejected")]
    LoginRejected,

    #[error("Login succeeded but no session cookie was set")]
    MissingSessionCookie,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AuthError {
    /// Whether a stored web-session token was refused and a password login may help
    pub fn is_session_rejected(&self) -> bool {
        matches!(self, AuthError::SessionRejected(_))
    }
}

/// A link could not be turned into a usable route reference
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Share link {token} could not be fetched: {source}")]
    ShareFetch {
        token: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Share link {token} returned status {status}")]
    ShareStatus { token: String, status: u16 },

    #[error("Share link {0} does not point to a route")]
    NoRoute(String),
}

/// Per-reference fetch failure
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Response did not name a file")]
    MissingFilename,

    #[error("Timeout")]
    Timeout,
}

/// Messaging front end failure
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Messaging API error: {0}")]
    Api(String),
}

/// Errors that can occur while setting up the bot core
#[derive(Debug, Error)]
pub enum GpxBotError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Cannot prepare artifact directory: {0}")]
    Io(#[from] std::io::Error),
}

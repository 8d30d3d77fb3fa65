//! Session manager - owns the credential and the authenticated clients
//!
//! Initialization is a one-time barrier run before any message is served:
//! 1. refresh the OAuth access token if it has expired
//! 2. open the web session from the stored token, falling back to a password login
//! 3. persist whatever changed
//!
//! Afterwards the manager is read-only and shared between message handlers.

use super::{client_builder, ActivityExport, ApiClient, GpxSource, RouteExport, WebSession};
use crate::error::{AuthError, DownloadError, ParseError};
use crate::storage::CredentialStore;
use async_trait::async_trait;
use chrono::Utc;
use gpxbot_types::{BotSettings, Credential};
use tracing::{debug, info, warn};

/// Holds the authenticated fetch capability for the process lifetime
#[derive(Debug)]
pub struct AuthSessionManager {
    api: ApiClient,
    web: WebSession,
    credential: Credential,
    share_base: String,
}

impl AuthSessionManager {
    /// Establish both sessions; any error here is fatal for the process
    pub async fn initialize(
        mut credential: Credential,
        store: &dyn CredentialStore,
        settings: &BotSettings,
    ) -> Result<Self, AuthError> {
        let client = client_builder(settings).build()?;
        let mut api = ApiClient::new(
            client,
            &settings.strava.api_base,
            credential.access_token.clone(),
        );

        if credential.is_expired(Utc::now().timestamp()) {
            info!(expires_at = credential.expires_at, "Access token expired, refreshing");
            let tokens = api.refresh_access_token(&credential).await?;
            credential.apply_refresh(tokens);
            api = api.with_access_token(credential.access_token.clone());
            store.save(&credential).await?;
            info!(expires_at = credential.expires_at, "Access token refreshed");
        }

        let web = match WebSession::with_jwt(settings, &credential.jwt).await {
            Ok(web) => web,
            Err(e) if e.is_session_rejected() => {
                warn!(error = %e, "JWT expired, falling back to email & password login");
                WebSession::with_password(settings, &credential.email, &credential.password)
                    .await?
            }
            Err(e) => return Err(e),
        };

        if credential.jwt != web.jwt() {
            credential.jwt = web.jwt().to_string();
            store.save(&credential).await?;
            debug!("Stored fresh web-session token");
        }

        info!(email = %credential.email, "Strava session established");

        Ok(Self {
            api,
            web,
            credential,
            share_base: settings.strava.share_base.trim_end_matches('/').to_string(),
        })
    }

    /// The credential as it stood after initialization
    pub fn credential(&self) -> &Credential {
        &self.credential
    }
}

#[async_trait]
impl GpxSource for AuthSessionManager {
    async fn fetch_route_export(&self, route_id: u64) -> Result<RouteExport, DownloadError> {
        self.web.route_export(route_id).await
    }

    async fn fetch_activity_export(
        &self,
        activity_id: u64,
    ) -> Result<ActivityExport, DownloadError> {
        self.web.activity_export(activity_id, &self.api).await
    }

    async fn fetch_share_page(&self, token: &str) -> Result<String, ParseError> {
        let url = format!("{}/{}", self.share_base, token);
        let fetch_error = |source| ParseError::ShareFetch {
            token: token.to_string(),
            source,
        };

        let response = self.web.client().get(&url).send().await.map_err(fetch_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ParseError::ShareStatus {
                token: token.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(fetch_error)
    }
}

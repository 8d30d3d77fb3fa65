//! OAuth token client

use crate::error::AuthError;
use gpxbot_types::{Credential, TokenRefresh};
use reqwest::{Client, RequestBuilder};
use tracing::debug;

/// Token-based client: refreshes the OAuth access token and attaches it to requests
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    api_base: String,
    access_token: String,
}

impl ApiClient {
    pub fn new(client: Client, api_base: &str, access_token: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    /// Replace the bearer token after a refresh
    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = access_token.into();
        self
    }

    /// Exchange the stored refresh token for a new token triple
    pub async fn refresh_access_token(
        &self,
        credential: &Credential,
    ) -> Result<TokenRefresh, AuthError> {
        let url = format!("{}/oauth/token", self.api_base);
        let client_id = credential.client_id.to_string();
        debug!(%url, client_id = %client_id, "Requesting OAuth token refresh");

        let response = self
            .client
            .post(&url)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", credential.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", credential.refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenRefresh {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<TokenRefresh>().await?)
    }

    /// Attach the access token to a request
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.access_token)
    }
}

//! Scraped web session
//!
//! Strava serves GPX exports from its website rather than its public API,
//! so downloads go through a cookie-authenticated session. The session is
//! opened either from a stored remember-me token or by a form login.

use super::{client_builder, ActivityExport, ApiClient, RouteExport};
use crate::error::{AuthError, ConfigError, DownloadError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use futures::StreamExt;
use gpxbot_types::BotSettings;
use regex::Regex;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};
use url::Url;

/// Cookie carrying the web-session token
pub const SESSION_COOKIE: &str = "strava_remember_token";

/// Cookie carrying the athlete id the web-session token was issued for
pub const SESSION_ID_COOKIE: &str = "strava_remember_id";

static CSRF_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+name="csrf-token"\s+content="([^"]+)""#).expect("valid csrf pattern")
});

/// Cookie-authenticated client for the Strava website
#[derive(Clone, Debug)]
pub struct WebSession {
    client: Client,
    web_base: Url,
    jwt: String,
}

impl WebSession {
    /// Open a session from a stored web-session token
    ///
    /// Fails with `AuthError::SessionRejected` when the token is empty,
    /// malformed or expired, or when the website sends the probe request back
    /// to the login page.
    pub async fn with_jwt(settings: &BotSettings, jwt: &str) -> Result<Self, AuthError> {
        if jwt.is_empty() {
            return Err(AuthError::SessionRejected(
                "no stored web-session token".to_string(),
            ));
        }

        let claims = SessionClaims::parse(jwt)?;
        if claims.is_expired(Utc::now().timestamp()) {
            return Err(AuthError::SessionRejected(format!(
                "web-session token expired at {}",
                claims.exp.unwrap_or_default()
            )));
        }
        let athlete_id = claims.athlete_id().ok_or_else(|| {
            AuthError::SessionRejected("web-session token names no athlete".to_string())
        })?;

        let (client, jar, web_base) = open(settings)?;
        jar.add_cookie_str(&format!("{}={}; Path=/", SESSION_ID_COOKIE, athlete_id), &web_base);
        jar.add_cookie_str(&format!("{}={}; Path=/", SESSION_COOKIE, jwt), &web_base);

        let session = Self {
            client,
            web_base,
            jwt: jwt.to_string(),
        };

        let response = session.get("dashboard").send().await?;
        if !response.status().is_success() || redirected_to_login(&response) {
            return Err(AuthError::SessionRejected(format!(
                "dashboard answered {} at {}",
                response.status(),
                response.url().path()
            )));
        }

        debug!("Web session restored from stored token");
        Ok(session)
    }

    /// Open a session with a form login
    pub async fn with_password(
        settings: &BotSettings,
        email: &str,
        password: &str,
    ) -> Result<Self, AuthError> {
        let (client, jar, web_base) = open(settings)?;
        let login_url = endpoint(&web_base, "login");
        let session_url = endpoint(&web_base, "session");

        let login_page = client
            .get(&login_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let token = csrf_token(&login_page).ok_or(AuthError::MissingCsrfToken)?;

        let response = client
            .post(&session_url)
            .form(&[
                ("utf8", "\u{2713}"),
                ("authenticity_token", token.as_str()),
                ("plan", ""),
                ("email", email),
                ("password", password),
                ("remember_me", "on"),
            ])
            .send()
            .await?;

        if !response.status().is_success() || redirected_to_login(&response) {
            return Err(AuthError::LoginRejected);
        }

        let jwt = session_cookie(&jar, &web_base).ok_or(AuthError::MissingSessionCookie)?;
        info!(%email, "Logged in to Strava with email and password");

        Ok(Self {
            client,
            web_base,
            jwt,
        })
    }

    /// Current web-session token
    pub fn jwt(&self) -> &str {
        &self.jwt
    }

    /// Underlying HTTP client (carries the session cookie)
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET a path on the website
    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(endpoint(&self.web_base, path))
    }

    /// Start streaming the GPX export of a route
    pub async fn route_export(&self, route_id: u64) -> Result<RouteExport, DownloadError> {
        let response = self
            .get(&format!("routes/{}/export_gpx", route_id))
            .send()
            .await?;
        let (filename, response) = checked_export(response)?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(DownloadError::from))
            .boxed();

        Ok(RouteExport { filename, body })
    }

    /// Download the GPX export of an activity
    ///
    /// The request carries both the session cookie and the OAuth access token.
    pub async fn activity_export(
        &self,
        activity_id: u64,
        api: &ApiClient,
    ) -> Result<ActivityExport, DownloadError> {
        let request = self.get(&format!("activities/{}/export_gpx", activity_id));
        let response = api.authorize(request).send().await?;
        let (filename, response) = checked_export(response)?;
        let data = response.bytes().await?.to_vec();

        Ok(ActivityExport { filename, data })
    }
}

/// Payload claims of a web-session token
#[derive(Debug, Deserialize)]
struct SessionClaims {
    /// Athlete id, issued as a number or a string
    sub: serde_json::Value,
    #[serde(default)]
    exp: Option<i64>,
}

impl SessionClaims {
    /// Decode the payload segment without checking the signature
    fn parse(jwt: &str) -> Result<Self, AuthError> {
        let malformed =
            |reason: String| AuthError::SessionRejected(format!("malformed web-session token: {}", reason));

        let payload = jwt
            .split('.')
            .nth(1)
            .ok_or_else(|| malformed("no payload segment".to_string()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| malformed(e.to_string()))?;

        serde_json::from_slice(&bytes).map_err(|e| malformed(e.to_string()))
    }

    fn athlete_id(&self) -> Option<String> {
        match &self.sub {
            serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
            serde_json::Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    fn is_expired(&self, now: i64) -> bool {
        self.exp.is_some_and(|exp| now >= exp)
    }
}

fn open(settings: &BotSettings) -> Result<(Client, Arc<Jar>, Url), AuthError> {
    let web_base = Url::parse(&settings.strava.web_base).map_err(|e| {
        ConfigError::InvalidEndpoint {
            url: settings.strava.web_base.clone(),
            reason: e.to_string(),
        }
    })?;

    let jar = Arc::new(Jar::default());
    let client = client_builder(settings)
        .cookie_provider(Arc::clone(&jar))
        .build()?;

    Ok((client, jar, web_base))
}

fn endpoint(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

fn redirected_to_login(response: &Response) -> bool {
    response.url().path().starts_with("/login")
}

fn csrf_token(page: &str) -> Option<String> {
    CSRF_TOKEN
        .captures(page)
        .and_then(|captures| captures.get(1))
        .map(|token| token.as_str().to_string())
}

fn session_cookie(jar: &Jar, url: &Url) -> Option<String> {
    let header = jar.cookies(url)?;
    let header = header.to_str().ok()?;

    header
        .split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Reject non-success exports and exports that do not name a file
fn checked_export(response: Response) -> Result<(String, Response), DownloadError> {
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::ServerError {
            status: status.as_u16(),
            message: format!("export refused for {}", response.url().path()),
        });
    }

    let filename = filename_from_disposition(response.headers()).ok_or(DownloadError::MissingFilename)?;
    Ok((filename, response))
}

/// Suggested filename from a `Content-Disposition` header, without any directory part
pub fn filename_from_disposition(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split("filename=").nth(1))
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().trim_matches('"'))
        .and_then(|v| v.rsplit(['/', '\\']).next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cookie, login_page, session_jwt, settings, ATHLETE_ID, FAR_FUTURE};
    use reqwest::header::HeaderValue;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn disposition(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_filename_from_quoted_disposition() {
        let headers = disposition(r#"attachment; filename="Morning_Loop.gpx"; filename*=UTF-8''Morning_Loop.gpx"#);
        assert_eq!(filename_from_disposition(&headers).as_deref(), Some("Morning_Loop.gpx"));
    }

    #[test]
    fn test_filename_from_unquoted_disposition_strips_directories() {
        let headers = disposition("attachment; filename=../../etc/route.gpx");
        assert_eq!(filename_from_disposition(&headers).as_deref(), Some("route.gpx"));
    }

    #[test]
    fn test_filename_missing() {
        assert_eq!(filename_from_disposition(&HeaderMap::new()), None);
        assert_eq!(filename_from_disposition(&disposition("attachment")), None);
        assert_eq!(filename_from_disposition(&disposition(r#"attachment; filename="""#)), None);
    }

    #[test]
    fn test_csrf_token_from_login_page() {
        assert_eq!(csrf_token(&login_page("tok+en/=")).as_deref(), Some("tok+en/="));
        assert_eq!(csrf_token("<html></html>"), None);
    }

    #[tokio::test]
    async fn test_with_jwt_sends_session_cookie() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let jwt = session_jwt(ATHLETE_ID, FAR_FUTURE);
        Mock::given(method("GET"))
            .and(path("/dashboard"))
            .and(cookie(SESSION_COOKIE, &jwt))
            .and(cookie(SESSION_ID_COOKIE, &ATHLETE_ID.to_string()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let session = WebSession::with_jwt(&settings(&server, dir.path()), &jwt)
            .await
            .unwrap();

        assert_eq!(session.jwt(), jwt);
    }

    #[tokio::test]
    async fn test_with_jwt_redirected_to_login_is_rejected() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .and(path("/dashboard"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/login"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(login_page("csrf")))
            .mount(&server)
            .await;

        let jwt = session_jwt(ATHLETE_ID, FAR_FUTURE);
        let err = WebSession::with_jwt(&settings(&server, dir.path()), &jwt)
            .await
            .unwrap_err();

        assert!(err.is_session_rejected());
    }

    #[tokio::test]
    async fn test_with_expired_jwt_is_rejected_without_request() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        let err = WebSession::with_jwt(&settings(&server, dir.path()), &session_jwt(ATHLETE_ID, 1))
            .await
            .unwrap_err();

        assert!(err.is_session_rejected());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_with_malformed_jwt_is_rejected_without_request() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        for jwt in ["stored-jwt", "header.%%%.signature", "e30.e30.sig"] {
            let err = WebSession::with_jwt(&settings(&server, dir.path()), jwt)
                .await
                .unwrap_err();
            assert!(err.is_session_rejected(), "{} was accepted", jwt);
        }
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn test_session_claims_accept_string_subject() {
        // {"sub":"987","exp":10}
        let claims = SessionClaims::parse("e30.eyJzdWIiOiI5ODciLCJleHAiOjEwfQ.sig").unwrap();

        assert_eq!(claims.athlete_id().as_deref(), Some("987"));
        assert!(!claims.is_expired(9));
        assert!(claims.is_expired(10));
    }

    #[tokio::test]
    async fn test_with_empty_jwt_is_rejected_without_request() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        let err = WebSession::with_jwt(&settings(&server, dir.path()), "")
            .await
            .unwrap_err();

        assert!(err.is_session_rejected());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_with_password_reads_session_cookie() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(login_page("csrf-123")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .and(body_string_contains("authenticity_token=csrf-123"))
            .and(body_string_contains("email=rider%40example.com"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Set-Cookie", "strava_remember_token=fresh-jwt; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let session = WebSession::with_password(
            &settings(&server, dir.path()),
            "rider@example.com",
            "hunter2",
        )
        .await
        .unwrap();

        assert_eq!(session.jwt(), "fresh-jwt");
    }

    #[tokio::test]
    async fn test_with_password_bounced_to_login_is_rejected() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(login_page("csrf")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/login"))
            .mount(&server)
            .await;

        let err = WebSession::with_password(&settings(&server, dir.path()), "rider@example.com", "wrong")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::LoginRejected));
    }

    #[tokio::test]
    async fn test_with_password_needs_csrf_token() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let err = WebSession::with_password(&settings(&server, dir.path()), "rider@example.com", "hunter2")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::MissingCsrfToken));
    }

    #[tokio::test]
    async fn test_invalid_web_base_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut settings = BotSettings::default();
        settings.artifact_dir = Some(dir.path().to_path_buf());
        settings.strava.web_base = "not a url".to_string();

        let err = WebSession::with_password(&settings, "rider@example.com", "hunter2")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Config(ConfigError::InvalidEndpoint { .. })));
    }
}

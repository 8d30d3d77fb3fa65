//! Fixtures shared by the unit tests: a canned credential, settings pointed
//! at a mock Strava, and a messenger that records what it was asked to send.

use crate::delivery::Messenger;
use crate::download::Artifact;
use crate::error::DeliveryError;
use crate::session::{AuthSessionManager, SESSION_COOKIE, SESSION_ID_COOKIE};
use crate::storage::{CredentialStore, TomlCredentialStore};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use gpxbot_types::{BotSettings, ChatId, Credential, MessageHandle, StravaEndpoints};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

/// 2100-01-01, an expiry that never passes during a test run
pub const FAR_FUTURE: i64 = 4_102_444_800;

/// Athlete the stored web-session token was issued for
pub const ATHLETE_ID: u64 = 12345;

/// A web-session token shaped like the website's, with an unchecked signature
pub fn session_jwt(athlete_id: u64, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS512"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":{},"exp":{}}}"#, athlete_id, exp));
    format!("{}.{}.signature", header, payload)
}

pub fn credential(expires_at: i64) -> Credential {
    Credential {
        email: "rider@example.com".to_string(),
        password: "hunter2".to_string(),
        client_id: 1234,
        client_secret: "secret".to_string(),
        access_token: "access".to_string(),
        refresh_token: "refresh".to_string(),
        expires_at,
        telegram_api_token: "123:abc".to_string(),
        jwt: session_jwt(ATHLETE_ID, FAR_FUTURE),
    }
}

pub fn settings(server: &MockServer, artifact_dir: &Path) -> BotSettings {
    BotSettings {
        artifact_dir: Some(artifact_dir.to_path_buf()),
        fetch_timeout_secs: 5,
        strava: StravaEndpoints {
            web_base: server.uri(),
            api_base: server.uri(),
            share_base: format!("{}/share", server.uri()),
        },
        ..BotSettings::default()
    }
}

pub fn login_page(csrf: &str) -> String {
    format!(
        r#"<html><head><meta name="csrf-token" content="{}"></head><body><form action="/session"></form></body></html>"#,
        csrf
    )
}

/// Matches requests carrying cookie `name` with `value`
pub struct CookieMatcher {
    pair: String,
}

pub fn cookie(name: &str, value: &str) -> CookieMatcher {
    CookieMatcher {
        pair: format!("{}={}", name, value),
    }
}

impl Match for CookieMatcher {
    fn matches(&self, request: &Request) -> bool {
        request
            .headers
            .get_all("cookie")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .any(|pair| pair.trim() == self.pair)
    }
}

/// Accept the stored token from `credential`
pub async fn mount_dashboard(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/dashboard"))
        .and(cookie(SESSION_COOKIE, &session_jwt(ATHLETE_ID, FAR_FUTURE)))
        .and(cookie(SESSION_ID_COOKIE, &ATHLETE_ID.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>dashboard</html>"))
        .mount(server)
        .await;
}

pub async fn store_with(dir: &Path, credential: &Credential) -> TomlCredentialStore {
    let store = TomlCredentialStore::new(dir.join("config.toml"));
    store.save(credential).await.unwrap();
    store
}

/// An established session against `server`
pub async fn session(server: &MockServer, dir: &Path) -> Arc<AuthSessionManager> {
    mount_dashboard(server).await;
    let credential = credential(FAR_FUTURE);
    let store = store_with(dir, &credential).await;
    let manager = AuthSessionManager::initialize(credential, &store, &settings(server, dir))
        .await
        .unwrap();
    Arc::new(manager)
}

pub async fn mount_route(server: &MockServer, id: u64, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/routes/{}/export_gpx", id)))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "Content-Disposition",
                    format!(r#"attachment; filename="route_{}.gpx""#, id).as_str(),
                )
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

/// A route only its owner may export
pub async fn mount_private_route(server: &MockServer, id: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/routes/{}/export_gpx", id)))
        .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
        .mount(server)
        .await;
}

pub async fn mount_activity(server: &MockServer, id: u64, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/activities/{}/export_gpx", id)))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "Content-Disposition",
                    format!(r#"attachment; filename="activity_{}.gpx""#, id).as_str(),
                )
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

/// A share page linking `route_id`, or no route at all
pub async fn mount_share(server: &MockServer, token: &str, route_id: Option<u64>) {
    let link = route_id
        .map(|id| format!(r#"<a href="https://www.strava.com/routes/{}">Open route</a>"#, id))
        .unwrap_or_default();
    let page = format!("<html><body><h1>Shared on Strava</h1>{}</body></html>", link);

    Mock::given(method("GET"))
        .and(path(format!("/share/{}", token)))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(server)
        .await;
}

/// Regular files in `dir`, sorted
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}

// ============================================================================
// Recording messenger
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text {
        chat: ChatId,
        text: String,
        handle: MessageHandle,
    },
    Document {
        chat: ChatId,
        filename: String,
        body: Vec<u8>,
    },
    Deleted(MessageHandle),
}

/// Messenger that keeps everything it is asked to do
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicI64,
    fail_documents: bool,
}

impl RecordingMessenger {
    /// A messenger whose document uploads are all refused
    pub fn failing_documents() -> Self {
        Self {
            fail_documents: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(filename, body)` of every delivered document, in delivery order
    pub fn documents(&self) -> Vec<(String, Vec<u8>)> {
        self.collect_documents(|_| true)
    }

    pub fn documents_in(&self, chat: ChatId) -> Vec<(String, Vec<u8>)> {
        self.collect_documents(|c| c == chat)
    }

    /// How many messages with `text` were sent and never deleted
    pub fn outstanding(&self, text: &str) -> usize {
        let sent = self.sent.lock();
        sent.iter()
            .filter(|s| match s {
                Sent::Text {
                    text: t, handle, ..
                } => t == text && !sent.contains(&Sent::Deleted(*handle)),
                _ => false,
            })
            .count()
    }

    fn collect_documents(&self, keep: impl Fn(ChatId) -> bool) -> Vec<(String, Vec<u8>)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Document {
                    chat,
                    filename,
                    body,
                } if keep(*chat) => Some((filename.clone(), body.clone())),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageHandle, DeliveryError> {
        let handle = MessageHandle {
            chat_id: chat,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        };
        self.sent.lock().push(Sent::Text {
            chat,
            text: text.to_string(),
            handle,
        });
        Ok(handle)
    }

    async fn send_document(&self, chat: ChatId, artifact: &Artifact) -> Result<(), DeliveryError> {
        if self.fail_documents {
            return Err(DeliveryError::Api("Bad Request: file upload refused".to_string()));
        }

        let body = tokio::fs::read(artifact.path()).await?;
        self.sent.lock().push(Sent::Document {
            chat,
            filename: artifact.filename().to_string(),
            body,
        });
        Ok(())
    }

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), DeliveryError> {
        self.sent.lock().push(Sent::Deleted(handle));
        Ok(())
    }
}

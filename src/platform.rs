use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Config;

/// The social platform as seen by the send loop.
#[async_trait]
pub trait DirectMessenger: Send + Sync {
    /// Establish a session. `Ok(false)` means the platform refused it
    /// (missing or rejected credentials).
    async fn login(&self) -> Result<bool>;

    /// Send `text` to `username`. `Ok(false)` means the platform declined
    /// (unknown user, rejected message); `Err` is an unexpected failure.
    async fn send_direct_message(&self, username: &str, text: &str) -> Result<bool>;
}

/// Persisted session, reused across runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub session_token: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    session_token: String,
}

#[derive(Deserialize)]
struct UserLookupResponse {
    id: String,
}

/// Result of a single authenticated call.
enum Call {
    Done(reqwest::Response),
    Expired,
}

/// JSON gateway client for the platform's direct-message API.
pub struct HttpPlatformClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
    session_file: PathBuf,
    session: Mutex<Option<Session>>,
}

impl fmt::Debug for HttpPlatformClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPlatformClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("session_file", &self.session_file)
            .finish_non_exhaustive()
    }
}

impl HttpPlatformClient {
    pub fn new(
        base_url: Url,
        username: String,
        password: String,
        session_file: PathBuf,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("dm-outreach/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            username,
            password,
            session_file,
            session: Mutex::new(None),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.platform.base_url).context("invalid platform.base_url")?;
        Self::new(
            base_url,
            cfg.platform.username.clone(),
            cfg.platform.password.clone(),
            cfg.platform.session_file(),
        )
    }

    /// `segments` are appended to the base URL one percent-encoded path
    /// segment each, so user-supplied values cannot change the target.
    pub fn build_request(
        &self,
        method: Method,
        segments: &[&str],
        token: Option<&str>,
        body: Option<&Value>,
    ) -> Result<reqwest::Request> {
        let mut endpoint = self.base_url.clone();
        endpoint
            .path_segments_mut()
            .map_err(|_| anyhow!("platform base URL cannot take a path"))?
            .pop_if_empty()
            .extend(segments);
        let mut req = self
            .http
            .request(method, endpoint)
            .header("Accept", "application/json");
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        req.build().context("failed to build platform request")
    }

    async fn current_token(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.session_token.clone())
    }

    /// Run an authenticated call, mapping 401 to `Call::Expired`.
    async fn call(&self, method: Method, segments: &[&str], body: Option<&Value>) -> Result<Call> {
        let token = self
            .current_token()
            .await
            .ok_or_else(|| anyhow!("not logged in"))?;
        let request = self.build_request(method, segments, Some(&token), body)?;
        debug!(url = %request.url(), method = %request.method(), "platform request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach platform")?;
        if res.status() == StatusCode::UNAUTHORIZED {
            return Ok(Call::Expired);
        }
        Ok(Call::Done(res))
    }

    async fn load_session(&self) -> Option<Session> {
        let content = fs::read_to_string(&self.session_file).await.ok()?;
        match serde_json::from_str::<Session>(&content) {
            Ok(s) => Some(s),
            Err(err) => {
                warn!(%err, path = %self.session_file.display(), "ignoring unreadable session file");
                None
            }
        }
    }

    async fn save_session(&self, session: &Session) {
        let result = async {
            if let Some(parent) = self.session_file.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).await?;
                }
            }
            let body = serde_json::to_vec_pretty(session)?;
            fs::write(&self.session_file, body).await?;
            anyhow::Ok(())
        }
        .await;
        match result {
            Ok(()) => info!(path = %self.session_file.display(), "session saved"),
            Err(err) => error!(?err, path = %self.session_file.display(), "failed to save session"),
        }
    }

    /// Resume a saved session if the platform still accepts it.
    async fn resume_session(&self) -> Result<bool> {
        let Some(saved) = self.load_session().await else {
            return Ok(false);
        };
        if !self.username.is_empty() && saved.username != self.username {
            info!("saved session belongs to another account; ignoring");
            return Ok(false);
        }
        *self.session.lock().await = Some(saved);
        match self
            .call(Method::GET, &["v1", "accounts", "current_user"], None)
            .await?
        {
            Call::Done(res) if res.status().is_success() => Ok(true),
            Call::Done(res) => {
                warn!(status = %res.status(), "saved session check failed");
                *self.session.lock().await = None;
                Ok(false)
            }
            Call::Expired => {
                *self.session.lock().await = None;
                Ok(false)
            }
        }
    }

    async fn login_with_credentials(&self) -> Result<bool> {
        if self.username.trim().is_empty() || self.password.is_empty() {
            error!("platform credentials not configured (IG_USERNAME / IG_PASSWORD)");
            return Ok(false);
        }
        info!(username = %self.username, "logging in with credentials");
        let body = json!({ "username": self.username, "password": self.password });
        let request =
            self.build_request(Method::POST, &["v1", "accounts", "login"], None, Some(&body))?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach platform")?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            error!(%status, body = %text, "login rejected");
            return Ok(false);
        }
        let payload: LoginResponse = res.json().await.context("invalid login response")?;
        let session = Session {
            username: self.username.clone(),
            session_token: payload.session_token,
        };
        self.save_session(&session).await;
        *self.session.lock().await = Some(session);
        Ok(true)
    }

    /// One lookup + send; `Call::Expired` bubbles up for the relogin path.
    async fn try_send(&self, username: &str, text: &str) -> Result<Option<bool>> {
        let res = match self.call(Method::GET, &["v1", "users", username], None).await? {
            Call::Done(res) => res,
            Call::Expired => return Ok(None),
        };
        if res.status() == StatusCode::NOT_FOUND {
            error!(username, "could not find user id");
            return Ok(Some(false));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            error!(username, %status, %body, "user lookup failed");
            return Ok(Some(false));
        }
        let user: UserLookupResponse = res.json().await.context("invalid user lookup response")?;

        let body = json!({ "recipient_ids": [user.id], "text": text });
        let res = match self
            .call(Method::POST, &["v1", "direct", "send"], Some(&body))
            .await?
        {
            Call::Done(res) => res,
            Call::Expired => return Ok(None),
        };
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            error!(username, %status, %body, "failed to send message");
            return Ok(Some(false));
        }
        info!(username, "message sent");
        Ok(Some(true))
    }
}

#[async_trait]
impl DirectMessenger for HttpPlatformClient {
    async fn login(&self) -> Result<bool> {
        match self.resume_session().await {
            Ok(true) => {
                info!("logged in using saved session");
                return Ok(true);
            }
            Ok(false) => {}
            Err(err) => warn!(?err, "failed to resume session"),
        }
        self.login_with_credentials().await
    }

    async fn send_direct_message(&self, username: &str, text: &str) -> Result<bool> {
        if self.current_token().await.is_none() && !self.login().await? {
            return Ok(false);
        }
        if let Some(sent) = self.try_send(username, text).await? {
            return Ok(sent);
        }
        // Session expired: one fresh login, one resend.
        warn!(username, "session expired, attempting to relogin");
        *self.session.lock().await = None;
        if !self.login_with_credentials().await? {
            return Ok(false);
        }
        match self.try_send(username, text).await? {
            Some(sent) => Ok(sent),
            None => {
                error!(username, "session rejected again after relogin");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Mock, Server};
    use std::path::Path;
    use tempfile::tempdir;

    fn client(session_file: PathBuf) -> HttpPlatformClient {
        HttpPlatformClient::new(
            Url::parse("https://gateway.test/").unwrap(),
            "brand".into(),
            "secret".into(),
            session_file,
        )
        .unwrap()
    }

    #[test]
    fn build_request_sets_auth_and_body() {
        let c = client(PathBuf::from("session.json"));
        let body = json!({ "text": "hi" });
        let req = c
            .build_request(Method::POST, &["v1", "direct", "send"], Some("tok"), Some(&body))
            .unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.url().as_str(), "https://gateway.test/v1/direct/send");
        let headers = req.headers();
        assert_eq!(
            headers.get("Authorization").and_then(|h| h.to_str().ok()),
            Some("Bearer tok")
        );
        assert_eq!(
            headers.get("Content-Type").and_then(|h| h.to_str().ok()),
            Some("application/json")
        );
    }

    #[test]
    fn build_request_without_token_has_no_auth_header() {
        let c = client(PathBuf::from("session.json"));
        let req = c
            .build_request(Method::GET, &["v1", "users", "ana"], None, None)
            .unwrap();
        assert!(req.headers().get("Authorization").is_none());
        assert_eq!(req.url().path(), "/v1/users/ana");
    }

    #[test]
    fn usernames_are_encoded_as_one_segment() {
        let c = client(PathBuf::from("session.json"));
        let req = c
            .build_request(Method::GET, &["v1", "users", "a/b?c#d"], None, None)
            .unwrap();
        assert_eq!(req.url().path(), "/v1/users/a%2Fb%3Fc%23d");
        assert_eq!(req.url().query(), None);
        assert_eq!(req.url().fragment(), None);

        let req = c
            .build_request(Method::GET, &["v1", "users", ".."], None, None)
            .unwrap();
        assert!(req.url().path().starts_with("/v1/users"));
    }

    #[test]
    fn base_url_path_is_kept() {
        let c = HttpPlatformClient::new(
            Url::parse("https://gateway.test/api/").unwrap(),
            "brand".into(),
            "secret".into(),
            PathBuf::from("session.json"),
        )
        .unwrap();
        let req = c
            .build_request(Method::GET, &["v1", "accounts", "current_user"], None, None)
            .unwrap();
        assert_eq!(req.url().as_str(), "https://gateway.test/api/v1/accounts/current_user");
    }

    #[tokio::test]
    async fn session_round_trips_through_file() {
        let td = tempdir().unwrap();
        let path = td.path().join("data").join("session.json");
        let c = client(path.clone());
        let session = Session {
            username: "brand".into(),
            session_token: "tok-1".into(),
        };
        c.save_session(&session).await;
        assert!(path.exists());
        assert_eq!(c.load_session().await, Some(session));
    }

    #[tokio::test]
    async fn missing_credentials_refuse_login_without_network() {
        let td = tempdir().unwrap();
        let c = HttpPlatformClient::new(
            Url::parse("https://gateway.test/").unwrap(),
            String::new(),
            String::new(),
            td.path().join("session.json"),
        )
        .unwrap();
        assert!(!c.login().await.unwrap());
    }

    fn gateway_client(server: &Server, session_file: PathBuf) -> HttpPlatformClient {
        HttpPlatformClient::new(
            Url::parse(&server.url()).unwrap(),
            "brand".into(),
            "secret".into(),
            session_file,
        )
        .unwrap()
    }

    fn write_session(path: &Path, token: &str) {
        let session = Session {
            username: "brand".into(),
            session_token: token.into(),
        };
        std::fs::write(path, serde_json::to_vec(&session).unwrap()).unwrap();
    }

    async fn current_user(server: &mut Server, token: &str, status: usize) -> Mock {
        server
            .mock("GET", "/v1/accounts/current_user")
            .match_header("authorization", format!("Bearer {}", token).as_str())
            .with_status(status)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await
    }

    async fn credential_login(server: &mut Server, token: &str, hits: usize) -> Mock {
        server
            .mock("POST", "/v1/accounts/login")
            .match_body(Matcher::Json(
                json!({ "username": "brand", "password": "secret" }),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "session_token": token }).to_string())
            .expect(hits)
            .create_async()
            .await
    }

    async fn lookup(server: &mut Server, username: &str, status: usize, hits: usize) -> Mock {
        server
            .mock("GET", format!("/v1/users/{}", username).as_str())
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"42"}"#)
            .expect(hits)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn saved_session_is_reused_without_credential_login() {
        let mut server = Server::new_async().await;
        let td = tempdir().unwrap();
        let session_file = td.path().join("session.json");
        write_session(&session_file, "saved");

        let check = current_user(&mut server, "saved", 200).await;
        let login = credential_login(&mut server, "unused", 0).await;

        let c = gateway_client(&server, session_file);
        assert!(c.login().await.unwrap());
        assert_eq!(c.current_token().await.as_deref(), Some("saved"));
        check.assert_async().await;
        login.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_saved_session_falls_back_to_credentials() {
        let mut server = Server::new_async().await;
        let td = tempdir().unwrap();
        let session_file = td.path().join("session.json");
        write_session(&session_file, "old");

        let check = current_user(&mut server, "old", 401).await;
        let login = credential_login(&mut server, "fresh", 1).await;

        let c = gateway_client(&server, session_file.clone());
        assert!(c.login().await.unwrap());
        check.assert_async().await;
        login.assert_async().await;
        let saved = c.load_session().await.unwrap();
        assert_eq!(saved.session_token, "fresh");
    }

    #[tokio::test]
    async fn expired_session_relogs_in_once_and_resends() {
        let mut server = Server::new_async().await;
        let td = tempdir().unwrap();
        let session_file = td.path().join("session.json");
        write_session(&session_file, "stale");

        let check = current_user(&mut server, "stale", 200).await;
        let user = lookup(&mut server, "ana", 200, 2).await;
        let stale_send = server
            .mock("POST", "/v1/direct/send")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let login = credential_login(&mut server, "fresh", 1).await;
        let fresh_send = server
            .mock("POST", "/v1/direct/send")
            .match_header("authorization", "Bearer fresh")
            .match_body(Matcher::PartialJson(
                json!({ "recipient_ids": ["42"], "text": "hi ana" }),
            ))
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        let c = gateway_client(&server, session_file);
        assert!(c.send_direct_message("ana", "hi ana").await.unwrap());
        for mock in [check, user, stale_send, login, fresh_send] {
            mock.assert_async().await;
        }
        assert_eq!(c.current_token().await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn second_expiry_after_relogin_declines() {
        let mut server = Server::new_async().await;
        let td = tempdir().unwrap();
        let session_file = td.path().join("session.json");
        write_session(&session_file, "stale");

        let check = current_user(&mut server, "stale", 200).await;
        let user = lookup(&mut server, "ana", 200, 2).await;
        let send = server
            .mock("POST", "/v1/direct/send")
            .with_status(401)
            .expect(2)
            .create_async()
            .await;
        let login = credential_login(&mut server, "fresh", 1).await;

        let c = gateway_client(&server, session_file);
        assert!(!c.send_direct_message("ana", "hi").await.unwrap());
        for mock in [check, user, send, login] {
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn unknown_user_and_rejected_send_decline() {
        let mut server = Server::new_async().await;
        let td = tempdir().unwrap();
        let session_file = td.path().join("session.json");
        write_session(&session_file, "tok");

        let check = current_user(&mut server, "tok", 200).await;
        let ghost = lookup(&mut server, "ghost", 404, 1).await;
        let bob = lookup(&mut server, "bob", 200, 1).await;
        let send = server
            .mock("POST", "/v1/direct/send")
            .with_status(500)
            .with_body("try later")
            .expect(1)
            .create_async()
            .await;
        let login = credential_login(&mut server, "unused", 0).await;

        let c = gateway_client(&server, session_file);
        assert!(!c.send_direct_message("ghost", "hi").await.unwrap());
        assert!(!c.send_direct_message("bob", "hi").await.unwrap());
        for mock in [check, ghost, bob, send, login] {
            mock.assert_async().await;
        }
    }
}

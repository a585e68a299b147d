use super::{AuthBackend, AuthEvent, AuthListeners, OWNER_COLUMN, RemoteError, RemoteStore, Row, Session, Table, User};
use crate::config::SupabaseConfig;
use chrono::Utc;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| Utc::now().timestamp() + self.expires_in.unwrap_or(3600));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

/// PostgREST tables and GoTrue e-mail/password auth for one Supabase project.
pub struct SupabaseClient {
    http: Client,
    base_url: String,
    anon_key: String,
    session_path: PathBuf,
    session: Mutex<Option<Session>>,
    listeners: AuthListeners,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig, session_path: PathBuf) -> Result<Self, RemoteError> {
        if !config.enabled {
            return Err(RemoteError::NotConfigured(
                "enable [supabase] in config.toml".to_string(),
            ));
        }
        if !config.is_configured() {
            return Err(RemoteError::NotConfigured(
                "supabase url/anon_key required in config.toml".to_string(),
            ));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            base_url: config.url.trim().trim_end_matches('/').to_string(),
            anon_key: config.anon_key.trim().to_string(),
            session_path,
            session: Mutex::new(None),
            listeners: AuthListeners::default(),
        })
    }

    fn rest_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn with_key(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("apikey", &self.anon_key)
    }

    fn current_session(&self) -> Option<Session> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    fn set_session(&self, session: Option<Session>) -> Result<(), RemoteError> {
        if let Ok(mut slot) = self.session.lock() {
            *slot = session.clone();
        }
        match session {
            Some(session) => save_session(&self.session_path, &session),
            None => remove_session(&self.session_path),
        }
    }

    /// Bearer token for table requests, refreshing an expired session first.
    fn access_token(&self) -> Result<String, RemoteError> {
        let session = self.current_session().ok_or(RemoteError::NotAuthenticated)?;
        if !session.is_expired(Utc::now().timestamp()) {
            return Ok(session.access_token);
        }
        match self.refresh(&session.refresh_token) {
            Ok(fresh) => {
                let token = fresh.access_token.clone();
                self.set_session(Some(fresh))?;
                Ok(token)
            }
            Err(err) => {
                tracing::warn!(error = %err, "session refresh failed");
                self.set_session(None)?;
                self.listeners.notify(&AuthEvent::SignedOut);
                Err(RemoteError::NotAuthenticated)
            }
        }
    }

    fn refresh(&self, refresh_token: &str) -> Result<Session, RemoteError> {
        let resp = self
            .with_key(self.http.post(self.auth_url("token")))
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }))
            .send()?;
        let token: TokenResponse = check(resp)?
            .json()
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(token.into_session())
    }

    fn establish(&self, session: Session) -> Result<Session, RemoteError> {
        self.set_session(Some(session.clone()))?;
        tracing::info!(user = %session.user.id, "signed in");
        self.listeners.notify(&AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }
}

impl RemoteStore for SupabaseClient {
    fn select_all(&self, table: Table, owner: &str) -> Result<Vec<Row>, RemoteError> {
        let token = self.access_token()?;
        let owner_filter = format!("eq.{owner}");
        let mut query = vec![("select", "*"), (OWNER_COLUMN, owner_filter.as_str())];
        if table == Table::ChatSessions {
            query.push(("order", "updated_at.desc"));
        }
        let resp = self
            .with_key(self.http.get(self.rest_url(table)))
            .bearer_auth(token)
            .query(&query)
            .send()?;
        let rows: Vec<Row> = check(resp)?
            .json()
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        tracing::debug!(table = table.name(), rows = rows.len(), "selected");
        Ok(rows)
    }

    fn delete_all(&self, table: Table, owner: &str) -> Result<(), RemoteError> {
        let token = self.access_token()?;
        let resp = self
            .with_key(self.http.delete(self.rest_url(table)))
            .bearer_auth(token)
            .header("Prefer", "return=minimal")
            .query(&[(OWNER_COLUMN, format!("eq.{owner}"))])
            .send()?;
        check(resp)?;
        Ok(())
    }

    fn insert_many(&self, table: Table, rows: Vec<Row>) -> Result<(), RemoteError> {
        let token = self.access_token()?;
        let resp = self
            .with_key(self.http.post(self.rest_url(table)))
            .bearer_auth(token)
            .header("Prefer", "return=minimal")
            .json(&rows)
            .send()?;
        check(resp)?;
        tracing::debug!(table = table.name(), rows = rows.len(), "inserted");
        Ok(())
    }
}

impl AuthBackend for SupabaseClient {
    /// In-memory session, else the persisted one. Restoring from disk
    /// announces `SignedIn` to subscribers.
    fn get_session(&self) -> Result<Option<Session>, RemoteError> {
        if let Some(session) = self.current_session() {
            return Ok(Some(session));
        }
        let Some(stored) = load_session(&self.session_path) else {
            return Ok(None);
        };
        let session = if stored.is_expired(Utc::now().timestamp()) {
            match self.refresh(&stored.refresh_token) {
                Ok(fresh) => fresh,
                Err(err) => {
                    tracing::warn!(error = %err, "stored session could not be refreshed");
                    remove_session(&self.session_path)?;
                    return Ok(None);
                }
            }
        } else {
            stored
        };
        self.establish(session).map(Some)
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Session, RemoteError> {
        let resp = self
            .with_key(self.http.post(self.auth_url("token")))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))
            .send()?;
        let token: TokenResponse = check(resp)?
            .json()
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        self.establish(token.into_session())
    }

    fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, RemoteError> {
        let resp = self
            .with_key(self.http.post(self.auth_url("signup")))
            .json(&json!({ "email": email, "password": password }))
            .send()?;
        let body: Value = check(resp)?
            .json()
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        if body.get("access_token").is_none() {
            tracing::info!("sign-up pending e-mail confirmation");
            return Ok(None);
        }
        let token: TokenResponse =
            serde_json::from_value(body).map_err(|e| RemoteError::Decode(e.to_string()))?;
        self.establish(token.into_session()).map(Some)
    }

    fn sign_out(&self) -> Result<(), RemoteError> {
        if let Some(session) = self.current_session() {
            let result = self
                .with_key(self.http.post(self.auth_url("logout")))
                .bearer_auth(&session.access_token)
                .send();
            match result {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::warn!(status = %resp.status(), "remote logout rejected");
                }
                Err(err) => tracing::warn!(error = %err, "remote logout failed"),
                Ok(_) => {}
            }
        }
        self.set_session(None)?;
        tracing::info!("signed out");
        self.listeners.notify(&AuthEvent::SignedOut);
        Ok(())
    }

    fn subscribe(&self) -> std::sync::mpsc::Receiver<AuthEvent> {
        self.listeners.subscribe()
    }
}

fn check(resp: Response) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(RemoteError::Http {
        status: status.as_u16(),
        message: format_api_error(&body),
    })
}

fn format_api_error(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response".to_string();
    }
    match serde_json::from_str::<ApiErrorBody>(trimmed) {
        Ok(err) => err
            .error_description
            .or(err.msg)
            .or(err.message)
            .or(err.error)
            .unwrap_or_else(|| truncate_error(trimmed)),
        Err(_) => truncate_error(trimmed),
    }
}

fn truncate_error(message: &str) -> String {
    let mut out = message.replace(['\n', '\r'], " ");
    if out.len() > 240 {
        let mut cut = 240;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out.push_str("...");
    }
    out
}

fn load_session(path: &Path) -> Option<Session> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(session) => Some(session),
        Err(err) => {
            tracing::warn!(error = %err, "ignoring unreadable session file");
            None
        }
    }
}

fn save_session(path: &Path, session: &Session) -> Result<(), RemoteError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content =
        serde_json::to_string_pretty(session).map_err(|e| RemoteError::Decode(e.to_string()))?;
    fs::write(path, content)?;
    Ok(())
}

fn remove_session(path: &Path) -> Result<(), RemoteError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

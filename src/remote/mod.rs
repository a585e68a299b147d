pub mod supabase;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

pub use supabase::SupabaseClient;

/// One remote row: a JSON object with column names as keys.
pub type Row = Map<String, Value>;

pub const OWNER_COLUMN: &str = "user_id";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    Tasks,
    Events,
    Notes,
    ChatSessions,
}

impl Table {
    #[cfg(test)]
    pub const ALL: [Table; 4] = [Table::Tasks, Table::Events, Table::Notes, Table::ChatSessions];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Tasks => "tasks",
            Table::Events => "events",
            Table::Notes => "notes",
            Table::ChatSessions => "chat_sessions",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("cloud sync is not configured: {0}")]
    NotConfigured(String),
    #[error("not signed in")]
    NotAuthenticated,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("session file: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub expires_at: i64,
    pub user: User,
}

impl Session {
    /// Treats a token within a minute of expiry as already expired.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now + 60
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
}

/// Owner-scoped bulk access to the four synced tables.
pub trait RemoteStore: Send + Sync {
    fn select_all(&self, table: Table, owner: &str) -> Result<Vec<Row>, RemoteError>;
    fn delete_all(&self, table: Table, owner: &str) -> Result<(), RemoteError>;
    fn insert_many(&self, table: Table, rows: Vec<Row>) -> Result<(), RemoteError>;
}

pub trait AuthBackend: Send + Sync {
    fn get_session(&self) -> Result<Option<Session>, RemoteError>;
    fn sign_in(&self, email: &str, password: &str) -> Result<Session, RemoteError>;
    /// `None` when the backend requires e-mail confirmation before a session exists.
    fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, RemoteError>;
    fn sign_out(&self) -> Result<(), RemoteError>;
    fn subscribe(&self) -> Receiver<AuthEvent>;
}

/// Fan-out of auth events to every live subscriber. Dropped receivers are
/// pruned on the next send.
#[derive(Default)]
pub struct AuthListeners {
    senders: Mutex<Vec<Sender<AuthEvent>>>,
}

impl AuthListeners {
    pub fn subscribe(&self) -> Receiver<AuthEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    pub fn notify(&self, event: &AuthEvent) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

#[derive(Debug)]
pub enum SignInOutcome {
    SignedIn(Session),
    ConfirmationRequired,
}

/// Signs in, and when that fails and `auto_sign_up` is set, tries to create
/// the account with the same credentials.
pub fn sign_in_or_sign_up(
    auth: &dyn AuthBackend,
    email: &str,
    password: &str,
    auto_sign_up: bool,
) -> Result<SignInOutcome, RemoteError> {
    match auth.sign_in(email, password) {
        Ok(session) => Ok(SignInOutcome::SignedIn(session)),
        Err(err) if auto_sign_up && !matches!(err, RemoteError::Request(_)) => {
            tracing::warn!(error = %err, "sign-in failed, attempting sign-up with the same credentials");
            match auth.sign_up(email, password)? {
                Some(session) => Ok(SignInOutcome::SignedIn(session)),
                None => Ok(SignInOutcome::ConfirmationRequired),
            }
        }
        Err(err) => Err(err),
    }
}

pub fn spawn_sign_in(
    auth: Arc<dyn AuthBackend>,
    email: String,
    password: String,
    auto_sign_up: bool,
) -> Receiver<Result<SignInOutcome, RemoteError>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = sign_in_or_sign_up(auth.as_ref(), &email, &password, auto_sign_up);
        let _ = tx.send(result);
    });
    rx
}

pub fn spawn_sign_out(auth: Arc<dyn AuthBackend>) -> Receiver<Result<(), RemoteError>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(auth.sign_out());
    });
    rx
}

/// Restores a persisted session off the UI thread. Subscribers hear about
/// a restored session through the usual `SignedIn` event.
pub fn spawn_restore_session(auth: Arc<dyn AuthBackend>) -> Receiver<Result<Option<Session>, RemoteError>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(auth.get_session());
    });
    rx
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory tables keyed by `Table`, with per-operation call counters.
    #[derive(Default)]
    pub struct MemoryStore {
        tables: Mutex<HashMap<Table, Vec<Row>>>,
        next_row: AtomicUsize,
        pub selects: AtomicUsize,
        pub deletes: AtomicUsize,
        pub inserts: AtomicUsize,
        pub fail: AtomicBool,
    }

    impl MemoryStore {
        pub fn rows(&self, table: Table) -> Vec<Row> {
            self.tables
                .lock()
                .map(|t| t.get(&table).cloned().unwrap_or_default())
                .unwrap_or_default()
        }

        pub fn seed(&self, table: Table, rows: Vec<Row>) {
            if let Ok(mut tables) = self.tables.lock() {
                tables.entry(table).or_default().extend(rows);
            }
        }

        pub fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<(), RemoteError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(RemoteError::Http {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    impl RemoteStore for MemoryStore {
        fn select_all(&self, table: Table, owner: &str) -> Result<Vec<Row>, RemoteError> {
            self.selects.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(self
                .rows(table)
                .into_iter()
                .filter(|row| row.get(OWNER_COLUMN).and_then(Value::as_str) == Some(owner))
                .collect())
        }

        fn delete_all(&self, table: Table, owner: &str) -> Result<(), RemoteError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            if let Ok(mut tables) = self.tables.lock() {
                tables
                    .entry(table)
                    .or_default()
                    .retain(|row| row.get(OWNER_COLUMN).and_then(Value::as_str) != Some(owner));
            }
            Ok(())
        }

        fn insert_many(&self, table: Table, rows: Vec<Row>) -> Result<(), RemoteError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            let mut assigned = Vec::with_capacity(rows.len());
            for mut row in rows {
                if !row.contains_key("id") {
                    let n = self.next_row.fetch_add(1, Ordering::SeqCst);
                    row.insert("id".to_string(), Value::String(format!("row-{n}")));
                }
                assigned.push(row);
            }
            if let Ok(mut tables) = self.tables.lock() {
                tables.entry(table).or_default().extend(assigned);
            }
            Ok(())
        }
    }
}

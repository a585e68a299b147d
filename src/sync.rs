use crate::models::{CalendarEvent, ChatSession, Note, Task};
use crate::remote::{AuthEvent, OWNER_COLUMN, RemoteError, RemoteStore, Row, Table, User};
use crate::workspace::{RemoteSnapshot, Workspace};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    SignedOut,
    Pulling,
    IdleSignedIn,
    Pushing,
}

/// Single-deadline debounce. Every `schedule` pushes the deadline out to
/// `now + window`.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// True once the deadline has passed; clears it.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

enum Job {
    Pull(Result<RemoteSnapshot, RemoteError>),
    Push(Result<usize, RemoteError>),
}

struct Outcome {
    generation: u64,
    job: Job,
}

/// What the UI should tell the user after a background job finishes.
#[derive(Debug, PartialEq)]
pub enum SyncNotice {
    Pulled { tables: usize },
    Pushed { rows: usize },
    Failed(String),
}

pub struct SyncCoordinator {
    store: Arc<dyn RemoteStore>,
    state: SyncState,
    user: Option<User>,
    pull_done: bool,
    debouncer: Debouncer,
    generation: u64,
    tx: Sender<Outcome>,
    rx: Receiver<Outcome>,
}

impl SyncCoordinator {
    pub fn new(store: Arc<dyn RemoteStore>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            store,
            state: SyncState::SignedOut,
            user: None,
            pull_done: false,
            debouncer: Debouncer::new(debounce),
            generation: 0,
            tx,
            rx,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    #[cfg(test)]
    pub fn pull_done(&self) -> bool {
        self.pull_done
    }

    pub fn is_syncing(&self) -> bool {
        matches!(self.state, SyncState::Pulling | SyncState::Pushing)
    }

    pub fn push_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Returns true when the event started a pull.
    pub fn on_auth_event(&mut self, event: AuthEvent) -> bool {
        match event {
            AuthEvent::SignedIn(session) => {
                let same_user = self.user.as_ref().is_some_and(|u| u.id == session.user.id);
                if !same_user && self.user.is_some() {
                    // Account switch without a sign-out in between.
                    self.reset();
                }
                self.user = Some(session.user);
                if self.pull_done || self.state == SyncState::Pulling {
                    if self.state == SyncState::SignedOut {
                        self.state = SyncState::IdleSignedIn;
                    }
                    return false;
                }
                self.start_pull();
                true
            }
            AuthEvent::SignedOut => {
                self.reset();
                false
            }
        }
    }

    fn reset(&mut self) {
        self.user = None;
        self.pull_done = false;
        self.debouncer.cancel();
        self.generation += 1;
        self.state = SyncState::SignedOut;
    }

    /// Called whenever tasks, events, notes or chat sessions changed locally.
    pub fn on_local_change(&mut self, now: Instant) {
        if self.user.is_some() {
            self.debouncer.schedule(now);
        }
    }

    /// Starts a push when the debounce deadline has passed. Returns true if
    /// a push was started.
    pub fn poll_due(&mut self, now: Instant, workspace: &Workspace) -> bool {
        if !self.debouncer.fire(now) {
            return false;
        }
        let Some(owner) = self.user.as_ref().map(|u| u.id.clone()) else {
            return false;
        };
        if !self.pull_done {
            return false;
        }
        if self.is_syncing() {
            self.debouncer.schedule(now);
            return false;
        }
        let batches = push_batches(workspace, &owner);
        self.state = SyncState::Pushing;
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        let generation = self.generation;
        tracing::debug!(user = %owner, "push started");
        thread::spawn(move || {
            let result = push(store.as_ref(), &owner, batches);
            let _ = tx.send(Outcome {
                generation,
                job: Job::Push(result),
            });
        });
        true
    }

    fn start_pull(&mut self) {
        let Some(owner) = self.user.as_ref().map(|u| u.id.clone()) else {
            return;
        };
        self.state = SyncState::Pulling;
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        let generation = self.generation;
        tracing::debug!(user = %owner, "pull started");
        thread::spawn(move || {
            let result = pull(store.as_ref(), &owner);
            let _ = tx.send(Outcome {
                generation,
                job: Job::Pull(result),
            });
        });
    }

    /// Applies finished background jobs to the workspace.
    pub fn drain(&mut self, workspace: &mut Workspace) -> Vec<SyncNotice> {
        let mut notices = Vec::new();
        while let Ok(outcome) = self.rx.try_recv() {
            if let Some(notice) = self.apply(outcome, workspace) {
                notices.push(notice);
            }
        }
        notices
    }

    fn apply(&mut self, outcome: Outcome, workspace: &mut Workspace) -> Option<SyncNotice> {
        if outcome.generation != self.generation {
            tracing::debug!("discarding sync result from a previous session");
            return None;
        }
        self.state = SyncState::IdleSignedIn;
        match outcome.job {
            Job::Pull(Ok(snapshot)) => {
                let tables = [
                    snapshot.tasks.is_some(),
                    snapshot.events.is_some(),
                    snapshot.notes.is_some(),
                    snapshot.sessions.is_some(),
                ]
                .iter()
                .filter(|present| **present)
                .count();
                workspace.apply_remote(snapshot);
                self.pull_done = true;
                // Upload the local workspace even when nothing was replaced.
                self.debouncer.schedule(Instant::now());
                tracing::info!(tables, "initial pull complete");
                Some(SyncNotice::Pulled { tables })
            }
            Job::Push(Ok(rows)) => {
                tracing::info!(rows, "push complete");
                Some(SyncNotice::Pushed { rows })
            }
            Job::Pull(Err(err)) => {
                tracing::warn!(error = %err, "pull failed");
                Some(SyncNotice::Failed(format!("Cloud pull failed: {err}")))
            }
            Job::Push(Err(err)) => {
                tracing::warn!(error = %err, "push failed");
                Some(SyncNotice::Failed(format!("Cloud push failed: {err}")))
            }
        }
    }

    #[cfg(test)]
    fn wait(&mut self, workspace: &mut Workspace) -> Option<SyncNotice> {
        let outcome = self.rx.recv_timeout(Duration::from_secs(5)).ok()?;
        self.apply(outcome, workspace)
    }
}

fn pull(store: &dyn RemoteStore, owner: &str) -> Result<RemoteSnapshot, RemoteError> {
    let (tasks, events, notes, sessions) = thread::scope(|s| {
        let tasks = s.spawn(|| store.select_all(Table::Tasks, owner));
        let events = s.spawn(|| store.select_all(Table::Events, owner));
        let notes = s.spawn(|| store.select_all(Table::Notes, owner));
        let sessions = s.spawn(|| store.select_all(Table::ChatSessions, owner));
        (joined(tasks), joined(events), joined(notes), joined(sessions))
    });

    Ok(RemoteSnapshot {
        tasks: non_empty(decode_rows::<Task>(Table::Tasks, tasks?)),
        events: non_empty(decode_rows::<CalendarEvent>(Table::Events, events?)),
        notes: non_empty(decode_rows::<Note>(Table::Notes, notes?)),
        sessions: non_empty(decode_rows::<ChatSession>(
            Table::ChatSessions,
            sessions?.into_iter().map(session_from_row).collect(),
        )),
    })
}

fn push(
    store: &dyn RemoteStore,
    owner: &str,
    batches: Vec<(Table, Vec<Row>)>,
) -> Result<usize, RemoteError> {
    let results: Vec<Result<usize, RemoteError>> = thread::scope(|s| {
        let handles: Vec<_> = batches
            .into_iter()
            .map(|(table, rows)| {
                s.spawn(move || -> Result<usize, RemoteError> {
                    store.delete_all(table, owner)?;
                    let count = rows.len();
                    if count > 0 {
                        store.insert_many(table, rows)?;
                    }
                    Ok(count)
                })
            })
            .collect();
        handles.into_iter().map(joined).collect()
    });

    let mut total = 0;
    for result in results {
        total += result?;
    }
    Ok(total)
}

fn joined<T>(handle: ScopedJoinHandle<'_, Result<T, RemoteError>>) -> Result<T, RemoteError> {
    handle
        .join()
        .unwrap_or_else(|_| Err(RemoteError::Decode("sync worker panicked".to_string())))
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() { None } else { Some(items) }
}

/// Decodes rows, skipping any that do not fit the local shape. Numeric ids
/// assigned by the database become strings.
fn decode_rows<T: DeserializeOwned>(table: Table, rows: Vec<Row>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|mut row| {
            if let Some(Value::Number(id)) = row.get("id") {
                let id = id.to_string();
                row.insert("id".to_string(), Value::String(id));
            }
            match serde_json::from_value::<T>(Value::Object(row)) {
                Ok(item) => Some(item),
                Err(err) => {
                    tracing::warn!(table = table.name(), error = %err, "skipping remote row");
                    None
                }
            }
        })
        .collect()
}

fn session_from_row(row: Row) -> Row {
    let messages = match row.get("messages") {
        Some(Value::Array(messages)) => Value::Array(messages.clone()),
        _ => Value::Array(Vec::new()),
    };
    let mut mapped = Row::new();
    mapped.insert("id".to_string(), row.get("id").cloned().unwrap_or(Value::Null));
    mapped.insert("title".to_string(), row.get("title").cloned().unwrap_or(Value::Null));
    mapped.insert("messages".to_string(), messages);
    mapped.insert(
        "updatedAt".to_string(),
        row.get("updated_at").cloned().unwrap_or(Value::Null),
    );
    mapped
}

/// Local collections as remote rows. Tasks, events and notes drop their
/// client id and let the database assign one; chat sessions keep theirs.
pub fn push_batches(workspace: &Workspace, owner: &str) -> Vec<(Table, Vec<Row>)> {
    vec![
        (Table::Tasks, entity_rows(&workspace.tasks, owner)),
        (Table::Events, entity_rows(&workspace.events, owner)),
        (Table::Notes, entity_rows(&workspace.notes, owner)),
        (Table::ChatSessions, session_rows(&workspace.sessions, owner)),
    ]
}

fn entity_rows<T: Serialize>(items: &[T], owner: &str) -> Vec<Row> {
    items
        .iter()
        .filter_map(|item| match serde_json::to_value(item) {
            Ok(Value::Object(mut row)) => {
                row.remove("id");
                row.insert(OWNER_COLUMN.to_string(), Value::String(owner.to_string()));
                Some(row)
            }
            _ => None,
        })
        .collect()
}

fn session_rows(sessions: &[ChatSession], owner: &str) -> Vec<Row> {
    sessions
        .iter()
        .filter_map(|session| {
            let value = json!({
                "id": session.id,
                "title": session.title,
                "messages": session.messages,
                "updated_at": session.updated_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            });
            match value {
                Value::Object(mut row) => {
                    row.insert(OWNER_COLUMN.to_string(), Value::String(owner.to_string()));
                    Some(row)
                }
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, ChatRole, Priority};
    use crate::remote::Session;
    use crate::remote::memory::MemoryStore;
    use std::sync::atomic::Ordering;

    const WINDOW: Duration = Duration::from_millis(3000);

    fn signed_in(user: &str) -> AuthEvent {
        AuthEvent::SignedIn(Session {
            access_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: 4_000_000_000,
            user: User {
                id: user.to_string(),
                email: None,
            },
        })
    }

    fn row(value: Value) -> Row {
        match value {
            Value::Object(row) => row,
            _ => Row::new(),
        }
    }

    fn ready(store: &Arc<MemoryStore>, ws: &mut Workspace) -> SyncCoordinator {
        let mut coordinator = SyncCoordinator::new(store.clone(), WINDOW);
        assert!(coordinator.on_auth_event(signed_in("u1")));
        assert!(matches!(coordinator.wait(ws), Some(SyncNotice::Pulled { .. })));
        assert!(coordinator.pull_done());
        coordinator
    }

    #[test]
    fn debouncer_reschedules_on_every_change() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.schedule(start);
        debouncer.schedule(start + Duration::from_millis(2000));
        assert!(!debouncer.fire(start + Duration::from_millis(3500)));
        assert!(debouncer.fire(start + Duration::from_millis(5000)));
        assert!(!debouncer.fire(start + Duration::from_millis(9000)));
    }

    #[test]
    fn empty_remote_table_leaves_local_collection_alone() {
        let store = Arc::new(MemoryStore::default());
        store.seed(
            Table::Notes,
            vec![row(json!({
                "id": 42, "user_id": "u1", "title": "Remote", "content": "x",
                "date": "2025-01-01T00:00:00Z"
            }))],
        );
        let mut ws = Workspace::default();
        let local_tasks = ws.tasks.clone();
        ws.add_note("Local", "y");
        ws.take_changes();

        ready(&store, &mut ws);

        assert_eq!(ws.tasks, local_tasks);
        assert_eq!(ws.notes.len(), 1);
        assert_eq!(ws.notes[0].title, "Remote");
        assert_eq!(ws.notes[0].id, "42");
        let changes = ws.changes();
        assert!(changes.notes && !changes.tasks);
    }

    #[test]
    fn first_sign_in_to_empty_account_uploads_local_workspace() {
        let store = Arc::new(MemoryStore::default());
        let mut ws = Workspace::default();
        ws.take_changes();

        let mut coordinator = ready(&store, &mut ws);

        assert!(!ws.changes().synced());
        assert!(coordinator.push_pending());
        assert!(coordinator.poll_due(Instant::now() + WINDOW, &ws));
        assert_eq!(coordinator.wait(&mut ws), Some(SyncNotice::Pushed { rows: 3 }));
        assert_eq!(store.rows(Table::Tasks).len(), 2);
        assert_eq!(store.rows(Table::ChatSessions).len(), 1);
    }

    #[test]
    fn chat_rows_map_to_sessions() {
        let store = Arc::new(MemoryStore::default());
        store.seed(
            Table::ChatSessions,
            vec![row(json!({
                "id": "s1", "user_id": "u1", "title": "Pricing",
                "messages": null, "updated_at": "2025-02-01T10:00:00+00:00"
            }))],
        );
        let mut ws = Workspace::default();
        ready(&store, &mut ws);
        assert_eq!(ws.sessions.len(), 1);
        assert_eq!(ws.sessions[0].title, "Pricing");
        assert!(ws.sessions[0].messages.is_empty());
        assert_eq!(ws.active_session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn second_sign_in_for_same_user_does_not_pull_again() {
        let store = Arc::new(MemoryStore::default());
        let mut ws = Workspace::default();
        let mut coordinator = SyncCoordinator::new(store.clone(), WINDOW);

        assert!(coordinator.on_auth_event(signed_in("u1")));
        assert!(!coordinator.on_auth_event(signed_in("u1")));
        coordinator.wait(&mut ws);
        assert!(!coordinator.on_auth_event(signed_in("u1")));

        assert_eq!(MemoryStore::count(&store.selects), 4);
        assert_eq!(coordinator.state(), SyncState::IdleSignedIn);
    }

    #[test]
    fn sign_out_clears_guard_so_next_sign_in_pulls() {
        let store = Arc::new(MemoryStore::default());
        let mut ws = Workspace::default();
        let mut coordinator = ready(&store, &mut ws);

        coordinator.on_local_change(Instant::now());
        coordinator.on_auth_event(AuthEvent::SignedOut);
        assert_eq!(coordinator.state(), SyncState::SignedOut);
        assert!(!coordinator.pull_done());
        assert!(!coordinator.push_pending());

        assert!(coordinator.on_auth_event(signed_in("u1")));
        coordinator.wait(&mut ws);
        assert_eq!(MemoryStore::count(&store.selects), 8);
    }

    #[test]
    fn rapid_edits_coalesce_into_one_push() {
        let store = Arc::new(MemoryStore::default());
        let mut ws = Workspace::default();
        let mut coordinator = ready(&store, &mut ws);
        let start = Instant::now();

        for offset in [0, 500, 1000] {
            ws.add_task(&format!("edit {offset}"), None, Priority::Low)
                .expect("add");
            coordinator.on_local_change(start + Duration::from_millis(offset));
        }
        assert!(!coordinator.poll_due(start + Duration::from_millis(3500), &ws));
        assert!(coordinator.poll_due(start + Duration::from_millis(4100), &ws));
        assert_eq!(coordinator.state(), SyncState::Pushing);
        assert_eq!(coordinator.wait(&mut ws), Some(SyncNotice::Pushed { rows: 6 }));
        assert!(!coordinator.poll_due(start + Duration::from_millis(9000), &ws));

        assert_eq!(MemoryStore::count(&store.deletes), 4);
        assert_eq!(store.rows(Table::Tasks).len(), 5);
    }

    #[test]
    fn pushing_twice_gives_same_remote_row_count() {
        let store = Arc::new(MemoryStore::default());
        let mut ws = Workspace::default();
        ws.add_note("Idea", "body");
        let mut coordinator = ready(&store, &mut ws);
        let start = Instant::now();

        coordinator.on_local_change(start);
        assert!(coordinator.poll_due(start + WINDOW, &ws));
        coordinator.wait(&mut ws);
        let first: Vec<usize> = Table::ALL.iter().map(|t| store.rows(*t).len()).collect();

        coordinator.on_local_change(start + WINDOW);
        assert!(coordinator.poll_due(start + WINDOW * 2, &ws));
        coordinator.wait(&mut ws);
        let second: Vec<usize> = Table::ALL.iter().map(|t| store.rows(*t).len()).collect();

        assert_eq!(first, vec![2, 0, 1, 1]);
        assert_eq!(first, second);
    }

    #[test]
    fn push_strips_entity_ids_and_keeps_session_ids() {
        let mut ws = Workspace::default();
        let session_id = ws.sessions[0].id.clone();
        ws.append_message(&session_id, ChatMessage::new(ChatRole::User, "hi"))
            .expect("append");
        let batches = push_batches(&ws, "u1");

        let (_, tasks) = &batches[0];
        assert!(tasks.iter().all(|r| !r.contains_key("id")));
        assert!(tasks.iter().all(|r| r.get("user_id") == Some(&json!("u1"))));

        let (table, sessions) = &batches[3];
        assert_eq!(*table, Table::ChatSessions);
        assert_eq!(sessions[0].get("id"), Some(&json!(session_id)));
        assert!(sessions[0].contains_key("updated_at"));
        assert_eq!(sessions[0]["messages"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn no_push_before_initial_pull() {
        let store = Arc::new(MemoryStore::default());
        store.fail.store(true, Ordering::SeqCst);
        let mut ws = Workspace::default();
        let mut coordinator = SyncCoordinator::new(store.clone(), WINDOW);
        coordinator.on_auth_event(signed_in("u1"));
        assert!(matches!(coordinator.wait(&mut ws), Some(SyncNotice::Failed(_))));
        assert!(!coordinator.pull_done());
        assert_eq!(coordinator.state(), SyncState::IdleSignedIn);

        let start = Instant::now();
        coordinator.on_local_change(start);
        assert!(!coordinator.poll_due(start + WINDOW, &ws));
        assert_eq!(MemoryStore::count(&store.deletes), 0);
    }

    #[test]
    fn result_from_previous_session_is_discarded() {
        let store = Arc::new(MemoryStore::default());
        store.seed(
            Table::Tasks,
            vec![row(json!({"id": "r1", "user_id": "u1", "title": "Remote task"}))],
        );
        let mut ws = Workspace::default();
        let mut coordinator = SyncCoordinator::new(store.clone(), WINDOW);
        coordinator.on_auth_event(signed_in("u1"));
        coordinator.on_auth_event(AuthEvent::SignedOut);
        assert_eq!(coordinator.wait(&mut ws), None);
        assert_eq!(ws.tasks.len(), 2);
        assert_eq!(coordinator.state(), SyncState::SignedOut);
    }
}

use crate::date_input::{parse_event_date, parse_event_time};
use crate::models::{
    CalendarEvent, ChatMessage, ChatSession, MarketBriefing, NOTE_TITLE_PLACEHOLDER, Note,
    Priority, Task, TaskStatus, ThemeMode, next_id,
};
use crate::storage::{
    BRIEFING_KEY, EVENTS_KEY, NOTES_KEY, REPORT_KEY, SESSIONS_KEY, TASKS_KEY, THEME_KEY,
};
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

const DEFAULT_EVENT_TIME: (u32, u32) = (12, 0);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum WorkspaceError {
    #[error("invalid date: {0}")]
    InvalidDate(String),
    #[error("invalid time: {0}")]
    InvalidTime(String),
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("no {kind} with id {id}")]
    NotFound { kind: &'static str, id: String },
}

/// Slots touched since the last persist. The sync coordinator only cares
/// about the first four.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Changes {
    pub tasks: bool,
    pub events: bool,
    pub notes: bool,
    pub sessions: bool,
    pub briefing: bool,
    pub report: bool,
    pub theme: bool,
    pub sim_mode: bool,
}

impl Changes {
    #[cfg(test)]
    pub fn all() -> Self {
        Self {
            tasks: true,
            events: true,
            notes: true,
            sessions: true,
            briefing: true,
            report: true,
            theme: true,
            sim_mode: true,
        }
    }

    pub fn any(&self) -> bool {
        *self != Changes::default()
    }

    pub fn synced(&self) -> bool {
        self.tasks || self.events || self.notes || self.sessions
    }
}

/// Collections fetched from the remote store; `None` leaves the local copy alone.
#[derive(Clone, Debug, Default)]
pub struct RemoteSnapshot {
    pub tasks: Option<Vec<Task>>,
    pub events: Option<Vec<CalendarEvent>>,
    pub notes: Option<Vec<Note>>,
    pub sessions: Option<Vec<ChatSession>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Workspace {
    pub tasks: Vec<Task>,
    pub events: Vec<CalendarEvent>,
    pub notes: Vec<Note>,
    pub sessions: Vec<ChatSession>,
    pub active_session_id: Option<String>,
    pub briefing: MarketBriefing,
    pub detailed_report: Option<String>,
    pub theme: ThemeMode,
    pub sim_mode: bool,
    changes: Changes,
}

impl Default for Workspace {
    fn default() -> Self {
        let sessions = default_sessions();
        let active_session_id = sessions.first().map(|s| s.id.clone());
        Self {
            tasks: default_tasks(),
            events: Vec::new(),
            notes: Vec::new(),
            sessions,
            active_session_id,
            briefing: MarketBriefing::default(),
            detailed_report: None,
            theme: ThemeMode::default(),
            sim_mode: false,
            changes: Changes::default(),
        }
    }
}

pub fn default_tasks() -> Vec<Task> {
    vec![
        Task {
            id: "1".to_string(),
            title: "Review Q3 financial statements".to_string(),
            description: Some(
                "Reconcile the balance and check incoming payments from counterparties."
                    .to_string(),
            ),
            status: TaskStatus::Todo,
            priority: Priority::High,
        },
        Task {
            id: "2".to_string(),
            title: "Refresh the landing page".to_string(),
            description: Some("Add a testimonials block and update pricing.".to_string()),
            status: TaskStatus::InProgress,
            priority: Priority::Medium,
        },
    ]
}

pub fn default_sessions() -> Vec<ChatSession> {
    vec![ChatSession::fresh()]
}

impl Workspace {
    pub fn changes(&self) -> Changes {
        self.changes
    }

    /// True when tasks, events, notes or sessions changed since the last take.
    pub fn synced_collections_changed(&self) -> bool {
        self.changes.synced()
    }

    pub fn take_changes(&mut self) -> Changes {
        std::mem::take(&mut self.changes)
    }

    // Tasks

    pub fn add_task(
        &mut self,
        title: &str,
        description: Option<String>,
        priority: Priority,
    ) -> Result<&Task, WorkspaceError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(WorkspaceError::EmptyTitle);
        }
        let task = Task {
            id: next_id(),
            title: title.to_string(),
            description: description.filter(|d| !d.trim().is_empty()),
            status: TaskStatus::Todo,
            priority,
        };
        self.tasks.insert(0, task);
        self.changes.tasks = true;
        Ok(&self.tasks[0])
    }

    pub fn update_task(&mut self, task: Task) -> Result<(), WorkspaceError> {
        let slot = self
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| not_found("task", &task.id))?;
        *slot = task;
        self.changes.tasks = true;
        Ok(())
    }

    /// Flips between done and todo; in-progress counts as not done.
    pub fn toggle_task_status(&mut self, id: &str) -> Result<TaskStatus, WorkspaceError> {
        let task = self.task_mut(id)?;
        task.status = if task.status == TaskStatus::Done {
            TaskStatus::Todo
        } else {
            TaskStatus::Done
        };
        let status = task.status;
        self.changes.tasks = true;
        Ok(status)
    }

    pub fn cycle_task_status(&mut self, id: &str) -> Result<TaskStatus, WorkspaceError> {
        let task = self.task_mut(id)?;
        task.status = match task.status {
            TaskStatus::Todo => TaskStatus::InProgress,
            TaskStatus::InProgress => TaskStatus::Done,
            TaskStatus::Done => TaskStatus::Todo,
        };
        let status = task.status;
        self.changes.tasks = true;
        Ok(status)
    }

    pub fn cycle_task_priority(&mut self, id: &str) -> Result<Priority, WorkspaceError> {
        let task = self.task_mut(id)?;
        task.priority = task.priority.next();
        let priority = task.priority;
        self.changes.tasks = true;
        Ok(priority)
    }

    pub fn delete_task(&mut self, id: &str) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        let removed = self.tasks.len() != before;
        self.changes.tasks |= removed;
        removed
    }

    fn task_mut(&mut self, id: &str) -> Result<&mut Task, WorkspaceError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| not_found("task", id))
    }

    // Calendar

    /// See [`event_timestamp`] for the accepted date and time forms.
    pub fn add_event(
        &mut self,
        title: &str,
        date: &str,
        time: Option<&str>,
        description: Option<String>,
        priority: Priority,
    ) -> Result<&CalendarEvent, WorkspaceError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(WorkspaceError::EmptyTitle);
        }
        let date = event_timestamp(date, time, Local::now().date_naive())?;

        self.events.push(CalendarEvent {
            id: next_id(),
            title: title.to_string(),
            date,
            description: description.filter(|d| !d.trim().is_empty()),
            priority,
        });
        self.changes.events = true;
        Ok(&self.events[self.events.len() - 1])
    }

    pub fn update_event(&mut self, event: CalendarEvent) -> Result<(), WorkspaceError> {
        if event.starts_at().is_none() {
            return Err(WorkspaceError::InvalidDate(event.date));
        }
        let slot = self
            .events
            .iter_mut()
            .find(|e| e.id == event.id)
            .ok_or_else(|| not_found("event", &event.id))?;
        *slot = event;
        self.changes.events = true;
        Ok(())
    }

    pub fn delete_event(&mut self, id: &str) -> bool {
        let before = self.events.len();
        self.events.retain(|e| e.id != id);
        let removed = self.events.len() != before;
        self.changes.events |= removed;
        removed
    }

    /// Events falling on `day` in local time, earliest first.
    pub fn events_on(&self, day: NaiveDate) -> Vec<&CalendarEvent> {
        let mut events: Vec<(DateTime<Utc>, &CalendarEvent)> = self
            .events
            .iter()
            .filter_map(|e| e.starts_at().map(|at| (at, e)))
            .filter(|(at, _)| at.with_timezone(&Local).date_naive() == day)
            .collect();
        events.sort_by_key(|(at, _)| *at);
        events.into_iter().map(|(_, e)| e).collect()
    }

    pub fn upcoming_events(&self, now: DateTime<Utc>, limit: usize) -> Vec<&CalendarEvent> {
        let mut events: Vec<(DateTime<Utc>, &CalendarEvent)> = self
            .events
            .iter()
            .filter_map(|e| e.starts_at().map(|at| (at, e)))
            .filter(|(at, _)| *at >= now)
            .collect();
        events.sort_by_key(|(at, _)| *at);
        events.into_iter().take(limit).map(|(_, e)| e).collect()
    }

    // Notes

    pub fn add_note(&mut self, title: &str, content: &str) -> &Note {
        let title = title.trim();
        let note = Note {
            id: next_id(),
            title: if title.is_empty() {
                NOTE_TITLE_PLACEHOLDER.to_string()
            } else {
                title.to_string()
            },
            content: content.to_string(),
            date: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        };
        self.notes.insert(0, note);
        self.changes.notes = true;
        &self.notes[0]
    }

    pub fn update_note(&mut self, note: Note) -> Result<(), WorkspaceError> {
        let slot = self
            .notes
            .iter_mut()
            .find(|n| n.id == note.id)
            .ok_or_else(|| not_found("note", &note.id))?;
        *slot = note;
        self.changes.notes = true;
        Ok(())
    }

    pub fn delete_note(&mut self, id: &str) -> bool {
        let before = self.notes.len();
        self.notes.retain(|n| n.id != id);
        let removed = self.notes.len() != before;
        self.changes.notes |= removed;
        removed
    }

    // Chat sessions

    pub fn active_session(&self) -> Option<&ChatSession> {
        let id = self.active_session_id.as_deref()?;
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn new_session(&mut self) -> &ChatSession {
        let session = ChatSession::fresh();
        self.active_session_id = Some(session.id.clone());
        self.sessions.insert(0, session);
        self.changes.sessions = true;
        &self.sessions[0]
    }

    pub fn select_session(&mut self, id: &str) -> bool {
        if self.sessions.iter().any(|s| s.id == id) {
            self.active_session_id = Some(id.to_string());
            true
        } else {
            false
        }
    }

    /// Deleting the last session leaves the list empty; nothing is recreated.
    pub fn delete_session(&mut self, id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        let removed = self.sessions.len() != before;
        if removed {
            self.changes.sessions = true;
            if self.active_session_id.as_deref() == Some(id) {
                self.active_session_id = self.sessions.first().map(|s| s.id.clone());
            }
        }
        removed
    }

    pub fn clear_history(&mut self) {
        self.sessions = default_sessions();
        self.active_session_id = self.sessions.first().map(|s| s.id.clone());
        self.changes.sessions = true;
    }

    pub fn append_message(
        &mut self,
        session_id: &str,
        message: ChatMessage,
    ) -> Result<(), WorkspaceError> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| not_found("chat session", session_id))?;
        session.messages.push(message);
        session.updated_at = Utc::now();
        self.changes.sessions = true;
        Ok(())
    }

    // Briefing and settings

    pub fn set_briefing(&mut self, sector: &str, content: String) {
        self.briefing = MarketBriefing {
            sector: sector.to_string(),
            content,
            last_updated: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        };
        self.changes.briefing = true;
    }

    pub fn set_detailed_report(&mut self, report: Option<String>) {
        self.detailed_report = report.filter(|r| !r.is_empty());
        self.changes.report = true;
    }

    pub fn toggle_theme(&mut self) -> ThemeMode {
        self.theme = self.theme.toggled();
        self.changes.theme = true;
        self.theme
    }

    pub fn set_sim_mode(&mut self, enabled: bool) {
        self.sim_mode = enabled;
        self.changes.sim_mode = true;
    }

    /// Replaces every collection the remote store returned; absent ones stay.
    pub fn apply_remote(&mut self, snapshot: RemoteSnapshot) {
        if let Some(tasks) = snapshot.tasks {
            self.tasks = tasks;
            self.changes.tasks = true;
        }
        if let Some(events) = snapshot.events {
            self.events = events;
            self.changes.events = true;
        }
        if let Some(notes) = snapshot.notes {
            self.notes = notes;
            self.changes.notes = true;
        }
        if let Some(sessions) = snapshot.sessions {
            self.sessions = sessions;
            self.changes.sessions = true;
            self.ensure_active_session();
        }
    }

    /// Applies a normalized backup mapping to live state. Returns how many
    /// slots were restored; entries that fail to decode are skipped.
    pub fn restore(&mut self, data: &HashMap<String, Value>) -> usize {
        let mut restored = 0;
        if let Some(tasks) = decode_slot::<Vec<Task>>(data, TASKS_KEY) {
            self.tasks = tasks;
            self.changes.tasks = true;
            restored += 1;
        }
        if let Some(events) = decode_slot::<Vec<CalendarEvent>>(data, EVENTS_KEY) {
            self.events = events;
            self.changes.events = true;
            restored += 1;
        }
        if let Some(notes) = decode_slot::<Vec<Note>>(data, NOTES_KEY) {
            self.notes = notes;
            self.changes.notes = true;
            restored += 1;
        }
        if let Some(sessions) = decode_slot::<Vec<ChatSession>>(data, SESSIONS_KEY) {
            self.sessions = sessions;
            self.changes.sessions = true;
            self.ensure_active_session();
            restored += 1;
        }
        if let Some(briefing) = decode_slot::<MarketBriefing>(data, BRIEFING_KEY) {
            self.briefing = briefing;
            self.changes.briefing = true;
            restored += 1;
        }
        if let Some(Value::String(report)) = data.get(REPORT_KEY) {
            self.set_detailed_report(Some(report.clone()));
            restored += 1;
        }
        if let Some(theme) = data
            .get(THEME_KEY)
            .and_then(Value::as_str)
            .and_then(ThemeMode::parse)
        {
            self.theme = theme;
            self.changes.theme = true;
            restored += 1;
        }
        restored
    }

    fn ensure_active_session(&mut self) {
        let still_present = self
            .active_session_id
            .as_deref()
            .is_some_and(|id| self.sessions.iter().any(|s| s.id == id));
        if !still_present {
            self.active_session_id = self.sessions.first().map(|s| s.id.clone());
        }
    }
}

fn decode_slot<T: DeserializeOwned>(data: &HashMap<String, Value>, key: &str) -> Option<T> {
    let value = data.get(key)?;
    match serde_json::from_value::<T>(value.clone()) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            tracing::warn!(key, error = %err, "skipping backup slot that does not decode");
            None
        }
    }
}

/// Combines a local date (`YYYY-MM-DD` or a relative form like `tomorrow`)
/// and an optional `HH:MM` time into an RFC 3339 UTC timestamp. Missing time
/// defaults to noon.
pub fn event_timestamp(
    date: &str,
    time: Option<&str>,
    today: NaiveDate,
) -> Result<String, WorkspaceError> {
    let day = parse_event_date(date, today)
        .ok_or_else(|| WorkspaceError::InvalidDate(date.to_string()))?;
    let time = match time.map(str::trim).filter(|t| !t.is_empty()) {
        Some(raw) => {
            parse_event_time(raw).ok_or_else(|| WorkspaceError::InvalidTime(raw.to_string()))?
        }
        None => NaiveTime::from_hms_opt(DEFAULT_EVENT_TIME.0, DEFAULT_EVENT_TIME.1, 0)
            .ok_or_else(|| WorkspaceError::InvalidTime("12:00".to_string()))?,
    };
    let starts_at = local_timestamp(day, time)
        .ok_or_else(|| WorkspaceError::InvalidTime(format!("{day} {time}")))?;
    Ok(starts_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

fn local_timestamp(day: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&day.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn not_found(kind: &'static str, id: &str) -> WorkspaceError {
    WorkspaceError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatRole;
    use serde_json::json;

    #[test]
    fn add_task_prepends_and_marks_tasks_changed() {
        let mut ws = Workspace::default();
        let id = ws
            .add_task("Call supplier", None, Priority::High)
            .expect("add")
            .id
            .clone();
        assert_eq!(ws.tasks[0].id, id);
        assert_eq!(ws.tasks.len(), 3);
        assert!(ws.changes().tasks);
        assert!(!ws.changes().events);
    }

    #[test]
    fn add_task_rejects_blank_title() {
        let mut ws = Workspace::default();
        assert_eq!(
            ws.add_task("   ", None, Priority::Low).err(),
            Some(WorkspaceError::EmptyTitle)
        );
    }

    #[test]
    fn toggle_status_flips_between_done_and_todo() {
        let mut ws = Workspace::default();
        assert_eq!(ws.toggle_task_status("2"), Ok(TaskStatus::Done));
        assert_eq!(ws.toggle_task_status("2"), Ok(TaskStatus::Todo));
        assert!(matches!(
            ws.toggle_task_status("missing"),
            Err(WorkspaceError::NotFound { .. })
        ));
    }

    #[test]
    fn cycle_status_walks_all_states() {
        let mut ws = Workspace::default();
        assert_eq!(ws.cycle_task_status("1"), Ok(TaskStatus::InProgress));
        assert_eq!(ws.cycle_task_status("1"), Ok(TaskStatus::Done));
        assert_eq!(ws.cycle_task_status("1"), Ok(TaskStatus::Todo));
    }

    #[test]
    fn add_event_combines_date_and_time() {
        let mut ws = Workspace::default();
        let event = ws
            .add_event("Board meeting", "2025-03-10", Some("09:30"), None, Priority::High)
            .expect("add event")
            .clone();
        let local = event.starts_at().expect("valid date").with_timezone(&Local);
        assert_eq!(local.format("%Y-%m-%d %H:%M").to_string(), "2025-03-10 09:30");
    }

    #[test]
    fn add_event_defaults_to_noon() {
        let mut ws = Workspace::default();
        let event = ws
            .add_event("Lunch", "2025-03-10", None, None, Priority::Medium)
            .expect("add event")
            .clone();
        let local = event.starts_at().expect("valid date").with_timezone(&Local);
        assert_eq!(local.format("%H:%M").to_string(), "12:00");
    }

    #[test]
    fn add_event_rejects_invalid_date_and_time() {
        let mut ws = Workspace::default();
        assert_eq!(
            ws.add_event("X", "2025-13-40", None, None, Priority::Low).err(),
            Some(WorkspaceError::InvalidDate("2025-13-40".to_string()))
        );
        assert_eq!(
            ws.add_event("X", "2025-03-10", Some("25:99"), None, Priority::Low)
                .err(),
            Some(WorkspaceError::InvalidTime("25:99".to_string()))
        );
        assert!(ws.events.is_empty());
    }

    #[test]
    fn events_on_filters_by_local_day_and_sorts() {
        let mut ws = Workspace::default();
        ws.add_event("Late", "2025-03-10", Some("18:00"), None, Priority::Low)
            .expect("late");
        ws.add_event("Early", "2025-03-10", Some("08:00"), None, Priority::Low)
            .expect("early");
        ws.add_event("Other day", "2025-03-11", Some("08:00"), None, Priority::Low)
            .expect("other");
        let day = NaiveDate::from_ymd_opt(2025, 3, 10).expect("date");
        let titles: Vec<&str> = ws.events_on(day).iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Early", "Late"]);
    }

    #[test]
    fn blank_note_title_gets_placeholder() {
        let mut ws = Workspace::default();
        let note = ws.add_note("  ", "body").clone();
        assert_eq!(note.title, NOTE_TITLE_PLACEHOLDER);
        assert!(DateTime::parse_from_rfc3339(&note.date).is_ok());
    }

    #[test]
    fn deleting_last_session_leaves_none() {
        let mut ws = Workspace::default();
        let id = ws.sessions[0].id.clone();
        assert!(ws.delete_session(&id));
        assert!(ws.sessions.is_empty());
        assert_eq!(ws.active_session_id, None);
    }

    #[test]
    fn new_session_becomes_active_and_messages_touch_updated_at() {
        let mut ws = Workspace::default();
        let id = ws.new_session().id.clone();
        assert_eq!(ws.active_session_id.as_deref(), Some(id.as_str()));
        let before = ws.active_session().expect("active").updated_at;
        ws.append_message(&id, ChatMessage::new(ChatRole::User, "hello"))
            .expect("append");
        let session = ws.active_session().expect("active");
        assert_eq!(session.messages.len(), 1);
        assert!(session.updated_at >= before);
    }

    #[test]
    fn empty_report_is_stored_as_none() {
        let mut ws = Workspace::default();
        ws.set_detailed_report(Some(String::new()));
        assert_eq!(ws.detailed_report, None);
        assert!(ws.changes().report);
    }

    #[test]
    fn apply_remote_only_replaces_present_collections() {
        let mut ws = Workspace::default();
        ws.add_note("keep", "me");
        ws.take_changes();
        ws.apply_remote(RemoteSnapshot {
            tasks: Some(Vec::new()),
            ..RemoteSnapshot::default()
        });
        assert!(ws.tasks.is_empty());
        assert_eq!(ws.notes.len(), 1);
        let changes = ws.changes();
        assert!(changes.tasks && !changes.notes);
    }

    #[test]
    fn restore_applies_known_slots_and_skips_bad_ones() {
        let mut ws = Workspace::default();
        let mut data = HashMap::new();
        data.insert(
            TASKS_KEY.to_string(),
            json!([{"id":"1","title":"X","status":"todo","priority":"low"}]),
        );
        data.insert(NOTES_KEY.to_string(), json!("not a list"));
        data.insert(THEME_KEY.to_string(), json!("dark"));

        assert_eq!(ws.restore(&data), 2);
        assert_eq!(ws.tasks.len(), 1);
        assert_eq!(ws.tasks[0].title, "X");
        assert_eq!(ws.theme, ThemeMode::Dark);
        assert!(ws.notes.is_empty());
    }
}

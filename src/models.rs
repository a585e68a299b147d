use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

pub const NOTE_TITLE_PLACEHOLDER: &str = "Untitled";
pub const NEW_CHAT_TITLE: &str = "New chat";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Home,
    Tasks,
    Calendar,
    Notes,
    Assistant,
    Enhancer,
    Settings,
}

impl View {
    pub fn all() -> Vec<View> {
        vec![
            View::Home,
            View::Tasks,
            View::Calendar,
            View::Notes,
            View::Assistant,
            View::Enhancer,
            View::Settings,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            View::Home => "Home",
            View::Tasks => "Tasks",
            View::Calendar => "Calendar",
            View::Notes => "Notes",
            View::Assistant => "Assistant",
            View::Enhancer => "Enhancer",
            View::Settings => "Settings",
        }
    }
}

/// `Editing` routes keys into the assistant composer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMode {
    Navigate,
    Editing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Priority> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" | "l" => Some(Priority::Low),
            "medium" | "m" => Some(Priority::Medium),
            "high" | "h" => Some(Priority::High),
            _ => None,
        }
    }

    pub fn next(self) -> Priority {
        match self {
            Priority::Low => Priority::Medium,
            Priority::Medium => Priority::High,
            Priority::High => Priority::Low,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    /// RFC 3339 timestamp (date and time combined at creation).
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl CalendarEvent {
    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.date)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub date: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    #[serde(with = "revive")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    /// Base64 image payload produced by the image tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding_metadata: Option<serde_json::Value>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: next_id(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            attachment_name: None,
            image: None,
            grounding_metadata: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(with = "revive")]
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn fresh() -> Self {
        Self {
            id: next_id(),
            title: NEW_CHAT_TITLE.to_string(),
            messages: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MarketBriefing {
    pub sector: String,
    pub content: String,
    pub last_updated: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    Light,
    Dark,
}

impl ThemeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThemeMode::Light => "light",
            ThemeMode::Dark => "dark",
        }
    }

    pub fn parse(value: &str) -> Option<ThemeMode> {
        match value.trim().trim_matches('"') {
            "light" => Some(ThemeMode::Light),
            "dark" => Some(ThemeMode::Dark),
            _ => None,
        }
    }

    pub fn toggled(self) -> ThemeMode {
        match self {
            ThemeMode::Light => ThemeMode::Dark,
            ThemeMode::Dark => ThemeMode::Light,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
    Info,
}

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Client-side ids are the current epoch milliseconds, bumped so that two ids
/// minted within the same millisecond never collide.
pub fn next_id() -> String {
    let now = Utc::now().timestamp_millis();
    let mut last = LAST_ID.load(Ordering::Relaxed);
    loop {
        let candidate = if now > last { now } else { last + 1 };
        match LAST_ID.compare_exchange_weak(last, candidate, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return candidate.to_string(),
            Err(actual) => last = actual,
        }
    }
}

/// Revives chat timestamps stored either as RFC 3339 text or epoch milliseconds.
pub mod revive {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
    }

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(D::Error::custom),
            Raw::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {ms}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_id_is_strictly_increasing() {
        let a: i64 = next_id().parse().expect("numeric id");
        let b: i64 = next_id().parse().expect("numeric id");
        let c: i64 = next_id().parse().expect("numeric id");
        assert!(a < b && b < c);
    }

    #[test]
    fn task_status_uses_kebab_case_on_the_wire() {
        let json = serde_json::to_string(&TaskStatus::InProgress).expect("serialize");
        assert_eq!(json, "\"in-progress\"");
        let parsed: TaskStatus = serde_json::from_str("\"done\"").expect("parse");
        assert_eq!(parsed, TaskStatus::Done);
    }

    #[test]
    fn chat_session_revives_string_and_millis_timestamps() {
        let json = r#"{
            "id": "1",
            "title": "Chat",
            "messages": [
                {"id": "m1", "role": "user", "content": "hi", "timestamp": "2025-01-02T03:04:05.000Z"},
                {"id": "m2", "role": "model", "content": "hello", "timestamp": 1735787045000}
            ],
            "updatedAt": "2025-01-02T03:04:05Z"
        }"#;
        let session: ChatSession = serde_json::from_str(json).expect("parse session");
        assert_eq!(session.messages[0].timestamp, session.messages[1].timestamp);
        assert_eq!(session.updated_at, session.messages[0].timestamp);
    }

    #[test]
    fn chat_session_rejects_unparseable_timestamp() {
        let json = r#"{"id":"1","title":"Chat","messages":[],"updatedAt":"yesterday"}"#;
        assert!(serde_json::from_str::<ChatSession>(json).is_err());
    }

    #[test]
    fn task_tolerates_remote_only_columns() {
        let json = r#"{"id":"9","user_id":"u","title":"T","description":null,"status":"todo","priority":"high","created_at":"2025-01-01"}"#;
        let task: Task = serde_json::from_str(json).expect("parse");
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.description, None);
    }

    #[test]
    fn theme_mode_parses_bare_and_quoted_values() {
        assert_eq!(ThemeMode::parse("dark"), Some(ThemeMode::Dark));
        assert_eq!(ThemeMode::parse("\"light\""), Some(ThemeMode::Light));
        assert_eq!(ThemeMode::parse("sepia"), None);
    }
}

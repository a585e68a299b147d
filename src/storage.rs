use crate::models::{CalendarEvent, ChatSession, MarketBriefing, Note, Task, ThemeMode};
use crate::workspace::{Changes, Workspace, default_sessions, default_tasks};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const KEY_PREFIX: &str = "bizmate_";
pub const TASKS_KEY: &str = "bizmate_tasks";
pub const EVENTS_KEY: &str = "bizmate_events";
pub const NOTES_KEY: &str = "bizmate_notes";
pub const SESSIONS_KEY: &str = "bizmate_chat_sessions";
pub const BRIEFING_KEY: &str = "bizmate_market_briefing";
pub const REPORT_KEY: &str = "bizmate_detailed_report";
pub const THEME_KEY: &str = "bizmate_theme";
pub const SIM_MODE_KEY: &str = "bizmate_sim_mode";
pub const CUSTOM_KEY_KEY: &str = "bizmate_custom_api_key";

const SLOT_EXTENSION: &str = "json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode {key}: {source}")]
    Encode {
        key: &'static str,
        source: serde_json::Error,
    },
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
}

/// String-keyed text slots, one file per key under a single directory.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn open(root: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn slot_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.{SLOT_EXTENSION}")))
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        let path = self.slot_path(key).ok()?;
        fs::read_to_string(path).ok()
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.slot_path(key)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let path = self.slot_path(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) == Some(SLOT_EXTENSION)
                    && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        keys
    }

    pub fn namespaced_keys(&self) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|k| k.starts_with(KEY_PREFIX))
            .collect()
    }

    /// Total bytes held by namespaced slots.
    pub fn usage(&self) -> u64 {
        self.namespaced_keys()
            .iter()
            .filter_map(|key| self.get_item(key))
            .map(|value| value.len() as u64)
            .sum()
    }
}

/// Reads every slot, substituting the built-in default whenever a slot is
/// missing or does not parse. Never fails.
pub fn load_workspace(storage: &LocalStorage) -> Workspace {
    let mut workspace = Workspace::default();
    workspace.tasks = load_slot::<Vec<Task>>(storage, TASKS_KEY).unwrap_or_else(default_tasks);
    workspace.events = load_slot::<Vec<CalendarEvent>>(storage, EVENTS_KEY).unwrap_or_default();
    workspace.notes = load_slot::<Vec<Note>>(storage, NOTES_KEY).unwrap_or_default();
    workspace.sessions =
        load_slot::<Vec<ChatSession>>(storage, SESSIONS_KEY).unwrap_or_else(default_sessions);
    workspace.briefing = load_slot::<MarketBriefing>(storage, BRIEFING_KEY).unwrap_or_default();
    workspace.detailed_report = storage.get_item(REPORT_KEY).filter(|r| !r.is_empty());
    workspace.theme = storage
        .get_item(THEME_KEY)
        .and_then(|raw| ThemeMode::parse(&raw))
        .unwrap_or_default();
    workspace.sim_mode = load_slot::<bool>(storage, SIM_MODE_KEY).unwrap_or(false);
    workspace.active_session_id = workspace.sessions.first().map(|s| s.id.clone());
    workspace.take_changes();
    workspace
}

fn load_slot<T: DeserializeOwned>(storage: &LocalStorage, key: &str) -> Option<T> {
    let raw = storage.get_item(key)?;
    match serde_json::from_str::<T>(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(key, error = %err, "unreadable slot, using default");
            None
        }
    }
}

/// Writes the slots flagged in `changes`. An empty detailed report removes
/// its slot instead of storing an empty string.
pub fn persist(
    storage: &LocalStorage,
    workspace: &Workspace,
    changes: Changes,
) -> Result<(), StorageError> {
    if changes.tasks {
        write_slot(storage, TASKS_KEY, &workspace.tasks)?;
    }
    if changes.events {
        write_slot(storage, EVENTS_KEY, &workspace.events)?;
    }
    if changes.notes {
        write_slot(storage, NOTES_KEY, &workspace.notes)?;
    }
    if changes.sessions {
        write_slot(storage, SESSIONS_KEY, &workspace.sessions)?;
    }
    if changes.briefing {
        write_slot(storage, BRIEFING_KEY, &workspace.briefing)?;
    }
    if changes.theme {
        storage.set_item(THEME_KEY, workspace.theme.as_str())?;
    }
    if changes.sim_mode {
        write_slot(storage, SIM_MODE_KEY, &workspace.sim_mode)?;
    }
    if changes.report {
        match workspace.detailed_report.as_deref() {
            Some(report) if !report.is_empty() => storage.set_item(REPORT_KEY, report)?,
            _ => storage.remove_item(REPORT_KEY)?,
        }
    }
    Ok(())
}

fn write_slot<T: Serialize>(
    storage: &LocalStorage,
    key: &'static str,
    value: &T,
) -> Result<(), StorageError> {
    let text = serde_json::to_string(value).map_err(|source| StorageError::Encode { key, source })?;
    storage.set_item(key, &text)
}

pub fn format_bytes(bytes: u64, decimals: usize) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let text = format!("{value:.decimals$}");
    let text = if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    };
    format!("{text} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, ChatRole, Priority};
    use tempfile::TempDir;

    fn temp_storage() -> (TempDir, LocalStorage) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let storage = LocalStorage::open(dir.path()).expect("open storage");
        (dir, storage)
    }

    #[test]
    fn set_get_remove_round_trip() {
        let (_dir, storage) = temp_storage();
        storage.set_item("bizmate_theme", "dark").expect("set");
        assert_eq!(storage.get_item("bizmate_theme").as_deref(), Some("dark"));
        storage.remove_item("bizmate_theme").expect("remove");
        assert_eq!(storage.get_item("bizmate_theme"), None);
        storage.remove_item("bizmate_theme").expect("removing twice is fine");
    }

    #[test]
    fn rejects_path_like_keys() {
        let (_dir, storage) = temp_storage();
        assert!(matches!(
            storage.set_item("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(storage.set_item("bizmate_a/b", "x").is_err());
    }

    #[test]
    fn missing_slots_fall_back_to_defaults() {
        let (_dir, storage) = temp_storage();
        let ws = load_workspace(&storage);
        assert_eq!(ws.tasks, default_tasks());
        assert!(ws.events.is_empty());
        assert_eq!(ws.sessions.len(), 1);
        assert_eq!(ws.active_session_id.as_ref(), Some(&ws.sessions[0].id));
        assert_eq!(ws.theme, ThemeMode::Light);
        assert!(!ws.changes().any());
    }

    #[test]
    fn corrupt_slot_falls_back_silently() {
        let (_dir, storage) = temp_storage();
        storage.set_item(TASKS_KEY, "{not json").expect("set");
        storage.set_item(NOTES_KEY, "[]").expect("set");
        let ws = load_workspace(&storage);
        assert_eq!(ws.tasks, default_tasks());
        assert!(ws.notes.is_empty());
    }

    #[test]
    fn persisted_collections_reload_value_equal() {
        let (_dir, storage) = temp_storage();
        let mut ws = Workspace::default();
        ws.add_task("Ship invoice", Some("net 30".to_string()), Priority::High)
            .expect("task");
        ws.add_event("Demo", "2025-05-01", Some("15:00"), None, Priority::Low)
            .expect("event");
        ws.add_note("Ideas", "loyalty program");
        let session_id = ws.sessions[0].id.clone();
        let mut reply = ChatMessage::new(ChatRole::Model, "sure");
        reply.grounding_metadata = Some(serde_json::json!({"webSearchQueries": ["x"]}));
        ws.append_message(&session_id, reply).expect("message");
        ws.set_briefing("Retail", "Three headlines".to_string());
        ws.toggle_theme();
        ws.set_sim_mode(true);
        ws.set_detailed_report(Some("# Report".to_string()));

        let changes = ws.take_changes();
        persist(&storage, &ws, changes).expect("persist");
        let reloaded = load_workspace(&storage);

        assert_eq!(reloaded.tasks, ws.tasks);
        assert_eq!(reloaded.events, ws.events);
        assert_eq!(reloaded.notes, ws.notes);
        assert_eq!(reloaded.sessions, ws.sessions);
        assert_eq!(reloaded.briefing, ws.briefing);
        assert_eq!(reloaded.detailed_report, ws.detailed_report);
        assert_eq!(reloaded.theme, ThemeMode::Dark);
        assert!(reloaded.sim_mode);
    }

    #[test]
    fn cleared_report_removes_slot() {
        let (_dir, storage) = temp_storage();
        let mut ws = Workspace::default();
        ws.set_detailed_report(Some("text".to_string()));
        persist(&storage, &ws, ws.changes()).expect("persist");
        assert!(storage.get_item(REPORT_KEY).is_some());

        ws.set_detailed_report(None);
        persist(&storage, &ws, ws.changes()).expect("persist");
        assert_eq!(storage.get_item(REPORT_KEY), None);
    }

    #[test]
    fn only_flagged_slots_are_written() {
        let (_dir, storage) = temp_storage();
        let mut ws = Workspace::default();
        ws.add_note("n", "c");
        persist(&storage, &ws, ws.changes()).expect("persist");
        assert_eq!(storage.keys(), vec![NOTES_KEY.to_string()]);
    }

    #[test]
    fn usage_counts_only_namespaced_slots() {
        let (_dir, storage) = temp_storage();
        storage.set_item("bizmate_theme", "dark").expect("set");
        storage.set_item("other", "0123456789").expect("set");
        assert_eq!(storage.usage(), 4);
    }

    #[test]
    fn format_bytes_picks_unit() {
        assert_eq!(format_bytes(0, 2), "0 Bytes");
        assert_eq!(format_bytes(512, 2), "512 Bytes");
        assert_eq!(format_bytes(1536, 2), "1.5 KB");
        assert_eq!(format_bytes(1024 * 1024, 2), "1 MB");
    }
}

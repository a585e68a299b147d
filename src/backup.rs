use crate::storage::{KEY_PREFIX, LocalStorage, StorageError};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const BACKUP_VERSION: u32 = 1;

/// Bare key names accepted from older backups.
const LEGACY_KEYS: [(&str, &str); 11] = [
    ("tasks", "bizmate_tasks"),
    ("events", "bizmate_events"),
    ("notes", "bizmate_notes"),
    ("sessions", "bizmate_chat_sessions"),
    ("chat_sessions", "bizmate_chat_sessions"),
    ("theme", "bizmate_theme"),
    ("market_briefing", "bizmate_market_briefing"),
    ("briefing", "bizmate_market_briefing"),
    ("detailed_report", "bizmate_detailed_report"),
    ("sim_mode", "bizmate_sim_mode"),
    ("custom_api_key", "bizmate_custom_api_key"),
];

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("file is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("invalid backup structure")]
    InvalidStructure,
    #[error("could not read backup: {0}")]
    Read(#[source] io::Error),
    #[error("could not write backup: {0}")]
    Write(#[source] io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkspaceBackup {
    pub version: u32,
    pub timestamp: i64,
    pub data: Map<String, Value>,
}

pub fn backup_file_name(today: chrono::NaiveDate) -> String {
    format!("bizmate-backup-{}.json", today.format("%Y-%m-%d"))
}

/// Snapshots every namespaced slot. Values that are not JSON are kept as
/// plain strings.
pub fn snapshot(storage: &LocalStorage) -> WorkspaceBackup {
    let mut data = Map::new();
    for key in storage.namespaced_keys() {
        let Some(raw) = storage.get_item(&key) else {
            continue;
        };
        let value = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
        data.insert(key, value);
    }
    WorkspaceBackup {
        version: BACKUP_VERSION,
        timestamp: Utc::now().timestamp_millis(),
        data,
    }
}

pub fn export_workspace(storage: &LocalStorage, dir: &Path) -> Result<PathBuf, BackupError> {
    let backup = snapshot(storage);
    let text = serde_json::to_string_pretty(&backup).map_err(BackupError::InvalidJson)?;
    fs::create_dir_all(dir).map_err(BackupError::Write)?;
    let path = dir.join(backup_file_name(Local::now().date_naive()));
    fs::write(&path, text).map_err(BackupError::Write)?;
    tracing::info!(path = %path.display(), slots = backup.data.len(), "workspace exported");
    Ok(path)
}

/// Parses backup text into a map of namespaced storage keys. Does not touch
/// storage.
pub fn parse_backup(text: &str) -> Result<HashMap<String, Value>, BackupError> {
    let backup: Value = serde_json::from_str(text).map_err(BackupError::InvalidJson)?;
    let Value::Object(root) = backup else {
        return Err(BackupError::InvalidStructure);
    };

    let raw = match root.get("data") {
        Some(Value::Object(data)) => data.clone(),
        Some(data) if is_truthy(data) => return Err(BackupError::InvalidStructure),
        _ => root,
    };

    let mut normalized = HashMap::new();
    for (key, value) in raw {
        if key == "version" || key == "timestamp" || value.is_null() {
            continue;
        }
        normalized.insert(normalize_key(&key), value);
    }
    tracing::debug!(keys = normalized.len(), "backup parsed");
    Ok(normalized)
}

pub fn parse_backup_file(path: &Path) -> Result<HashMap<String, Value>, BackupError> {
    let text = fs::read_to_string(path).map_err(BackupError::Read)?;
    parse_backup(&text)
}

/// Writes a parsed backup straight into storage. Strings are stored raw,
/// everything else as JSON text.
pub fn write_backup_to_storage(
    storage: &LocalStorage,
    data: &HashMap<String, Value>,
) -> Result<usize, BackupError> {
    let mut count = 0;
    for (key, value) in data {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        storage.set_item(key, &text)?;
        count += 1;
    }
    Ok(count)
}

fn normalize_key(key: &str) -> String {
    if key.starts_with(KEY_PREFIX) {
        return key.to_string();
    }
    LEGACY_KEYS
        .iter()
        .find(|(legacy, _)| *legacy == key)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| format!("{KEY_PREFIX}{key}"))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

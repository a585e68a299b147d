use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub fn key_match(key: &KeyEvent, bindings: &[String]) -> bool {
    bindings.iter().any(|binding| is_match(key, binding))
}

fn is_match(key: &KeyEvent, binding: &str) -> bool {
    let binding = binding.to_lowercase();
    let parts: Vec<&str> = binding.split('+').collect();

    let mut target_modifiers = KeyModifiers::NONE;
    let mut target_code = KeyCode::Null;

    for part in parts {
        match part {
            "ctrl" => target_modifiers.insert(KeyModifiers::CONTROL),
            "opt" | "alt" => target_modifiers.insert(KeyModifiers::ALT),
            "shift" => target_modifiers.insert(KeyModifiers::SHIFT),
            "enter" => target_code = KeyCode::Enter,
            "esc" => target_code = KeyCode::Esc,
            "backspace" => target_code = KeyCode::Backspace,
            "tab" => target_code = KeyCode::Tab,
            "backtab" => target_code = KeyCode::BackTab,
            "space" => target_code = KeyCode::Char(' '),
            "up" => target_code = KeyCode::Up,
            "down" => target_code = KeyCode::Down,
            "left" => target_code = KeyCode::Left,
            "right" => target_code = KeyCode::Right,
            "delete" => target_code = KeyCode::Delete,
            c if c.chars().count() == 1 => {
                if let Some(ch) = c.chars().next() {
                    target_code = KeyCode::Char(ch);
                }
            }
            _ => {}
        }
    }

    let code_matches = if key.code == target_code {
        true
    } else if let (KeyCode::Char(c), KeyCode::Char(tc)) = (key.code, target_code) {
        c.to_lowercase().next() == Some(tc)
    } else {
        false
    };
    if !code_matches {
        return false;
    }

    // Enter must match exactly so `enter` and `shift+enter` can coexist.
    if target_code == KeyCode::Enter {
        return key.modifiers == target_modifiers;
    }

    let mut key_mods = key.modifiers;
    if !target_modifiers.contains(KeyModifiers::SHIFT) {
        key_mods.remove(KeyModifiers::SHIFT);
    }
    key_mods.contains(target_modifiers)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "bizmate", "bizmate")
}

fn default_data_dir() -> PathBuf {
    if let Some(path) = std::env::var_os("BIZMATE_DATA_DIR") {
        return PathBuf::from(path);
    }
    if let Some(dirs) = project_dirs() {
        return dirs.data_dir().to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".bizmate")
}

fn default_backup_dir() -> PathBuf {
    default_data_dir().join("backups")
}

fn default_log_file() -> PathBuf {
    default_data_dir().join("bizmate.log")
}

pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("BIZMATE_CONFIG") {
        return PathBuf::from(path);
    }
    if let Some(dirs) = project_dirs() {
        return dirs.config_dir().join("config.toml");
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".bizmate-config.toml")
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub keybindings: KeyBindings,
    pub theme: Theme,
    pub data: DataConfig,
    pub supabase: SupabaseConfig,
    pub gemini: GeminiConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding the local key/value slots and the saved auth session.
    pub data_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub log_file: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backup_dir: default_backup_dir(),
            log_file: default_log_file(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SupabaseConfig {
    pub enabled: bool,
    pub url: String,
    pub anon_key: String,
    /// Quiet period after the last local edit before a push starts.
    pub debounce_ms: u64,
    /// Create an account when password sign-in fails.
    pub auto_sign_up: bool,
    pub timeout_seconds: u64,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: String::new(),
            anon_key: String::new(),
            debounce_ms: 3000,
            auto_sign_up: true,
            timeout_seconds: 20,
        }
    }
}

impl SupabaseConfig {
    pub fn is_configured(&self) -> bool {
        self.enabled && !self.url.trim().is_empty() && !self.anon_key.trim().is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GeminiConfig {
    pub enabled: bool,
    pub api_key: String,
    pub chat_model: String,
    pub briefing_model: String,
    pub report_model: String,
    pub image_model: String,
    pub timeout_seconds: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
            chat_model: "gemini-3-flash-preview".to_string(),
            briefing_model: "gemini-3-flash-preview".to_string(),
            report_model: "gemini-3-pro-preview".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct UiConfig {
    pub toast_seconds: u64,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self { toast_seconds: 3 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KeyBindings {
    pub global: GlobalBindings,
    pub list: ListBindings,
    pub composer: ComposerBindings,
    pub popup: PopupBindings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GlobalBindings {
    pub quit: Vec<String>,
    pub help: Vec<String>,
    pub next_view: Vec<String>,
    pub prev_view: Vec<String>,
    pub sign_in: Vec<String>,
    pub sign_out: Vec<String>,
    pub export: Vec<String>,
    pub import: Vec<String>,
    pub toggle_theme: Vec<String>,
    pub data_dir: Vec<String>,
}

impl Default for GlobalBindings {
    fn default() -> Self {
        Self {
            quit: vec!["ctrl+q".to_string(), "q".to_string()],
            help: vec!["?".to_string()],
            next_view: vec!["tab".to_string()],
            prev_view: vec!["backtab".to_string()],
            sign_in: vec!["ctrl+l".to_string()],
            sign_out: vec!["ctrl+o".to_string()],
            export: vec!["ctrl+e".to_string()],
            import: vec!["ctrl+i".to_string()],
            toggle_theme: vec!["ctrl+t".to_string()],
            data_dir: vec!["o".to_string()],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ListBindings {
    pub up: Vec<String>,
    pub down: Vec<String>,
    pub add: Vec<String>,
    pub edit: Vec<String>,
    pub delete: Vec<String>,
    pub toggle: Vec<String>,
    pub cycle_status: Vec<String>,
    pub cycle_priority: Vec<String>,
    pub open: Vec<String>,
    pub new_session: Vec<String>,
}

impl Default for ListBindings {
    fn default() -> Self {
        Self {
            up: vec!["k".to_string(), "up".to_string()],
            down: vec!["j".to_string(), "down".to_string()],
            add: vec!["a".to_string()],
            edit: vec!["e".to_string()],
            delete: vec!["d".to_string(), "delete".to_string()],
            toggle: vec!["space".to_string()],
            cycle_status: vec!["s".to_string()],
            cycle_priority: vec!["p".to_string()],
            open: vec!["enter".to_string()],
            new_session: vec!["n".to_string()],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ComposerBindings {
    pub submit: Vec<String>,
    pub newline: Vec<String>,
    pub cancel: Vec<String>,
    pub clear: Vec<String>,
}

impl Default for ComposerBindings {
    fn default() -> Self {
        Self {
            submit: vec!["enter".to_string()],
            newline: vec!["shift+enter".to_string()],
            cancel: vec!["esc".to_string()],
            clear: vec!["ctrl+u".to_string()],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PopupBindings {
    pub confirm: Vec<String>,
    pub cancel: Vec<String>,
    pub next_field: Vec<String>,
}

impl Default for PopupBindings {
    fn default() -> Self {
        Self {
            confirm: vec!["enter".to_string()],
            cancel: vec!["esc".to_string()],
            next_field: vec!["tab".to_string()],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Theme {
    pub border_default: String,
    pub border_active: String,
    pub border_editing: String,
    pub text_highlight: String,
    pub text_highlight_dark: String,
    pub task_done: String,
    pub task_in_progress: String,
    pub priority_high: String,
    pub timestamp: String,
    pub toast_success: String,
    pub toast_error: String,
    pub toast_info: String,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            border_default: "Reset".to_string(),
            border_active: "Cyan".to_string(),
            border_editing: "Green".to_string(),
            text_highlight: "220,220,220".to_string(),
            text_highlight_dark: "50,50,50".to_string(),
            task_done: "Green".to_string(),
            task_in_progress: "Yellow".to_string(),
            priority_high: "Red".to_string(),
            timestamp: "Blue".to_string(),
            toast_success: "Green".to_string(),
            toast_error: "LightRed".to_string(),
            toast_info: "Cyan".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = config_path();

        let mut config = if let Ok(content) = fs::read_to_string(&config_path) {
            match toml::from_str::<Config>(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Failed to parse config.toml ({config_path:?}), using defaults: {e}");
                    Config::default()
                }
            }
        } else {
            Config::default()
        };

        let changed = config.normalize_paths();
        if changed || !config_path.exists() {
            let _ = config.save_to_path(&config_path);
        }

        // Secrets from the environment are applied after saving so they never land in the file.
        config.apply_env_overrides();
        config
    }

    pub fn save_to_path(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).unwrap_or_default();
        fs::write(path, content)
    }

    fn normalize_paths(&mut self) -> bool {
        let mut changed = false;

        if self.data.data_dir.as_os_str().is_empty() {
            self.data.data_dir = default_data_dir();
            changed = true;
        }
        if self.data.data_dir.is_relative() {
            self.data.data_dir = default_data_dir().join(&self.data.data_dir);
            changed = true;
        }
        if self.data.backup_dir.as_os_str().is_empty() {
            self.data.backup_dir = self.data.data_dir.join("backups");
            changed = true;
        }
        if self.data.backup_dir.is_relative() {
            self.data.backup_dir = self.data.data_dir.join(&self.data.backup_dir);
            changed = true;
        }
        if self.data.log_file.as_os_str().is_empty() {
            self.data.log_file = self.data.data_dir.join("bizmate.log");
            changed = true;
        }
        if self.data.log_file.is_relative() {
            self.data.log_file = self.data.data_dir.join(&self.data.log_file);
            changed = true;
        }

        changed
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SUPABASE_URL")
            && !url.trim().is_empty()
        {
            self.supabase.url = url.trim().to_string();
        }
        if let Ok(key) = std::env::var("SUPABASE_ANON_KEY")
            && !key.trim().is_empty()
        {
            self.supabase.anon_key = key.trim().to_string();
        }
    }
}

pub fn session_path(config: &Config) -> PathBuf {
    config.data.data_dir.join("session.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventKind;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: crossterm::event::KeyEventState::NONE,
        }
    }

    #[test]
    fn enter_and_shift_enter_are_distinct() {
        let enter = key(KeyCode::Enter, KeyModifiers::NONE);
        let shift_enter = key(KeyCode::Enter, KeyModifiers::SHIFT);
        let submit = vec!["enter".to_string()];
        let newline = vec!["shift+enter".to_string()];
        assert!(key_match(&enter, &submit));
        assert!(!key_match(&shift_enter, &submit));
        assert!(key_match(&shift_enter, &newline));
    }

    #[test]
    fn char_bindings_ignore_case_and_shift() {
        let upper = key(KeyCode::Char('Q'), KeyModifiers::SHIFT);
        assert!(key_match(&upper, &["q".to_string()]));
        let question = key(KeyCode::Char('?'), KeyModifiers::SHIFT);
        assert!(key_match(&question, &["?".to_string()]));
    }

    #[test]
    fn ctrl_binding_requires_ctrl() {
        let plain = key(KeyCode::Char('e'), KeyModifiers::NONE);
        let ctrl = key(KeyCode::Char('e'), KeyModifiers::CONTROL);
        let export = vec!["ctrl+e".to_string()];
        assert!(!key_match(&plain, &export));
        assert!(key_match(&ctrl, &export));
    }

    #[test]
    fn relative_paths_are_anchored_to_data_dir() {
        let mut config = Config::default();
        config.data.data_dir = PathBuf::from("/tmp/bizmate-data");
        config.data.backup_dir = PathBuf::from("dumps");
        config.data.log_file = PathBuf::new();

        assert!(config.normalize_paths());
        assert_eq!(config.data.backup_dir, PathBuf::from("/tmp/bizmate-data/dumps"));
        assert_eq!(
            config.data.log_file,
            PathBuf::from("/tmp/bizmate-data/bizmate.log")
        );
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str("[supabase]\nurl = \"https://x.supabase.co\"\n")
            .expect("parse config");
        assert_eq!(config.supabase.url, "https://x.supabase.co");
        assert_eq!(config.supabase.debounce_ms, 3000);
        assert!(config.supabase.auto_sign_up);
        assert!(!config.supabase.is_configured());
    }
}

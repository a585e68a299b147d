use crate::config::{Config, session_path};
use crate::enhancer::{EditorState, EnhanceOutcome, Marketplace, Mood, Style, TEMPLATES, Template};
use crate::integrations::gemini::{self, ChatOutcome, InlineImage, TextOutcome};
use crate::models::{CalendarEvent, InputMode, Note, Task, ToastKind, View};
use crate::remote::{
    AuthBackend, AuthEvent, RemoteError, RemoteStore, Session, SignInOutcome, SupabaseClient,
};
use crate::storage::{self, CUSTOM_KEY_KEY, LocalStorage, StorageError};
use crate::sync::SyncCoordinator;
use crate::workspace::Workspace;
use chrono::{DateTime, Duration, Local, NaiveDate};
use ratatui::widgets::ListState;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use tui_textarea::TextArea;

pub const PLACEHOLDER_CHAT: &str = "Ask the assistant... (Enter: send, Shift+Enter: newline)";
pub const PLACEHOLDER_IDLE: &str = "Press i to write a message";

/// What a popup form submits to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormKind {
    SignIn,
    NewTask,
    EditTask(String),
    NewEvent,
    EditEvent(String),
    NewNote,
    EditNote(String),
    Sector,
    ImportBackup,
    MergeBackup,
    UploadImage,
    AttachImage,
    EnhancerDescription,
    ApiKey,
}

impl FormKind {
    pub fn title(&self) -> &'static str {
        match self {
            FormKind::SignIn => " Sign in ",
            FormKind::NewTask => " New task ",
            FormKind::EditTask(_) => " Edit task ",
            FormKind::NewEvent => " New event ",
            FormKind::EditEvent(_) => " Edit event ",
            FormKind::NewNote => " New note ",
            FormKind::EditNote(_) => " Edit note ",
            FormKind::Sector => " Business sector ",
            FormKind::ImportBackup => " Import backup ",
            FormKind::MergeBackup => " Merge backup into storage ",
            FormKind::UploadImage => " Upload product photo ",
            FormKind::AttachImage => " Attach image ",
            FormKind::EnhancerDescription => " Describe the result ",
            FormKind::ApiKey => " Gemini API key ",
        }
    }
}

pub struct FormField<'a> {
    pub label: &'static str,
    pub input: TextArea<'a>,
    pub multiline: bool,
}

pub struct Form<'a> {
    pub kind: FormKind,
    pub fields: Vec<FormField<'a>>,
    pub focus: usize,
}

impl<'a> Form<'a> {
    /// Fields are `(label, initial value, multiline)`.
    pub fn new(kind: FormKind, fields: Vec<(&'static str, String, bool)>) -> Self {
        let fields = fields
            .into_iter()
            .map(|(label, value, multiline)| {
                let lines: Vec<String> = value.lines().map(str::to_string).collect();
                let mut input = if lines.is_empty() {
                    TextArea::default()
                } else {
                    TextArea::new(lines)
                };
                input.move_cursor(tui_textarea::CursorMove::Bottom);
                input.move_cursor(tui_textarea::CursorMove::End);
                FormField {
                    label,
                    input,
                    multiline,
                }
            })
            .collect();
        Self {
            kind,
            fields,
            focus: 0,
        }
    }

    pub fn value(&self, index: usize) -> String {
        self.fields
            .get(index)
            .map(|f| f.input.lines().join("\n"))
            .unwrap_or_default()
    }

    pub fn focused_mut(&mut self) -> Option<&mut FormField<'a>> {
        self.fields.get_mut(self.focus)
    }

    pub fn next_field(&mut self) {
        if !self.fields.is_empty() {
            self.focus = (self.focus + 1) % self.fields.len();
        }
    }

    pub fn prev_field(&mut self) {
        if !self.fields.is_empty() {
            self.focus = (self.focus + self.fields.len() - 1) % self.fields.len();
        }
    }
}

/// One selectable row on the enhancer edit screen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EnhancerItem {
    Marketplace(Marketplace),
    Template(Template),
    Style(Style),
    Mood(Mood),
    Description,
    Enhance,
}

pub fn enhancer_items() -> Vec<EnhancerItem> {
    let mut items: Vec<EnhancerItem> = Marketplace::ALL
        .iter()
        .map(|m| EnhancerItem::Marketplace(*m))
        .collect();
    items.extend(TEMPLATES.iter().map(|t| EnhancerItem::Template(*t)));
    items.extend(Style::ALL.iter().map(|s| EnhancerItem::Style(*s)));
    items.extend(Mood::ALL.iter().map(|m| EnhancerItem::Mood(*m)));
    items.push(EnhancerItem::Description);
    items.push(EnhancerItem::Enhance);
    items
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsItem {
    Theme,
    SimMode,
    Sector,
    ApiKey,
    Account,
    Export,
    Import,
    MergeBackup,
    ClearHistory,
    DataDir,
}

impl SettingsItem {
    pub const ALL: [SettingsItem; 10] = [
        SettingsItem::Theme,
        SettingsItem::SimMode,
        SettingsItem::Sector,
        SettingsItem::ApiKey,
        SettingsItem::Account,
        SettingsItem::Export,
        SettingsItem::Import,
        SettingsItem::MergeBackup,
        SettingsItem::ClearHistory,
        SettingsItem::DataDir,
    ];
}

pub struct App<'a> {
    pub should_quit: bool,
    pub view: View,
    pub input_mode: InputMode,

    pub config: Config,
    pub storage: LocalStorage,
    pub workspace: Workspace,
    pub storage_usage: u64,
    pub custom_api_key: Option<String>,

    // List cursors
    pub tasks_state: ListState,
    pub events_state: ListState,
    pub notes_state: ListState,
    pub sessions_state: ListState,
    pub enhancer_state: ListState,
    pub settings_state: ListState,
    pub calendar_day: NaiveDate,

    // Assistant composer
    pub chat_input: TextArea<'a>,
    pub chat_attachment: Option<(String, InlineImage)>,
    pub chat_scroll: u16,

    pub enhancer: EditorState,

    // Popups
    pub form: Option<Form<'a>>,
    pub show_help_popup: bool,
    pub show_report_popup: bool,
    pub report_scroll: u16,

    pub toast_message: Option<(String, ToastKind)>,
    pub toast_expiry: Option<DateTime<Local>>,

    // Cloud sync
    pub auth: Option<Arc<dyn AuthBackend>>,
    pub auth_events: Option<Receiver<AuthEvent>>,
    pub sync: Option<SyncCoordinator>,
    pub restore_receiver: Option<Receiver<Result<Option<Session>, RemoteError>>>,
    pub sign_in_receiver: Option<Receiver<Result<SignInOutcome, RemoteError>>>,
    pub sign_out_receiver: Option<Receiver<Result<(), RemoteError>>>,

    // Background AI jobs
    pub chat_receiver: Option<Receiver<ChatOutcome>>,
    pub briefing_receiver: Option<Receiver<TextOutcome>>,
    pub report_receiver: Option<Receiver<TextOutcome>>,
    pub enhance_receiver: Option<Receiver<EnhanceOutcome>>,
}

impl<'a> App<'a> {
    pub fn new(config: Config) -> Result<App<'a>, StorageError> {
        let storage = LocalStorage::open(&config.data.data_dir)?;
        let remote = if config.supabase.is_configured() {
            match SupabaseClient::new(&config.supabase, session_path(&config)) {
                Ok(client) => {
                    let client = Arc::new(client);
                    let auth: Arc<dyn AuthBackend> = client.clone();
                    let store: Arc<dyn RemoteStore> = client;
                    Some((auth, store))
                }
                Err(err) => {
                    tracing::warn!(error = %err, "cloud sync disabled");
                    None
                }
            }
        } else {
            tracing::info!("supabase not configured, running local-only");
            None
        };
        let mut app = App::with_backends(config, storage, remote);
        if let Some(auth) = app.auth.clone() {
            app.restore_receiver = Some(crate::remote::spawn_restore_session(auth));
        }
        Ok(app)
    }

    /// Builds the app around an already opened store. `remote` carries the
    /// auth backend and table store used for cloud sync.
    pub fn with_backends(
        config: Config,
        storage: LocalStorage,
        remote: Option<(Arc<dyn AuthBackend>, Arc<dyn RemoteStore>)>,
    ) -> App<'a> {
        let workspace = storage::load_workspace(&storage);
        let storage_usage = storage.usage();
        let custom_api_key = storage.get_item(CUSTOM_KEY_KEY).filter(|k| !k.trim().is_empty());

        let (auth, auth_events, sync) = match remote {
            Some((auth, store)) => {
                let events = auth.subscribe();
                let debounce = std::time::Duration::from_millis(config.supabase.debounce_ms);
                (
                    Some(auth),
                    Some(events),
                    Some(SyncCoordinator::new(store, debounce)),
                )
            }
            None => (None, None, None),
        };

        let mut chat_input = TextArea::default();
        chat_input.set_placeholder_text(PLACEHOLDER_IDLE);

        let mut app = App {
            should_quit: false,
            view: View::Home,
            input_mode: InputMode::Navigate,
            config,
            storage,
            workspace,
            storage_usage,
            custom_api_key,
            tasks_state: ListState::default(),
            events_state: ListState::default(),
            notes_state: ListState::default(),
            sessions_state: ListState::default(),
            enhancer_state: ListState::default(),
            settings_state: ListState::default(),
            calendar_day: Local::now().date_naive(),
            chat_input,
            chat_attachment: None,
            chat_scroll: 0,
            enhancer: EditorState::default(),
            form: None,
            show_help_popup: false,
            show_report_popup: false,
            report_scroll: 0,
            toast_message: None,
            toast_expiry: None,
            auth,
            auth_events,
            sync,
            restore_receiver: None,
            sign_in_receiver: None,
            sign_out_receiver: None,
            chat_receiver: None,
            briefing_receiver: None,
            report_receiver: None,
            enhance_receiver: None,
        };
        app.enhancer_state.select(Some(0));
        app.settings_state.select(Some(0));
        app.clamp_selections();
        app
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    pub fn toast(&mut self, message: impl Into<String>) {
        self.toast_with(message, ToastKind::Success);
    }

    pub fn toast_error(&mut self, message: impl Into<String>) {
        self.toast_with(message, ToastKind::Error);
    }

    pub fn toast_info(&mut self, message: impl Into<String>) {
        self.toast_with(message, ToastKind::Info);
    }

    fn toast_with(&mut self, message: impl Into<String>, kind: ToastKind) {
        let seconds = self.config.ui.toast_seconds.max(1) as i64;
        self.toast_message = Some((message.into(), kind));
        self.toast_expiry = Some(Local::now() + Duration::seconds(seconds));
    }

    pub fn api_key(&self) -> String {
        gemini::resolve_api_key(&self.config.gemini, self.custom_api_key.as_deref())
    }

    pub fn signed_in_email(&self) -> Option<String> {
        let user = self.sync.as_ref()?.user()?;
        Some(user.email.clone().unwrap_or_else(|| user.id.clone()))
    }

    pub fn is_syncing(&self) -> bool {
        self.sync.as_ref().is_some_and(|s| s.is_syncing())
    }

    pub fn is_processing_chat(&self) -> bool {
        self.chat_receiver.is_some()
    }

    pub fn set_view(&mut self, view: View) {
        self.view = view;
        self.input_mode = InputMode::Navigate;
        self.clamp_selections();
    }

    pub fn cycle_view(&mut self, forward: bool) {
        let views = View::all();
        let current = views.iter().position(|v| *v == self.view).unwrap_or(0);
        let next = if forward {
            (current + 1) % views.len()
        } else {
            (current + views.len() - 1) % views.len()
        };
        self.set_view(views[next]);
    }

    pub fn day_events(&self) -> Vec<&CalendarEvent> {
        self.workspace.events_on(self.calendar_day)
    }

    pub fn selected_task(&self) -> Option<&Task> {
        self.tasks_state
            .selected()
            .and_then(|i| self.workspace.tasks.get(i))
    }

    pub fn selected_event(&self) -> Option<&CalendarEvent> {
        let index = self.events_state.selected()?;
        self.day_events().get(index).copied()
    }

    pub fn selected_note(&self) -> Option<&Note> {
        self.notes_state
            .selected()
            .and_then(|i| self.workspace.notes.get(i))
    }

    pub fn selected_enhancer_item(&self) -> Option<EnhancerItem> {
        let index = self.enhancer_state.selected()?;
        enhancer_items().get(index).copied()
    }

    pub fn selected_setting(&self) -> Option<SettingsItem> {
        let index = self.settings_state.selected()?;
        SettingsItem::ALL.get(index).copied()
    }

    /// Moves the cursor of the list owned by the current view.
    pub fn move_selection(&mut self, delta: isize) {
        let len = self.current_list_len();
        let state = match self.view {
            View::Tasks => &mut self.tasks_state,
            View::Calendar => &mut self.events_state,
            View::Notes => &mut self.notes_state,
            View::Assistant => &mut self.sessions_state,
            View::Enhancer => &mut self.enhancer_state,
            View::Settings => &mut self.settings_state,
            View::Home => return,
        };
        step(state, len, delta);
        if self.view == View::Assistant
            && let Some(id) = self
                .sessions_state
                .selected()
                .and_then(|i| self.workspace.sessions.get(i))
                .map(|s| s.id.clone())
        {
            self.workspace.select_session(&id);
            self.chat_scroll = 0;
        }
    }

    fn current_list_len(&self) -> usize {
        match self.view {
            View::Tasks => self.workspace.tasks.len(),
            View::Calendar => self.day_events().len(),
            View::Notes => self.workspace.notes.len(),
            View::Assistant => self.workspace.sessions.len(),
            View::Enhancer => enhancer_items().len(),
            View::Settings => SettingsItem::ALL.len(),
            View::Home => 0,
        }
    }

    /// Keeps every list cursor inside its list after the workspace changed
    /// underneath it (deletes, pulls, restores).
    pub fn clamp_selections(&mut self) {
        let day_len = self.day_events().len();
        clamp(&mut self.tasks_state, self.workspace.tasks.len());
        clamp(&mut self.events_state, day_len);
        clamp(&mut self.notes_state, self.workspace.notes.len());

        let active = self
            .workspace
            .active_session_id
            .as_deref()
            .and_then(|id| self.workspace.sessions.iter().position(|s| s.id == id));
        match active {
            Some(index) => self.sessions_state.select(Some(index)),
            None => clamp(&mut self.sessions_state, self.workspace.sessions.len()),
        }
    }

    pub fn shift_calendar_day(&mut self, days: i64) {
        self.calendar_day += Duration::days(days);
        self.events_state = ListState::default();
        self.clamp_selections();
    }

    pub fn reset_chat_input(&mut self) {
        self.chat_input = TextArea::default();
        let placeholder = if self.input_mode == InputMode::Editing {
            PLACEHOLDER_CHAT
        } else {
            PLACEHOLDER_IDLE
        };
        self.chat_input.set_placeholder_text(placeholder);
    }

    pub fn transition_to(&mut self, mode: InputMode) {
        self.input_mode = mode;
        let placeholder = if mode == InputMode::Editing {
            PLACEHOLDER_CHAT
        } else {
            PLACEHOLDER_IDLE
        };
        self.chat_input.set_placeholder_text(placeholder);
    }

    pub fn open_form(&mut self, kind: FormKind, fields: Vec<(&'static str, String, bool)>) {
        self.form = Some(Form::new(kind, fields));
        if let Some(form) = self.form.as_mut()
            && form.kind == FormKind::SignIn
            && let Some(password) = form.fields.get_mut(1)
        {
            password.input.set_mask_char('\u{2022}');
        }
        if let Some(form) = self.form.as_mut()
            && form.kind == FormKind::ApiKey
            && let Some(key) = form.fields.get_mut(0)
        {
            key.input.set_mask_char('\u{2022}');
        }
    }

    pub fn refresh_storage_usage(&mut self) {
        self.storage_usage = self.storage.usage();
    }
}

fn clamp(state: &mut ListState, len: usize) {
    if len == 0 {
        state.select(None);
        return;
    }
    match state.selected() {
        Some(i) if i >= len => state.select(Some(len - 1)),
        Some(_) => {}
        None => state.select(Some(0)),
    }
}

fn step(state: &mut ListState, len: usize, delta: isize) {
    if len == 0 {
        state.select(None);
        return;
    }
    let current = state.selected().unwrap_or(0) as isize;
    let next = (current + delta).clamp(0, len as isize - 1);
    state.select(Some(next as usize));
}

/// App over a temporary data directory with no cloud backends.
#[cfg(test)]
pub(crate) fn test_app(dir: &std::path::Path) -> App<'static> {
    let config = Config {
        data: crate::config::DataConfig {
            data_dir: dir.to_path_buf(),
            backup_dir: dir.join("backups"),
            log_file: dir.join("bizmate.log"),
        },
        ..Config::default()
    };
    let storage = LocalStorage::open(dir).expect("open storage");
    App::with_backends(config, storage, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_on_home_with_default_workspace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = test_app(dir.path());
        assert_eq!(app.view, View::Home);
        assert!(!app.workspace.tasks.is_empty());
        assert_eq!(app.tasks_state.selected(), Some(0));
        assert!(app.sync.is_none());
        assert_eq!(app.signed_in_email(), None);
    }

    #[test]
    fn cycle_view_wraps_both_ways() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        app.cycle_view(false);
        assert_eq!(app.view, View::Settings);
        app.cycle_view(true);
        assert_eq!(app.view, View::Home);
    }

    #[test]
    fn selection_clamps_after_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        app.set_view(View::Tasks);
        let len = app.workspace.tasks.len();
        app.move_selection(len as isize + 5);
        assert_eq!(app.tasks_state.selected(), Some(len - 1));

        let id = app.selected_task().map(|t| t.id.clone()).expect("task");
        app.workspace.delete_task(&id);
        app.clamp_selections();
        if len > 1 {
            assert_eq!(app.tasks_state.selected(), Some(len - 2));
        } else {
            assert_eq!(app.tasks_state.selected(), None);
        }
    }

    #[test]
    fn moving_through_sessions_activates_them() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        let first = app.workspace.sessions[0].id.clone();
        app.workspace.new_session();
        app.set_view(View::Assistant);
        assert_eq!(app.sessions_state.selected(), Some(0));
        app.move_selection(1);
        assert_eq!(app.workspace.active_session_id.as_deref(), Some(first.as_str()));
    }

    #[test]
    fn form_reads_multiline_values() {
        let form = Form::new(
            FormKind::NewNote,
            vec![
                ("Title", "Plan".to_string(), false),
                ("Content", "line one\nline two".to_string(), true),
            ],
        );
        assert_eq!(form.value(0), "Plan");
        assert_eq!(form.value(1), "line one\nline two");
        assert_eq!(form.value(5), "");
    }
}

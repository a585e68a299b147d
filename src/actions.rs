use crate::{
    app::{App, EnhancerItem, FormKind, SettingsItem},
    backup,
    enhancer::{self, validate_upload},
    integrations::gemini::{self, ChatRequest, InlineImage, ToolCall},
    models::{CalendarEvent, ChatMessage, ChatRole, Priority, View},
    remote,
    storage::{self, CUSTOM_KEY_KEY},
    workspace::event_timestamp,
};
use chrono::{Local, NaiveDate};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

const REPLY_FALLBACK: &str = "Done";
const IMAGE_READY: &str = "Image ready!";

/// Writes every slot the workspace flagged since the last call and, when a
/// synced collection changed, re-arms the push debounce.
pub fn persist_changes(app: &mut App) {
    let push_needed = app.workspace.synced_collections_changed();
    let changes = app.workspace.take_changes();
    if !changes.any() {
        return;
    }
    if let Err(err) = storage::persist(&app.storage, &app.workspace, changes) {
        tracing::error!(error = %err, "failed to save workspace");
        app.toast_error(format!("Failed to save: {err}"));
    }
    app.refresh_storage_usage();
    if push_needed
        && let Some(sync) = app.sync.as_mut()
    {
        sync.on_local_change(Instant::now());
    }
}

/// Blocks until an in-flight pull or push lands, or `timeout` passes.
/// Returns false when a worker was still running at the deadline.
pub fn wait_for_sync(app: &mut App, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(sync) = app.sync.as_mut() {
            for notice in sync.drain(&mut app.workspace) {
                tracing::info!(?notice, "sync finished during shutdown");
            }
        }
        if !app.is_syncing() {
            return true;
        }
        if Instant::now() >= deadline {
            tracing::warn!("quitting with a cloud sync still running");
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

// Forms

pub fn open_new_task_form(app: &mut App) {
    app.open_form(
        FormKind::NewTask,
        vec![
            ("Title", String::new(), false),
            ("Description", String::new(), true),
            ("Priority (low/medium/high)", "medium".to_string(), false),
        ],
    );
}

pub fn open_edit_task_form(app: &mut App) {
    let Some(task) = app.selected_task().cloned() else {
        app.toast_info("No task selected.");
        return;
    };
    app.open_form(
        FormKind::EditTask(task.id),
        vec![
            ("Title", task.title, false),
            ("Description", task.description.unwrap_or_default(), true),
            (
                "Priority (low/medium/high)",
                task.priority.as_str().to_string(),
                false,
            ),
        ],
    );
}

pub fn open_new_event_form(app: &mut App) {
    let day = app.calendar_day.format("%Y-%m-%d").to_string();
    app.open_form(
        FormKind::NewEvent,
        vec![
            ("Title", String::new(), false),
            ("Date (YYYY-MM-DD, today, +3, fri)", day, false),
            ("Time (HH:MM)", "12:00".to_string(), false),
            ("Description", String::new(), true),
            ("Priority (low/medium/high)", "medium".to_string(), false),
        ],
    );
}

pub fn open_edit_event_form(app: &mut App) {
    let Some(event) = app.selected_event().cloned() else {
        app.toast_info("No event selected.");
        return;
    };
    let (day, time) = match event.starts_at() {
        Some(at) => {
            let local = at.with_timezone(&Local);
            (
                local.format("%Y-%m-%d").to_string(),
                local.format("%H:%M").to_string(),
            )
        }
        None => (String::new(), String::new()),
    };
    app.open_form(
        FormKind::EditEvent(event.id),
        vec![
            ("Title", event.title, false),
            ("Date (YYYY-MM-DD, today, +3, fri)", day, false),
            ("Time (HH:MM)", time, false),
            ("Description", event.description.unwrap_or_default(), true),
            (
                "Priority (low/medium/high)",
                event.priority.as_str().to_string(),
                false,
            ),
        ],
    );
}

pub fn open_new_note_form(app: &mut App) {
    app.open_form(
        FormKind::NewNote,
        vec![
            ("Title", String::new(), false),
            ("Content", String::new(), true),
        ],
    );
}

pub fn open_edit_note_form(app: &mut App) {
    let Some(note) = app.selected_note().cloned() else {
        app.toast_info("No note selected.");
        return;
    };
    app.open_form(
        FormKind::EditNote(note.id),
        vec![("Title", note.title, false), ("Content", note.content, true)],
    );
}

pub fn open_sector_form(app: &mut App) {
    let sector = app.workspace.briefing.sector.clone();
    app.open_form(FormKind::Sector, vec![("Sector", sector, false)]);
}

pub fn open_import_form(app: &mut App) {
    let dir = app.config.data.backup_dir.display().to_string();
    app.open_form(
        FormKind::ImportBackup,
        vec![("Backup file path", format!("{dir}/"), false)],
    );
}

pub fn open_merge_form(app: &mut App) {
    let dir = app.config.data.backup_dir.display().to_string();
    app.open_form(
        FormKind::MergeBackup,
        vec![("Backup file path", format!("{dir}/"), false)],
    );
}

pub fn open_api_key_form(app: &mut App) {
    let current = app.custom_api_key.clone().unwrap_or_default();
    app.open_form(FormKind::ApiKey, vec![("API key", current, false)]);
}

pub fn open_sign_in_form(app: &mut App) {
    if app.auth.is_none() {
        app.toast_error("Cloud sync is not configured. Fill in [supabase] in config.toml.");
        return;
    }
    if let Some(email) = app.signed_in_email() {
        app.toast_info(format!("Already signed in as {email}."));
        return;
    }
    app.open_form(
        FormKind::SignIn,
        vec![
            ("Email", String::new(), false),
            ("Password", String::new(), false),
        ],
    );
}

/// Applies the open form. A validation error keeps the form open.
pub fn submit_form(app: &mut App) {
    let Some(form) = app.form.take() else {
        return;
    };
    let values: Vec<String> = (0..form.fields.len()).map(|i| form.value(i)).collect();
    let result = match &form.kind {
        FormKind::SignIn => sign_in(app, &values[0], &values[1]),
        FormKind::NewTask => submit_task(app, None, &values),
        FormKind::EditTask(id) => submit_task(app, Some(id.as_str()), &values),
        FormKind::NewEvent => submit_event(app, None, &values),
        FormKind::EditEvent(id) => submit_event(app, Some(id.as_str()), &values),
        FormKind::NewNote => {
            app.workspace.add_note(&values[0], &values[1]);
            app.notes_state.select(Some(0));
            app.toast("Note created");
            Ok(())
        }
        FormKind::EditNote(id) => submit_note_edit(app, id, &values),
        FormKind::Sector => refresh_briefing(app, &values[0]),
        FormKind::ImportBackup => import_backup(app, Path::new(values[0].trim())),
        FormKind::MergeBackup => merge_backup(app, Path::new(values[0].trim())),
        FormKind::UploadImage => upload_image(app, Path::new(values[0].trim())),
        FormKind::AttachImage => attach_image(app, Path::new(values[0].trim())),
        FormKind::EnhancerDescription => {
            app.enhancer.set_description(&values[0]);
            Ok(())
        }
        FormKind::ApiKey => set_api_key(app, &values[0]),
    };
    if let Err(message) = result {
        app.toast_error(message);
        app.form = Some(form);
    }
    app.clamp_selections();
}

fn parse_priority(raw: &str) -> Result<Priority, String> {
    if raw.trim().is_empty() {
        return Ok(Priority::Medium);
    }
    Priority::parse(raw).ok_or_else(|| format!("Unknown priority: {}", raw.trim()))
}

fn optional(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn submit_task(app: &mut App, id: Option<&str>, values: &[String]) -> Result<(), String> {
    let priority = parse_priority(&values[2])?;
    match id {
        None => {
            app.workspace
                .add_task(&values[0], optional(&values[1]), priority)
                .map_err(|e| e.to_string())?;
            app.tasks_state.select(Some(0));
            app.toast("Task added");
        }
        Some(id) => {
            let mut task = app
                .workspace
                .tasks
                .iter()
                .find(|t| t.id == id)
                .cloned()
                .ok_or_else(|| "Task no longer exists.".to_string())?;
            let title = values[0].trim();
            if title.is_empty() {
                return Err("Title must not be empty.".to_string());
            }
            task.title = title.to_string();
            task.description = optional(&values[1]);
            task.priority = priority;
            app.workspace.update_task(task).map_err(|e| e.to_string())?;
            app.toast("Task updated");
        }
    }
    Ok(())
}

fn submit_event(app: &mut App, id: Option<&str>, values: &[String]) -> Result<(), String> {
    let priority = parse_priority(&values[4])?;
    let time = optional(&values[2]);
    match id {
        None => {
            let event = app
                .workspace
                .add_event(
                    &values[0],
                    &values[1],
                    time.as_deref(),
                    optional(&values[3]),
                    priority,
                )
                .map_err(|e| e.to_string())?;
            if let Some(day) = event_day(event) {
                app.calendar_day = day;
            }
            app.toast("Event added to the calendar");
        }
        Some(id) => {
            let title = values[0].trim();
            if title.is_empty() {
                return Err("Title must not be empty.".to_string());
            }
            let date = event_timestamp(&values[1], time.as_deref(), Local::now().date_naive())
                .map_err(|e| e.to_string())?;
            let event = CalendarEvent {
                id: id.to_string(),
                title: title.to_string(),
                date,
                description: optional(&values[3]),
                priority,
            };
            let day = event_day(&event);
            app.workspace.update_event(event).map_err(|e| e.to_string())?;
            if let Some(day) = day {
                app.calendar_day = day;
            }
            app.toast("Event updated");
        }
    }
    Ok(())
}

fn event_day(event: &CalendarEvent) -> Option<NaiveDate> {
    event
        .starts_at()
        .map(|at| at.with_timezone(&Local).date_naive())
}

fn submit_note_edit(app: &mut App, id: &str, values: &[String]) -> Result<(), String> {
    let mut note = app
        .workspace
        .notes
        .iter()
        .find(|n| n.id == id)
        .cloned()
        .ok_or_else(|| "Note no longer exists.".to_string())?;
    if !values[0].trim().is_empty() {
        note.title = values[0].trim().to_string();
    }
    note.content = values[1].clone();
    app.workspace.update_note(note).map_err(|e| e.to_string())?;
    app.toast("Note updated");
    Ok(())
}

// Tasks, events, notes

pub fn toggle_selected_task(app: &mut App) {
    let Some(id) = app.selected_task().map(|t| t.id.clone()) else {
        return;
    };
    if let Ok(status) = app.workspace.toggle_task_status(&id) {
        app.toast_info(format!("Task marked {}", status.as_str()));
    }
}

pub fn cycle_selected_task_status(app: &mut App) {
    let Some(id) = app.selected_task().map(|t| t.id.clone()) else {
        return;
    };
    if let Ok(status) = app.workspace.cycle_task_status(&id) {
        app.toast_info(format!("Status: {}", status.as_str()));
    }
}

pub fn cycle_selected_task_priority(app: &mut App) {
    let Some(id) = app.selected_task().map(|t| t.id.clone()) else {
        return;
    };
    if let Ok(priority) = app.workspace.cycle_task_priority(&id) {
        app.toast_info(format!("Priority: {}", priority.as_str()));
    }
}

/// Deletes the selected row of whichever list the current view shows.
pub fn delete_selected(app: &mut App) {
    let removed = match app.view {
        View::Tasks => app
            .selected_task()
            .map(|t| t.id.clone())
            .is_some_and(|id| app.workspace.delete_task(&id)),
        View::Calendar => app
            .selected_event()
            .map(|e| e.id.clone())
            .is_some_and(|id| app.workspace.delete_event(&id)),
        View::Notes => app
            .selected_note()
            .map(|n| n.id.clone())
            .is_some_and(|id| app.workspace.delete_note(&id)),
        View::Assistant => app
            .workspace
            .active_session_id
            .clone()
            .is_some_and(|id| app.workspace.delete_session(&id)),
        _ => false,
    };
    if removed {
        app.clamp_selections();
        app.toast("Deleted");
    }
}

/// Turns assistant tool calls into workspace edits, one toast per edit.
pub fn apply_tool_calls(app: &mut App, calls: Vec<ToolCall>) {
    for call in calls {
        let result = match call {
            ToolCall::AddTask {
                title,
                description,
                priority,
            } => app
                .workspace
                .add_task(&title, description, priority)
                .map(|_| "Assistant added a task"),
            ToolCall::AddEvent {
                title,
                date,
                time,
                description,
                priority,
            } => app
                .workspace
                .add_event(&title, &date, time.as_deref(), description, priority)
                .map(|_| "Event added to the calendar"),
            ToolCall::AddNote { title, content } => {
                app.workspace.add_note(&title, &content);
                Ok("Note created")
            }
        };
        match result {
            Ok(message) => app.toast(message),
            Err(err) => {
                tracing::warn!(error = %err, "assistant tool call rejected");
                app.toast_error(format!("Assistant edit failed: {err}"));
            }
        }
    }
    app.clamp_selections();
}

// Assistant

pub fn new_chat_session(app: &mut App) {
    app.workspace.new_session();
    app.chat_scroll = 0;
    app.clamp_selections();
}

pub fn send_chat(app: &mut App) {
    if app.chat_receiver.is_some() {
        app.toast_info("The assistant is still answering.");
        return;
    }
    let text = app.chat_input.lines().join("\n").trim().to_string();
    if text.is_empty() && app.chat_attachment.is_none() {
        return;
    }
    let api_key = app.api_key();
    if !app.config.gemini.enabled || api_key.is_empty() {
        app.toast_error("Set a Gemini API key in Settings first.");
        return;
    }

    if app.workspace.active_session().is_none() {
        app.workspace.new_session();
    }
    let Some(session) = app.workspace.active_session() else {
        return;
    };
    let session_id = session.id.clone();
    let history = session.messages.clone();

    let attachment = app.chat_attachment.take();
    let mut message = ChatMessage::new(ChatRole::User, text.clone());
    message.attachment_name = attachment.as_ref().map(|(name, _)| name.clone());
    if let Err(err) = app.workspace.append_message(&session_id, message) {
        app.toast_error(err.to_string());
        return;
    }

    let request = ChatRequest {
        session_id,
        system_instruction: gemini::build_system_instruction(&app.workspace, Local::now()),
        history,
        text,
        attachment: attachment.map(|(_, image)| image),
    };
    app.chat_receiver = Some(gemini::spawn_chat(
        app.config.gemini.clone(),
        api_key,
        request,
    ));
    app.reset_chat_input();
    app.chat_scroll = 0;
    app.clamp_selections();
}

/// Appends the finished reply (and any generated images) to the session
/// the request was sent from.
pub fn finish_chat(app: &mut App, session_id: &str, reply: gemini::ChatReply) {
    apply_tool_calls(app, reply.tool_calls);
    for image in reply.images {
        let mut message = ChatMessage::new(ChatRole::Model, IMAGE_READY);
        message.image = Some(image);
        if let Err(err) = app.workspace.append_message(session_id, message) {
            tracing::warn!(error = %err, "image arrived for a deleted session");
        }
    }
    let text = if reply.text.trim().is_empty() {
        REPLY_FALLBACK.to_string()
    } else {
        reply.text
    };
    let mut message = ChatMessage::new(ChatRole::Model, text);
    message.grounding_metadata = reply.grounding_metadata;
    if let Err(err) = app.workspace.append_message(session_id, message) {
        tracing::warn!(error = %err, "reply arrived for a deleted session");
    }
}

fn attach_image(app: &mut App, path: &Path) -> Result<(), String> {
    let mime_type = validate_upload(path).map_err(|e| e.to_string())?;
    let data = fs::read(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image")
        .to_string();
    app.toast_info(format!("Attached {name}"));
    app.chat_attachment = Some((
        name,
        InlineImage {
            mime_type: mime_type.to_string(),
            data,
        },
    ));
    Ok(())
}

// Market briefing

/// A new sector clears the detailed report before the briefing is rebuilt.
pub fn refresh_briefing(app: &mut App, sector: &str) -> Result<(), String> {
    let sector = sector.trim();
    if sector.is_empty() {
        return Err("Sector must not be empty.".to_string());
    }
    if app.briefing_receiver.is_some() {
        app.toast_info("Briefing is already loading.");
        return Ok(());
    }
    let api_key = app.api_key();
    let simulate = app.workspace.sim_mode;
    if !simulate && api_key.is_empty() {
        return Err("Set a Gemini API key or enable simulation mode.".to_string());
    }
    app.workspace.set_detailed_report(None);
    app.briefing_receiver = Some(gemini::spawn_briefing(
        app.config.gemini.clone(),
        api_key,
        sector.to_string(),
        simulate,
    ));
    app.toast_info(format!("Analysing {sector}..."));
    Ok(())
}

pub fn generate_report(app: &mut App) {
    let sector = app.workspace.briefing.sector.trim().to_string();
    if sector.is_empty() {
        app.toast_error("Choose a sector first.");
        return;
    }
    if app.report_receiver.is_some() {
        app.toast_info("Report is already being written.");
        return;
    }
    let api_key = app.api_key();
    let simulate = app.workspace.sim_mode;
    if !simulate && api_key.is_empty() {
        app.toast_error("Set a Gemini API key or enable simulation mode.");
        return;
    }
    app.report_receiver = Some(gemini::spawn_report(
        app.config.gemini.clone(),
        api_key,
        sector,
        simulate,
    ));
    app.toast_info("Writing the detailed report. This can take a few minutes.");
}

pub fn open_report(app: &mut App) {
    if app.workspace.detailed_report.is_none() {
        app.toast_info("No detailed report yet. Press r to generate one.");
        return;
    }
    app.report_scroll = 0;
    app.show_report_popup = true;
}

// Account

fn sign_in(app: &mut App, email: &str, password: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err("Email and password are required.".to_string());
    }
    let Some(auth) = app.auth.clone() else {
        return Err("Cloud sync is not configured.".to_string());
    };
    if app.sign_in_receiver.is_some() {
        return Err("Sign-in already in progress.".to_string());
    }
    app.sign_in_receiver = Some(remote::spawn_sign_in(
        auth,
        email.to_string(),
        password.to_string(),
        app.config.supabase.auto_sign_up,
    ));
    app.toast_info("Signing in...");
    Ok(())
}

pub fn sign_out(app: &mut App) {
    let Some(auth) = app.auth.clone() else {
        app.toast_error("Cloud sync is not configured.");
        return;
    };
    if app.signed_in_email().is_none() {
        app.toast_info("Not signed in.");
        return;
    }
    app.sign_out_receiver = Some(remote::spawn_sign_out(auth));
}

pub fn toggle_account(app: &mut App) {
    if app.signed_in_email().is_some() {
        sign_out(app);
    } else {
        open_sign_in_form(app);
    }
}

// Backup

pub fn export_backup(app: &mut App) {
    persist_changes(app);
    match backup::export_workspace(&app.storage, &app.config.data.backup_dir) {
        Ok(path) => app.toast(format!("Backup saved to {}", path.display())),
        Err(err) => {
            tracing::error!(error = %err, "backup export failed");
            app.toast_error(format!("Export failed: {err}"));
        }
    }
}

fn import_backup(app: &mut App, path: &Path) -> Result<(), String> {
    let data = backup::parse_backup_file(path).map_err(|e| e.to_string())?;
    let restored = app.workspace.restore(&data);
    if restored == 0 {
        return Err("The file contains no workspace data.".to_string());
    }
    tracing::info!(restored, path = %path.display(), "backup restored");
    app.clamp_selections();
    app.toast(format!("Restored {restored} sections from backup"));
    Ok(())
}

/// Writes every slot of a backup straight into storage, then reloads the
/// workspace from disk. Slots the backup does not name keep their values.
fn merge_backup(app: &mut App, path: &Path) -> Result<(), String> {
    let data = backup::parse_backup_file(path).map_err(|e| e.to_string())?;
    if data.is_empty() {
        return Err("The file contains no workspace data.".to_string());
    }
    // Pending edits must reach disk before the reload reads it back.
    persist_changes(app);
    let written =
        backup::write_backup_to_storage(&app.storage, &data).map_err(|e| e.to_string())?;
    app.workspace = storage::load_workspace(&app.storage);
    app.custom_api_key = app
        .storage
        .get_item(CUSTOM_KEY_KEY)
        .filter(|k| !k.trim().is_empty());
    app.refresh_storage_usage();
    if let Some(sync) = app.sync.as_mut() {
        sync.on_local_change(Instant::now());
    }
    app.clamp_selections();
    tracing::info!(written, path = %path.display(), "backup merged into storage");
    app.toast(format!("Wrote {written} slots from backup"));
    Ok(())
}

// Settings

pub fn toggle_theme(app: &mut App) {
    let theme = app.workspace.toggle_theme();
    app.toast_info(format!("Theme: {}", theme.as_str()));
}

pub fn toggle_sim_mode(app: &mut App) {
    let enabled = !app.workspace.sim_mode;
    app.workspace.set_sim_mode(enabled);
    app.toast_info(if enabled {
        "Simulation mode on"
    } else {
        "Simulation mode off"
    });
}

pub fn clear_history(app: &mut App) {
    app.workspace.clear_history();
    app.chat_scroll = 0;
    app.clamp_selections();
    app.toast("Chat history cleared");
}

fn set_api_key(app: &mut App, key: &str) -> Result<(), String> {
    let key = key.trim();
    let result = if key.is_empty() {
        app.storage.remove_item(CUSTOM_KEY_KEY)
    } else {
        app.storage.set_item(CUSTOM_KEY_KEY, key)
    };
    result.map_err(|e| e.to_string())?;
    app.custom_api_key = (!key.is_empty()).then(|| key.to_string());
    app.refresh_storage_usage();
    app.toast(if key.is_empty() {
        "API key removed"
    } else {
        "API key saved"
    });
    Ok(())
}

pub fn open_data_dir(app: &mut App) {
    let path = app.config.data.data_dir.clone();
    if let Err(e) = open::that(&path) {
        app.toast_error(format!("Failed to open {}: {e}", path.display()));
    }
}

pub fn activate_setting(app: &mut App) {
    let Some(item) = app.selected_setting() else {
        return;
    };
    match item {
        SettingsItem::Theme => toggle_theme(app),
        SettingsItem::SimMode => toggle_sim_mode(app),
        SettingsItem::Sector => open_sector_form(app),
        SettingsItem::ApiKey => open_api_key_form(app),
        SettingsItem::Account => toggle_account(app),
        SettingsItem::Export => export_backup(app),
        SettingsItem::Import => open_import_form(app),
        SettingsItem::MergeBackup => open_merge_form(app),
        SettingsItem::ClearHistory => clear_history(app),
        SettingsItem::DataDir => open_data_dir(app),
    }
}

// Photo enhancer

fn upload_image(app: &mut App, path: &Path) -> Result<(), String> {
    app.enhancer.load_image(path).map_err(|e| e.to_string())?;
    app.enhancer_state.select(Some(0));
    app.toast("Photo loaded");
    Ok(())
}

pub fn open_upload_form(app: &mut App) {
    app.open_form(
        FormKind::UploadImage,
        vec![("Image path (.jpg, .png)", String::new(), false)],
    );
}

pub fn open_attach_form(app: &mut App) {
    app.open_form(
        FormKind::AttachImage,
        vec![("Image path (.jpg, .png)", String::new(), false)],
    );
}

pub fn activate_enhancer_item(app: &mut App) {
    let Some(item) = app.selected_enhancer_item() else {
        return;
    };
    match item {
        EnhancerItem::Marketplace(marketplace) => app.enhancer.set_marketplace(marketplace),
        EnhancerItem::Template(template) => app.enhancer.toggle_template(template),
        EnhancerItem::Style(style) => app.enhancer.toggle_style(style),
        EnhancerItem::Mood(mood) => app.enhancer.toggle_mood(mood),
        EnhancerItem::Description => {
            let current = app.enhancer.description.clone();
            app.open_form(
                FormKind::EnhancerDescription,
                vec![("What should the photo look like?", current, true)],
            );
        }
        EnhancerItem::Enhance => start_enhance(app),
    }
}

pub fn start_enhance(app: &mut App) {
    if app.enhance_receiver.is_some() {
        app.toast_info("Enhancement already running.");
        return;
    }
    match app.enhancer.begin_enhance() {
        Ok(job) => {
            app.enhance_receiver = Some(enhancer::spawn_enhance(
                app.config.gemini.clone(),
                app.api_key(),
                app.workspace.sim_mode,
                job,
            ));
            app.toast_info("Enhancing photo...");
        }
        Err(err) => app.toast_error(err.to_string()),
    }
}

pub fn save_enhanced(app: &mut App) {
    let dir = app.config.data.data_dir.join("enhanced");
    match app.enhancer.save_result(&dir) {
        Ok(path) => app.toast(format!("Saved {}", path.display())),
        Err(err) => app.toast_error(format!("Save failed: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_app;
    use crate::models::{TaskStatus, ThemeMode};
    use crate::storage::{TASKS_KEY, THEME_KEY};

    #[test]
    fn tool_calls_edit_the_workspace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        let tasks_before = app.workspace.tasks.len();
        apply_tool_calls(
            &mut app,
            vec![
                ToolCall::AddTask {
                    title: "Call supplier".to_string(),
                    description: None,
                    priority: Priority::High,
                },
                ToolCall::AddEvent {
                    title: "Demo".to_string(),
                    date: "2025-03-04".to_string(),
                    time: Some("15:30".to_string()),
                    description: None,
                    priority: Priority::Medium,
                },
                ToolCall::AddNote {
                    title: "Idea".to_string(),
                    content: "Bundle pricing".to_string(),
                },
            ],
        );
        assert_eq!(app.workspace.tasks.len(), tasks_before + 1);
        assert_eq!(app.workspace.tasks[0].title, "Call supplier");
        assert_eq!(app.workspace.events.len(), 1);
        assert_eq!(app.workspace.notes[0].title, "Idea");
        assert!(app.toast_message.is_some());
    }

    #[test]
    fn bad_event_date_from_assistant_raises_error_toast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        apply_tool_calls(
            &mut app,
            vec![ToolCall::AddEvent {
                title: "Demo".to_string(),
                date: "someday".to_string(),
                time: None,
                description: None,
                priority: Priority::Low,
            }],
        );
        assert!(app.workspace.events.is_empty());
        assert!(matches!(
            app.toast_message,
            Some((_, crate::models::ToastKind::Error))
        ));
    }

    #[test]
    fn task_form_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        open_new_task_form(&mut app);
        if let Some(form) = app.form.as_mut() {
            form.fields[0].input.insert_str("Ship order");
            form.fields[2].input = tui_textarea::TextArea::new(vec!["high".to_string()]);
        }
        submit_form(&mut app);
        assert!(app.form.is_none());
        assert_eq!(app.workspace.tasks[0].title, "Ship order");
        assert_eq!(app.workspace.tasks[0].priority, Priority::High);
        assert_eq!(app.workspace.tasks[0].status, TaskStatus::Todo);
    }

    #[test]
    fn invalid_form_stays_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        open_new_task_form(&mut app);
        submit_form(&mut app);
        assert!(app.form.is_some());
        assert!(matches!(
            app.toast_message,
            Some((_, crate::models::ToastKind::Error))
        ));
    }

    #[test]
    fn persist_changes_writes_slots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        app.workspace
            .add_task("Persist me", None, Priority::Low)
            .expect("add");
        persist_changes(&mut app);
        let raw = app.storage.get_item(TASKS_KEY).expect("tasks slot");
        assert!(raw.contains("Persist me"));
        assert!(!app.workspace.changes().any());
    }

    #[test]
    fn import_replaces_tasks_from_backup_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        let file = dir.path().join("backup.json");
        fs::write(
            &file,
            r#"{"version":1,"timestamp":0,"data":{"tasks":[{"id":"1","title":"From backup","status":"done","priority":"low"}]}}"#,
        )
        .expect("write backup");
        import_backup(&mut app, &file).expect("import");
        assert_eq!(app.workspace.tasks.len(), 1);
        assert_eq!(app.workspace.tasks[0].title, "From backup");
        persist_changes(&mut app);
        assert!(
            app.storage
                .get_item(TASKS_KEY)
                .is_some_and(|raw| raw.contains("From backup"))
        );
    }

    #[test]
    fn merge_writes_slots_and_keeps_unnamed_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        app.workspace.add_note("Kept", "still here");
        persist_changes(&mut app);

        let file = dir.path().join("merge.json");
        fs::write(
            &file,
            r#"{"data":{"tasks":[{"id":"9","title":"Merged","status":"todo","priority":"high"}],"theme":"dark"}}"#,
        )
        .expect("write backup");
        merge_backup(&mut app, &file).expect("merge");

        assert_eq!(app.storage.get_item(THEME_KEY).as_deref(), Some("dark"));
        assert_eq!(app.workspace.theme, ThemeMode::Dark);
        assert_eq!(app.workspace.tasks.len(), 1);
        assert_eq!(app.workspace.tasks[0].title, "Merged");
        assert_eq!(app.workspace.notes.len(), 1);
        assert_eq!(app.workspace.notes[0].title, "Kept");
    }

    #[test]
    fn merge_rejects_empty_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        let file = dir.path().join("empty.json");
        fs::write(&file, r#"{"version":1,"timestamp":0}"#).expect("write backup");
        assert!(merge_backup(&mut app, &file).is_err());
    }

    #[test]
    fn shutdown_waits_for_running_sync() {
        use crate::remote::memory::MemoryStore;
        use crate::remote::{AuthEvent, Session, User};
        use crate::sync::SyncCoordinator;
        use std::sync::Arc;

        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        let store = Arc::new(MemoryStore::default());
        let mut sync = SyncCoordinator::new(store, Duration::from_millis(3000));
        assert!(sync.on_auth_event(AuthEvent::SignedIn(Session {
            access_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: 4_000_000_000,
            user: User {
                id: "u1".to_string(),
                email: None,
            },
        })));
        app.sync = Some(sync);
        assert!(app.is_syncing());

        assert!(wait_for_sync(&mut app, Duration::from_secs(5)));
        assert!(!app.is_syncing());
        assert!(app.sync.as_ref().is_some_and(|s| s.pull_done()));
    }

    #[test]
    fn export_writes_backup_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        export_backup(&mut app);
        let entries: Vec<_> = fs::read_dir(&app.config.data.backup_dir)
            .expect("backup dir")
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn finish_chat_appends_images_then_reply() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        let session_id = app.workspace.sessions[0].id.clone();
        finish_chat(
            &mut app,
            &session_id,
            gemini::ChatReply {
                text: String::new(),
                grounding_metadata: None,
                tool_calls: Vec::new(),
                images: vec!["aGVsbG8=".to_string()],
            },
        );
        let messages = &app.workspace.sessions[0].messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].image.as_deref(), Some("aGVsbG8="));
        assert_eq!(messages[1].content, REPLY_FALLBACK);
    }

    #[test]
    fn finish_chat_for_deleted_session_drops_images_and_reply() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        let before: usize = app.workspace.sessions.iter().map(|s| s.messages.len()).sum();
        finish_chat(
            &mut app,
            "gone",
            gemini::ChatReply {
                text: "late".to_string(),
                grounding_metadata: None,
                tool_calls: Vec::new(),
                images: vec!["aGVsbG8=".to_string()],
            },
        );
        let after: usize = app.workspace.sessions.iter().map(|s| s.messages.len()).sum();
        assert_eq!(before, after);
    }

    #[test]
    fn briefing_without_key_requires_sim_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        app.config.gemini.api_key.clear();
        app.custom_api_key = None;
        let env_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
        if env_key.is_empty() {
            assert!(refresh_briefing(&mut app, "Retail").is_err());
        }
        app.workspace.set_sim_mode(true);
        assert!(refresh_briefing(&mut app, "Retail").is_ok());
        assert!(app.briefing_receiver.is_some());
        assert!(app.workspace.detailed_report.is_none());
    }
}

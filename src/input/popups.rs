use crate::{actions, app::App, config::key_match};
use crossterm::event::{KeyCode, KeyEvent};

/// Returns true when a popup consumed the key.
pub fn handle_popup_events(app: &mut App, key: KeyEvent) -> bool {
    if app.form.is_some() {
        handle_form_popup(app, key);
        return true;
    }
    if app.show_help_popup {
        if key.code == KeyCode::Esc || key_match(&key, &app.config.keybindings.global.help) {
            app.show_help_popup = false;
        }
        return true;
    }
    if app.show_report_popup {
        handle_report_popup(app, key);
        return true;
    }
    false
}

fn handle_form_popup(app: &mut App, key: KeyEvent) {
    if key_match(&key, &app.config.keybindings.popup.cancel) {
        app.form = None;
        return;
    }
    if key_match(&key, &app.config.keybindings.popup.next_field) {
        if let Some(form) = app.form.as_mut() {
            form.next_field();
        }
        return;
    }
    if key.code == KeyCode::BackTab {
        if let Some(form) = app.form.as_mut() {
            form.prev_field();
        }
        return;
    }

    let multiline = app
        .form
        .as_ref()
        .and_then(|f| f.fields.get(f.focus))
        .is_some_and(|field| field.multiline);
    if multiline && key_match(&key, &app.config.keybindings.composer.newline) {
        if let Some(field) = app.form.as_mut().and_then(|f| f.focused_mut()) {
            field.input.insert_newline();
        }
        return;
    }
    if key_match(&key, &app.config.keybindings.popup.confirm) {
        actions::submit_form(app);
        return;
    }

    if let Some(field) = app.form.as_mut().and_then(|f| f.focused_mut()) {
        // Single-line fields never grow a second line.
        if !field.multiline && key.code == KeyCode::Enter {
            return;
        }
        field.input.input(key);
    }
}

fn handle_report_popup(app: &mut App, key: KeyEvent) {
    if key_match(&key, &app.config.keybindings.popup.cancel) || key.code == KeyCode::Char('q') {
        app.show_report_popup = false;
        return;
    }
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => {
            app.report_scroll = app.report_scroll.saturating_sub(1);
        }
        KeyCode::Down | KeyCode::Char('j') => {
            app.report_scroll = app.report_scroll.saturating_add(1);
        }
        KeyCode::PageUp => {
            app.report_scroll = app.report_scroll.saturating_sub(10);
        }
        KeyCode::PageDown | KeyCode::Char(' ') => {
            app.report_scroll = app.report_scroll.saturating_add(10);
        }
        KeyCode::Home => app.report_scroll = 0,
        _ => {}
    }
}

use crate::{
    actions,
    app::App,
    config::key_match,
    enhancer::Screen,
    models::{InputMode, View},
};
use crossterm::event::{KeyCode, KeyEvent};

pub fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    if key_match(&key, &app.config.keybindings.global.quit) {
        app.quit();
    } else if key_match(&key, &app.config.keybindings.global.help) {
        app.show_help_popup = true;
    } else if key_match(&key, &app.config.keybindings.global.next_view) {
        app.cycle_view(true);
    } else if key_match(&key, &app.config.keybindings.global.prev_view) {
        app.cycle_view(false);
    } else if key_match(&key, &app.config.keybindings.global.sign_in) {
        actions::open_sign_in_form(app);
    } else if key_match(&key, &app.config.keybindings.global.sign_out) {
        actions::sign_out(app);
    } else if key_match(&key, &app.config.keybindings.global.export) {
        actions::export_backup(app);
    } else if key_match(&key, &app.config.keybindings.global.import) {
        actions::open_import_form(app);
    } else if key_match(&key, &app.config.keybindings.global.toggle_theme) {
        actions::toggle_theme(app);
    } else if let KeyCode::Char(c @ '1'..='7') = key.code {
        let index = c as usize - '1' as usize;
        if let Some(view) = View::all().get(index) {
            app.set_view(*view);
        }
    } else if key_match(&key, &app.config.keybindings.list.up) {
        app.move_selection(-1);
    } else if key_match(&key, &app.config.keybindings.list.down) {
        app.move_selection(1);
    } else {
        match app.view {
            View::Home => handle_home(app, key),
            View::Tasks => handle_tasks(app, key),
            View::Calendar => handle_calendar(app, key),
            View::Notes => handle_notes(app, key),
            View::Assistant => handle_assistant(app, key),
            View::Enhancer => handle_enhancer(app, key),
            View::Settings => handle_settings(app, key),
        }
    }
}

/// Mouse wheel: scrolls the conversation on the assistant view, moves the
/// list cursor elsewhere.
pub fn scroll(app: &mut App, delta: isize) {
    if app.show_report_popup {
        app.report_scroll = if delta < 0 {
            app.report_scroll.saturating_sub(1)
        } else {
            app.report_scroll.saturating_add(1)
        };
    } else if app.view == View::Assistant {
        app.chat_scroll = if delta < 0 {
            app.chat_scroll.saturating_add(1)
        } else {
            app.chat_scroll.saturating_sub(1)
        };
    } else {
        app.move_selection(delta);
    }
}

fn handle_home(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('b') | KeyCode::Char('s') => actions::open_sector_form(app),
        KeyCode::Char('r') => actions::generate_report(app),
        KeyCode::Char('v') | KeyCode::Enter => actions::open_report(app),
        _ => {}
    }
}

fn handle_tasks(app: &mut App, key: KeyEvent) {
    let list = &app.config.keybindings.list;
    if key_match(&key, &list.add) {
        actions::open_new_task_form(app);
    } else if key_match(&key, &list.edit) || key_match(&key, &list.open) {
        actions::open_edit_task_form(app);
    } else if key_match(&key, &list.delete) {
        actions::delete_selected(app);
    } else if key_match(&key, &list.toggle) {
        actions::toggle_selected_task(app);
    } else if key_match(&key, &list.cycle_status) {
        actions::cycle_selected_task_status(app);
    } else if key_match(&key, &list.cycle_priority) {
        actions::cycle_selected_task_priority(app);
    }
}

fn handle_calendar(app: &mut App, key: KeyEvent) {
    let list = &app.config.keybindings.list;
    if key_match(&key, &list.add) {
        actions::open_new_event_form(app);
    } else if key_match(&key, &list.edit) || key_match(&key, &list.open) {
        actions::open_edit_event_form(app);
    } else if key_match(&key, &list.delete) {
        actions::delete_selected(app);
    } else {
        match key.code {
            KeyCode::Left | KeyCode::Char('h') => app.shift_calendar_day(-1),
            KeyCode::Right | KeyCode::Char('l') => app.shift_calendar_day(1),
            KeyCode::Char('[') => app.shift_calendar_day(-7),
            KeyCode::Char(']') => app.shift_calendar_day(7),
            KeyCode::Char('t') => {
                app.calendar_day = chrono::Local::now().date_naive();
                app.shift_calendar_day(0);
            }
            _ => {}
        }
    }
}

fn handle_notes(app: &mut App, key: KeyEvent) {
    let list = &app.config.keybindings.list;
    if key_match(&key, &list.add) {
        actions::open_new_note_form(app);
    } else if key_match(&key, &list.edit) || key_match(&key, &list.open) {
        actions::open_edit_note_form(app);
    } else if key_match(&key, &list.delete) {
        actions::delete_selected(app);
    }
}

fn handle_assistant(app: &mut App, key: KeyEvent) {
    let list = &app.config.keybindings.list;
    if key_match(&key, &list.new_session) {
        actions::new_chat_session(app);
    } else if key_match(&key, &list.delete) {
        actions::delete_selected(app);
    } else if key_match(&key, &list.add) {
        actions::open_attach_form(app);
    } else if key_match(&key, &list.open) || key.code == KeyCode::Char('i') {
        app.transition_to(InputMode::Editing);
    } else {
        match key.code {
            KeyCode::PageUp => app.chat_scroll = app.chat_scroll.saturating_add(5),
            KeyCode::PageDown => app.chat_scroll = app.chat_scroll.saturating_sub(5),
            _ => {}
        }
    }
}

fn handle_enhancer(app: &mut App, key: KeyEvent) {
    match app.enhancer.screen() {
        Screen::Upload => {
            if key_match(&key, &app.config.keybindings.list.open)
                || key.code == KeyCode::Char('u')
            {
                actions::open_upload_form(app);
            }
        }
        Screen::Edit => {
            if key_match(&key, &app.config.keybindings.list.toggle)
                || key_match(&key, &app.config.keybindings.list.open)
            {
                actions::activate_enhancer_item(app);
            } else {
                match key.code {
                    KeyCode::Char('g') => actions::start_enhance(app),
                    KeyCode::Char('b') => app.enhancer.back(),
                    KeyCode::Char('u') => actions::open_upload_form(app),
                    KeyCode::Char('x') => app.enhancer.reset(),
                    _ => {}
                }
            }
        }
        Screen::Result => match key.code {
            KeyCode::Char('r') => app.enhancer.refine(),
            KeyCode::Char('w') => actions::save_enhanced(app),
            KeyCode::Char('x') => {
                app.enhancer.reset();
                app.enhancer_state.select(Some(0));
            }
            _ => {}
        },
    }
}

fn handle_settings(app: &mut App, key: KeyEvent) {
    if key_match(&key, &app.config.keybindings.list.open)
        || key_match(&key, &app.config.keybindings.list.toggle)
    {
        actions::activate_setting(app);
    } else if key_match(&key, &app.config.keybindings.global.data_dir) {
        actions::open_data_dir(app);
    }
}

use crate::{actions, app::App, config::key_match, models::InputMode};
use crossterm::event::KeyEvent;

/// Keys while the assistant composer has focus.
pub fn handle_composer(app: &mut App, key: KeyEvent) {
    if key_match(&key, &app.config.keybindings.composer.submit) {
        actions::send_chat(app);
        return;
    }

    if key_match(&key, &app.config.keybindings.composer.cancel) {
        app.transition_to(InputMode::Navigate);
        return;
    }

    if key_match(&key, &app.config.keybindings.composer.clear) {
        app.chat_attachment = None;
        app.reset_chat_input();
        return;
    }

    if key_match(&key, &app.config.keybindings.composer.newline) {
        app.chat_input.insert_newline();
        return;
    }

    app.chat_input.input(key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_app;
    use crossterm::event::{KeyCode, KeyEventKind, KeyEventState, KeyModifiers};

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        }
    }

    #[test]
    fn typing_and_newline_build_multiline_message() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        app.transition_to(InputMode::Editing);
        handle_composer(&mut app, key(KeyCode::Char('h'), KeyModifiers::NONE));
        handle_composer(&mut app, key(KeyCode::Char('i'), KeyModifiers::NONE));
        handle_composer(&mut app, key(KeyCode::Enter, KeyModifiers::SHIFT));
        handle_composer(&mut app, key(KeyCode::Char('!'), KeyModifiers::NONE));
        assert_eq!(app.chat_input.lines(), ["hi", "!"]);
    }

    #[test]
    fn escape_leaves_composer_and_keeps_draft() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        app.transition_to(InputMode::Editing);
        handle_composer(&mut app, key(KeyCode::Char('x'), KeyModifiers::NONE));
        handle_composer(&mut app, key(KeyCode::Esc, KeyModifiers::NONE));
        assert_eq!(app.input_mode, InputMode::Navigate);
        assert_eq!(app.chat_input.lines(), ["x"]);
    }

    #[test]
    fn empty_submit_sends_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        app.transition_to(InputMode::Editing);
        handle_composer(&mut app, key(KeyCode::Enter, KeyModifiers::NONE));
        assert!(app.chat_receiver.is_none());
        assert!(app.workspace.sessions[0].messages.is_empty());
    }
}

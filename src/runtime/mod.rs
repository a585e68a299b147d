use crate::{
    actions,
    app::App,
    remote::{AuthEvent, SignInOutcome},
    sync::SyncNotice,
};
use chrono::Local;
use std::sync::mpsc::TryRecvError;
use std::time::Instant;

/// One pass of background bookkeeping, run before every frame.
pub fn tick(app: &mut App) {
    handle_session_restore(app);
    handle_sign_in(app);
    handle_sign_out(app);
    handle_auth_events(app);
    handle_sync_notices(app);
    handle_chat(app);
    handle_briefing(app);
    handle_report(app);
    handle_enhance(app);

    actions::persist_changes(app);

    if let Some(sync) = app.sync.as_mut() {
        sync.poll_due(Instant::now(), &app.workspace);
    }

    if let Some(expiry) = app.toast_expiry
        && Local::now() >= expiry
    {
        app.toast_expiry = None;
        app.toast_message = None;
    }
}

fn handle_session_restore(app: &mut App) {
    let result = {
        let Some(receiver) = app.restore_receiver.as_ref() else {
            return;
        };
        receiver.try_recv()
    };

    match result {
        Ok(Ok(Some(session))) => {
            app.restore_receiver = None;
            tracing::info!(user = %session.user.id, "session restored");
        }
        Ok(Ok(None)) => {
            app.restore_receiver = None;
        }
        Ok(Err(err)) => {
            app.restore_receiver = None;
            tracing::warn!(error = %err, "session restore failed");
        }
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => {
            app.restore_receiver = None;
        }
    }
}

fn handle_sign_in(app: &mut App) {
    let result = {
        let Some(receiver) = app.sign_in_receiver.as_ref() else {
            return;
        };
        receiver.try_recv()
    };

    match result {
        Ok(Ok(SignInOutcome::SignedIn(session))) => {
            app.sign_in_receiver = None;
            let who = session.user.email.unwrap_or(session.user.id);
            app.toast(format!("Signed in as {who}"));
        }
        Ok(Ok(SignInOutcome::ConfirmationRequired)) => {
            app.sign_in_receiver = None;
            app.toast_info("Check your inbox to confirm the account, then sign in again.");
        }
        Ok(Err(err)) => {
            app.sign_in_receiver = None;
            tracing::warn!(error = %err, "sign-in failed");
            app.toast_error(format!("Sign-in failed: {err}"));
        }
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => {
            app.sign_in_receiver = None;
            app.toast_error("Sign-in stopped unexpectedly.");
        }
    }
}

fn handle_sign_out(app: &mut App) {
    let result = {
        let Some(receiver) = app.sign_out_receiver.as_ref() else {
            return;
        };
        receiver.try_recv()
    };

    match result {
        Ok(Ok(())) => {
            app.sign_out_receiver = None;
            app.toast_info("Signed out");
        }
        Ok(Err(err)) => {
            app.sign_out_receiver = None;
            app.toast_error(format!("Sign-out failed: {err}"));
        }
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => {
            app.sign_out_receiver = None;
        }
    }
}

/// Forwards every pending auth event to the sync coordinator.
fn handle_auth_events(app: &mut App) {
    let Some(receiver) = app.auth_events.as_ref() else {
        return;
    };
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                app.auth_events = None;
                break;
            }
        }
    }

    let Some(sync) = app.sync.as_mut() else {
        return;
    };
    for event in events {
        let signed_out = matches!(event, AuthEvent::SignedOut);
        if sync.on_auth_event(event) {
            tracing::debug!("initial pull scheduled");
        }
        if signed_out {
            tracing::info!("cloud sync paused until the next sign-in");
        }
    }
}

fn handle_sync_notices(app: &mut App) {
    let notices = match app.sync.as_mut() {
        Some(sync) => sync.drain(&mut app.workspace),
        None => return,
    };
    for notice in notices {
        match notice {
            SyncNotice::Pulled { tables } => {
                app.clamp_selections();
                if tables > 0 {
                    app.toast("Workspace loaded from the cloud");
                }
            }
            SyncNotice::Pushed { .. } => {}
            SyncNotice::Failed(message) => app.toast_error(message),
        }
    }
}

fn handle_chat(app: &mut App) {
    let result = {
        let Some(receiver) = app.chat_receiver.as_ref() else {
            return;
        };
        receiver.try_recv()
    };

    match result {
        Ok(outcome) => {
            app.chat_receiver = None;
            match outcome.result {
                Ok(reply) => actions::finish_chat(app, &outcome.session_id, reply),
                Err(err) => {
                    tracing::warn!(error = %err, "assistant request failed");
                    app.toast_error(format!("Assistant error: {err}"));
                }
            }
        }
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => {
            app.chat_receiver = None;
            app.toast_error("Assistant stopped unexpectedly.");
        }
    }
}

fn handle_briefing(app: &mut App) {
    let result = {
        let Some(receiver) = app.briefing_receiver.as_ref() else {
            return;
        };
        receiver.try_recv()
    };

    match result {
        Ok(outcome) => {
            app.briefing_receiver = None;
            match outcome.result {
                Ok(content) => {
                    app.workspace.set_briefing(&outcome.sector, content);
                    app.toast("Market briefing updated");
                }
                Err(err) => {
                    tracing::warn!(error = %err, sector = %outcome.sector, "briefing failed");
                    app.toast_error(format!("Briefing failed: {err}"));
                }
            }
        }
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => {
            app.briefing_receiver = None;
        }
    }
}

fn handle_report(app: &mut App) {
    let result = {
        let Some(receiver) = app.report_receiver.as_ref() else {
            return;
        };
        receiver.try_recv()
    };

    match result {
        Ok(outcome) => {
            app.report_receiver = None;
            match outcome.result {
                Ok(report) => {
                    app.workspace.set_detailed_report(Some(report));
                    app.report_scroll = 0;
                    app.show_report_popup = true;
                    app.toast("Detailed report ready");
                }
                Err(err) => {
                    tracing::warn!(error = %err, sector = %outcome.sector, "report failed");
                    app.toast_error(format!("Report failed: {err}"));
                }
            }
        }
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => {
            app.report_receiver = None;
        }
    }
}

fn handle_enhance(app: &mut App) {
    let result = {
        let Some(receiver) = app.enhance_receiver.as_ref() else {
            return;
        };
        receiver.try_recv()
    };

    match result {
        Ok(outcome) => {
            app.enhance_receiver = None;
            match outcome.result {
                Ok(image) => {
                    let generated = image.is_some();
                    app.enhancer.finish_enhance(outcome.prompt, image);
                    if generated {
                        app.toast("Photo enhanced");
                    } else {
                        app.toast_info("No image generated; showing the original photo.");
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "enhancement failed");
                    app.toast_error(format!("Enhancement failed: {err}"));
                }
            }
        }
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => {
            app.enhance_receiver = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_app;
    use crate::config::Config;
    use crate::integrations::gemini::{ChatOutcome, ChatReply, GeminiError, TextOutcome};
    use crate::models::{Priority, ToastKind};
    use crate::remote::memory::MemoryStore;
    use crate::remote::{AuthBackend, RemoteError, RemoteStore, Session, User};
    use crate::storage::{LocalStorage, TASKS_KEY};
    use std::sync::Arc;
    use std::sync::mpsc::{self, Receiver};
    use std::time::Duration;

    struct StaticAuth {
        listeners: crate::remote::AuthListeners,
    }

    impl AuthBackend for StaticAuth {
        fn get_session(&self) -> Result<Option<Session>, RemoteError> {
            Ok(None)
        }
        fn sign_in(&self, _email: &str, _password: &str) -> Result<Session, RemoteError> {
            Err(RemoteError::NotAuthenticated)
        }
        fn sign_up(&self, _email: &str, _password: &str) -> Result<Option<Session>, RemoteError> {
            Ok(None)
        }
        fn sign_out(&self) -> Result<(), RemoteError> {
            self.listeners.notify(&AuthEvent::SignedOut);
            Ok(())
        }
        fn subscribe(&self) -> Receiver<AuthEvent> {
            self.listeners.subscribe()
        }
    }

    fn session(id: &str) -> Session {
        Session {
            access_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: i64::MAX,
            user: User {
                id: id.to_string(),
                email: Some(format!("{id}@example.com")),
            },
        }
    }

    #[test]
    fn chat_outcome_lands_in_the_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        let session_id = app.workspace.sessions[0].id.clone();
        let (tx, rx) = mpsc::channel();
        tx.send(ChatOutcome {
            session_id: session_id.clone(),
            result: Ok(ChatReply {
                text: "Here is the plan".to_string(),
                ..ChatReply::default()
            }),
        })
        .expect("send");
        app.chat_receiver = Some(rx);

        tick(&mut app);

        assert!(app.chat_receiver.is_none());
        assert_eq!(
            app.workspace.sessions[0].messages.last().map(|m| m.content.as_str()),
            Some("Here is the plan")
        );
        assert!(!app.workspace.changes().any());
    }

    #[test]
    fn failed_briefing_shows_error_toast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        let (tx, rx) = mpsc::channel();
        tx.send(TextOutcome {
            sector: "Retail".to_string(),
            result: Err(GeminiError::Empty),
        })
        .expect("send");
        app.briefing_receiver = Some(rx);

        tick(&mut app);

        assert!(app.briefing_receiver.is_none());
        assert!(matches!(app.toast_message, Some((_, ToastKind::Error))));
    }

    #[test]
    fn disconnected_chat_worker_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        let (tx, rx) = mpsc::channel::<ChatOutcome>();
        drop(tx);
        app.chat_receiver = Some(rx);
        tick(&mut app);
        assert!(app.chat_receiver.is_none());
        assert!(matches!(app.toast_message, Some((_, ToastKind::Error))));
    }

    #[test]
    fn toast_expires() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        app.toast("hello");
        app.toast_expiry = Some(Local::now() - chrono::Duration::seconds(1));
        tick(&mut app);
        assert!(app.toast_message.is_none());
    }

    #[test]
    fn edits_are_persisted_and_pushed_after_sign_in() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.data.data_dir = dir.path().to_path_buf();
        config.supabase.debounce_ms = 0;
        let storage = LocalStorage::open(dir.path()).expect("storage");
        let store = Arc::new(MemoryStore::default());
        let auth = Arc::new(StaticAuth {
            listeners: crate::remote::AuthListeners::default(),
        });
        let mut app = App::with_backends(
            config,
            storage,
            Some((
                auth.clone() as Arc<dyn AuthBackend>,
                store.clone() as Arc<dyn RemoteStore>,
            )),
        );

        auth.listeners.notify(&AuthEvent::SignedIn(session("u1")));
        tick(&mut app);
        assert_eq!(app.signed_in_email().as_deref(), Some("u1@example.com"));

        // Wait for the initial pull to land.
        for _ in 0..200 {
            tick(&mut app);
            if app.sync.as_ref().is_some_and(|s| s.pull_done()) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(app.sync.as_ref().is_some_and(|s| s.pull_done()));

        app.workspace
            .add_task("Synced task", None, Priority::High)
            .expect("add");
        for _ in 0..200 {
            tick(&mut app);
            if store
                .rows(crate::remote::Table::Tasks)
                .iter()
                .any(|row| row.get("title").and_then(|v| v.as_str()) == Some("Synced task"))
            {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(
            app.storage
                .get_item(TASKS_KEY)
                .is_some_and(|raw| raw.contains("Synced task"))
        );
        assert!(
            store
                .rows(crate::remote::Table::Tasks)
                .iter()
                .any(|row| row.get("user_id").and_then(|v| v.as_str()) == Some("u1"))
        );
    }
}

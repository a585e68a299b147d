use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, KeyboardEnhancementFlags,
        PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::{Backend, CrosstermBackend},
};
use std::{error::Error, fs, io, path::Path, time::Duration};
use tracing_subscriber::EnvFilter;

mod actions;
mod app;
mod backup;
mod config;
mod date_input;
mod enhancer;
mod input;
mod integrations;
mod models;
mod remote;
mod runtime;
mod storage;
mod sync;
mod ui;
mod workspace;

use app::App;
use config::Config;

const SHUTDOWN_SYNC_WAIT: Duration = Duration::from_secs(10);

fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::load();
    init_logging(&config.data.log_file);
    tracing::info!(data_dir = %config.data.data_dir.display(), "starting bizmate");

    let mut app = App::new(config)?;

    // Initialize terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;

    // Keyboard enhancement flags may fail on unsupported terminals.
    // Without them shift+enter arrives as plain enter.
    let _ = execute!(
        stdout,
        PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES)
    );

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app);

    // A push killed between its delete and insert would leave the remote
    // tables empty.
    actions::wait_for_sync(&mut app, SHUTDOWN_SYNC_WAIT);
    // Flush whatever the last frame changed before leaving.
    actions::persist_changes(&mut app);

    // Restore terminal
    disable_raw_mode()?;
    let _ = execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags);
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture,
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        tracing::error!(error = %err, "terminal loop failed");
        println!("{:?}", err);
    }
    tracing::info!("bye");

    Ok(())
}

/// Logs go to a file; the terminal belongs to the UI.
fn init_logging(log_file: &Path) {
    if let Some(parent) = log_file.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let file = match fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
    {
        Ok(file) => file,
        Err(err) => {
            eprintln!("logging disabled ({}): {err}", log_file.display());
            return;
        }
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "bizmate=info".into()),
        )
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .try_init();
}

fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    loop {
        runtime::tick(app);

        terminal.draw(|f| ui::ui(f, app))?;

        if event::poll(Duration::from_millis(250))? {
            input::handle_event(app, event::read()?);
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

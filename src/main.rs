use anyhow::{Context, Result};
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

mod actions;
mod app;
mod clipboard;
mod config;
mod error;
mod manifest;
mod orchestrator;
mod output;
mod selection;
mod status;
mod tmux;
mod worktree;

use actions::Action;
use app::App;
use config::Config;
use manifest::{LockOptions, ManifestWatcher};
use orchestrator::{ManifestHandle, OrchestratorOptions, SessionOrchestrator, Task, TaskRunner};
use status::{SessionLogReader, TextClassifier};
use tmux::TmuxClient;

/// Frequency of the timer that drives polling
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// The terminal belongs to ratatui, so logs go to a file
fn init_logging() -> Result<PathBuf> {
    let dir = dirs::state_dir()
        .or_else(dirs::cache_dir)
        .context("no state directory")?
        .join("agent-deck");
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join("agent-deck.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(path)
}

fn init_terminal() -> Result<ratatui::DefaultTerminal> {
    let terminal = ratatui::init();
    crossterm::execute!(std::io::stdout(), EnableMouseCapture)?;
    Ok(terminal)
}

fn restore_terminal() {
    let _ = crossterm::execute!(std::io::stdout(), DisableMouseCapture);
    ratatui::restore();
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_path = init_logging().ok();
    let config = Config::load();
    let manifest_path = config.manifest_path();
    info!(
        project = %config.project_dir().display(),
        log = ?log_path,
        "starting agent-deck"
    );

    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();

    // Initialize terminal
    let mut terminal = init_terminal()?;

    // Input is read on a blocking thread; paused while tmux owns the terminal
    let input_paused = Arc::new(AtomicBool::new(false));
    let input_tx = tx.clone();
    let paused = input_paused.clone();
    tokio::task::spawn_blocking(move || loop {
        if input_tx.is_closed() {
            break;
        }
        if paused.load(Ordering::Relaxed) {
            std::thread::sleep(TICK_INTERVAL);
            continue;
        }
        if !event::poll(TICK_INTERVAL).unwrap_or(false) {
            continue;
        }
        let action = match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => Action::KeyPress(key),
            Ok(Event::Mouse(mouse)) => Action::Mouse(mouse),
            _ => continue,
        };
        if input_tx.send(action).is_err() {
            break;
        }
    });

    // Poll timer
    let tick_tx = tx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            if tick_tx.send(Action::Tick).is_err() {
                break;
            }
        }
    });

    // Changes made by other instances
    let watch_tx = tx.clone();
    let _watcher = match ManifestWatcher::spawn(&manifest_path, config.watch_debounce(), move || {
        let _ = watch_tx.send(Action::ManifestChanged);
    }) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(error = %e, "manifest watcher unavailable");
            None
        }
    };

    let tmux_client = Arc::new(TmuxClient::new());
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let logs = Arc::new(SessionLogReader::new(
        home,
        config.log_tail_bytes,
        config.log_lookup_ttl(),
        config.cache_capacity,
    ));
    let runner = TaskRunner::new(
        tmux_client.clone(),
        logs,
        ManifestHandle {
            path: manifest_path,
            options: LockOptions {
                timeout: config.lock_timeout(),
                retry: config.lock_retry(),
            },
        },
        config.project_dir(),
        config.capture_lines,
        tx.clone(),
    );

    // Create app state
    let mut orchestrator = SessionOrchestrator::new(
        OrchestratorOptions::from_config(&config),
        TextClassifier::new(&config.markers),
    );
    orchestrator.start();
    let mut app = App::new(orchestrator);

    // Main event loop
    let result = loop {
        // Render
        terminal.draw(|f| app.render(f))?;

        // Dispatch work requested while handling the last message
        for task in app.take_pending_tasks() {
            match task {
                Task::Attach(session) => {
                    // Suspend TUI and attach to session
                    input_paused.store(true, Ordering::Relaxed);
                    restore_terminal();

                    let cmd = tmux_client.attach_command(&session);
                    let status = std::process::Command::new(&cmd[0])
                        .args(&cmd[1..])
                        .stdin(Stdio::inherit())
                        .stdout(Stdio::inherit())
                        .stderr(Stdio::inherit())
                        .status();

                    // Resume TUI
                    terminal = init_terminal()?;
                    input_paused.store(false, Ordering::Relaxed);

                    if let Err(e) = status {
                        app.orchestrator
                            .set_notice(format!("Failed to attach: {}", e));
                    }
                }
                other => runner.run(other),
            }
        }

        // Handle events from channel
        match rx.recv().await {
            Some(action) => match app.handle_action(action) {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(e) => break Err(e),
            },
            None => break Ok(()),
        }
    };

    // Stop applying in-flight results, then restore terminal
    app.orchestrator.shutdown();
    restore_terminal();
    info!("exiting");
    result
}

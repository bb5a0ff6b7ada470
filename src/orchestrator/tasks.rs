use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::actions::{Action, CaptureResult, LogResult};
use crate::clipboard;
use crate::manifest::{LockOptions, ShellDefinition, ShellManifest};
use crate::status::{AgentKind, SessionLogReader};
use crate::tmux::{keys, Multiplexer, PaneInput, PaneSnapshot};
use crate::worktree;

/// A pane to capture, tagged with the session generation at request time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTarget {
    pub key: String,
    pub pane: String,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    pub key: String,
    pub generation: u64,
    pub kind: AgentKind,
    pub cwd: PathBuf,
}

/// Blocking or long-running work requested by the orchestrator.
///
/// Each one completes by sending an `Action` back to the main loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    CapturePanes { cycle: u64, targets: Vec<CaptureTarget> },
    CapturePane { cycle: u64, target: CaptureTarget },
    ClassifyLogs { cycle: u64, targets: Vec<LogTarget> },
    SendInput { pane: String, inputs: Vec<PaneInput> },
    Paste { pane: String },
    ResizePane { pane: String, width: u16, height: u16 },
    ReloadManifest,
    SpawnShell {
        def: ShellDefinition,
        cwd: PathBuf,
        command: Option<String>,
    },
    RenameShell(ShellDefinition),
    KillShell { tmux_name: String },
    StartAgent {
        key: String,
        pane: String,
        cwd: PathBuf,
        kind: AgentKind,
        command: Option<String>,
    },
    StopAgent { key: String, pane: String },
    DiscoverWorktrees,
    /// Hand the terminal to `tmux attach`; run by the main loop itself
    Attach(String),
}

/// Where and how the shared manifest is accessed
#[derive(Debug, Clone)]
pub struct ManifestHandle {
    pub path: PathBuf,
    pub options: LockOptions,
}

impl ManifestHandle {
    fn load(&self) -> ShellManifest {
        ShellManifest::load(&self.path, self.options)
    }
}

/// Spawns tasks on the tokio runtime and reports back through `tx`
pub struct TaskRunner<M: Multiplexer> {
    mux: Arc<M>,
    logs: Arc<SessionLogReader>,
    manifest: ManifestHandle,
    project_dir: PathBuf,
    capture_lines: usize,
    tx: UnboundedSender<Action>,
    /// Pane input goes through one worker so keystrokes keep their order
    input_tx: UnboundedSender<(String, PaneInput)>,
}

impl<M: Multiplexer> TaskRunner<M> {
    /// Must be called from within a tokio runtime
    pub fn new(
        mux: Arc<M>,
        logs: Arc<SessionLogReader>,
        manifest: ManifestHandle,
        project_dir: PathBuf,
        capture_lines: usize,
        tx: UnboundedSender<Action>,
    ) -> Self {
        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<(String, PaneInput)>();
        let input_mux = mux.clone();
        tokio::spawn(async move {
            while let Some((pane, input)) = input_rx.recv().await {
                if let Err(e) = input_mux.send_input(&pane, &input).await {
                    debug!(pane = %pane, error = %e, "dropping pane input");
                }
            }
        });

        Self {
            mux,
            logs,
            manifest,
            project_dir,
            capture_lines,
            tx,
            input_tx,
        }
    }

    pub fn run(&self, task: Task) {
        match task {
            Task::CapturePanes { cycle, targets } => {
                let mux = self.mux.clone();
                let tx = self.tx.clone();
                let lines = self.capture_lines;
                tokio::spawn(async move {
                    let results = capture_all(mux, targets, lines).await;
                    let _ = tx.send(Action::CapturesReady { cycle, results });
                });
            }
            Task::CapturePane { cycle, target } => {
                let mux = self.mux.clone();
                let tx = self.tx.clone();
                let lines = self.capture_lines;
                tokio::spawn(async move {
                    let result = capture_one(&*mux, target, lines).await;
                    let _ = tx.send(Action::PaneCaptured { cycle, result });
                });
            }
            Task::ClassifyLogs { cycle, targets } => {
                let logs = self.logs.clone();
                let tx = self.tx.clone();
                tokio::task::spawn_blocking(move || {
                    let results = targets
                        .into_iter()
                        .map(|t| LogResult {
                            status: logs.classify(t.kind, &t.cwd),
                            key: t.key,
                            generation: t.generation,
                        })
                        .collect();
                    let _ = tx.send(Action::LogStatuses { cycle, results });
                });
            }
            Task::SendInput { pane, inputs } => {
                for input in inputs {
                    let _ = self.input_tx.send((pane.clone(), input));
                }
            }
            Task::Paste { pane } => {
                let input_tx = self.input_tx.clone();
                let tx = self.tx.clone();
                tokio::task::spawn_blocking(move || match clipboard::get_text() {
                    Ok(text) if !text.is_empty() => {
                        let _ = input_tx.send((pane, PaneInput::Literal(keys::encode_paste(&text))));
                    }
                    Ok(_) => {
                        let _ = tx.send(Action::Notice("Clipboard is empty".to_string()));
                    }
                    Err(e) => {
                        let _ = tx.send(Action::Error(e.to_string()));
                    }
                });
            }
            Task::ResizePane { pane, width, height } => {
                let mux = self.mux.clone();
                tokio::spawn(async move {
                    if let Err(e) = mux.resize_pane(&pane, width, height).await {
                        debug!(pane = %pane, error = %e, "resize failed");
                    }
                });
            }
            Task::ReloadManifest => {
                let mux = self.mux.clone();
                let manifest = self.manifest.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let live_sessions = mux.list_session_names().await.unwrap_or_else(|e| {
                        debug!(error = %e, "listing tmux sessions failed");
                        Vec::new()
                    });
                    let loaded =
                        tokio::task::spawn_blocking(move || manifest.load().shells().to_vec()).await;
                    let _ = tx.send(match loaded {
                        Ok(shells) => Action::ManifestLoaded {
                            shells,
                            live_sessions,
                        },
                        Err(e) => Action::Error(format!("Manifest reload failed: {e}")),
                    });
                });
            }
            Task::SpawnShell { def, cwd, command } => {
                let mux = self.mux.clone();
                let manifest = self.manifest.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = mux.new_session(&def.tmux_name, &cwd, command.as_deref()).await {
                        let _ = tx.send(Action::Error(format!("Failed to create: {e:#}")));
                        return;
                    }
                    let recorded = tokio::task::spawn_blocking(move || {
                        manifest.load().add_shell(def.clone()).map(|_| def)
                    })
                    .await;
                    let _ = tx.send(match recorded {
                        Ok(Ok(def)) => Action::ShellSpawned(def),
                        Ok(Err(e)) => Action::Error(format!("Shell started but not recorded: {e}")),
                        Err(e) => Action::Error(format!("Shell started but not recorded: {e}")),
                    });
                });
            }
            Task::RenameShell(def) => {
                let manifest = self.manifest.clone();
                let tx = self.tx.clone();
                tokio::task::spawn_blocking(move || {
                    let _ = tx.send(match manifest.load().update_shell(def.clone()) {
                        Ok(()) => Action::ShellUpdated(def),
                        Err(e) => Action::Error(format!("Rename failed: {e}")),
                    });
                });
            }
            Task::KillShell { tmux_name } => {
                let mux = self.mux.clone();
                let manifest = self.manifest.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = mux.kill_session(&tmux_name).await {
                        debug!(session = %tmux_name, error = %e, "kill-session failed");
                    }
                    let removed = tokio::task::spawn_blocking(move || {
                        manifest.load().remove_shell(&tmux_name).map(|_| tmux_name)
                    })
                    .await;
                    let _ = tx.send(match removed {
                        Ok(Ok(name)) => Action::ShellRemoved(name),
                        Ok(Err(e)) => Action::Error(format!("Failed to delete: {e}")),
                        Err(e) => Action::Error(format!("Failed to delete: {e}")),
                    });
                });
            }
            Task::StartAgent {
                key,
                pane,
                cwd,
                kind,
                command,
            } => {
                let mux = self.mux.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let exists = mux.has_session(&pane).await;
                    let started = if exists {
                        Ok(())
                    } else {
                        mux.new_session(&pane, &cwd, command.as_deref()).await
                    };
                    let _ = tx.send(match started {
                        Ok(()) => Action::AgentStarted { key, pane, kind },
                        Err(e) => Action::Error(format!("Failed to start agent: {e:#}")),
                    });
                });
            }
            Task::StopAgent { key, pane } => {
                let mux = self.mux.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = mux.kill_session(&pane).await {
                        debug!(session = %pane, error = %e, "kill-session failed");
                    }
                    let _ = tx.send(Action::AgentStopped(key));
                });
            }
            Task::DiscoverWorktrees => {
                let mux = self.mux.clone();
                let tx = self.tx.clone();
                let project_dir = self.project_dir.clone();
                tokio::spawn(async move {
                    let worktrees = worktree::list_worktrees(&project_dir)
                        .await
                        .unwrap_or_else(|e| {
                            debug!(error = %e, "no git worktrees");
                            Vec::new()
                        });
                    let live_sessions = mux.list_session_names().await.unwrap_or_else(|e| {
                        warn!(error = %e, "listing tmux sessions failed");
                        Vec::new()
                    });
                    let _ = tx.send(Action::WorktreesDiscovered {
                        worktrees,
                        live_sessions,
                    });
                });
            }
            Task::Attach(session) => {
                debug!(session = %session, "attach is handled by the main loop");
            }
        }
    }
}

async fn capture_one<M: Multiplexer>(mux: &M, target: CaptureTarget, lines: usize) -> CaptureResult {
    let outcome = match mux.capture_pane(&target.pane, lines).await {
        Ok(text) => {
            let flags = mux.pane_flags(&target.pane).await.unwrap_or_default();
            Ok(PaneSnapshot { text, flags })
        }
        Err(e) => Err(format!("{e:#}")),
    };
    CaptureResult {
        key: target.key,
        generation: target.generation,
        outcome,
    }
}

async fn capture_all<M: Multiplexer>(
    mux: Arc<M>,
    targets: Vec<CaptureTarget>,
    lines: usize,
) -> Vec<CaptureResult> {
    let mut set = JoinSet::new();
    for target in targets {
        let mux = mux.clone();
        set.spawn(async move { capture_one(&*mux, target, lines).await });
    }

    let mut results = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => warn!(error = %e, "capture task failed"),
        }
    }
    results
}

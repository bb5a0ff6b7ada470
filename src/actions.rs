use crossterm::event::{KeyEvent, MouseEvent};

use crate::manifest::ShellDefinition;
use crate::status::{AgentKind, Status};
use crate::tmux::PaneSnapshot;
use crate::worktree::WorktreeInfo;

/// Outcome of capturing one pane
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub key: String,
    /// Session generation the capture was requested under
    pub generation: u64,
    pub outcome: Result<PaneSnapshot, String>,
}

/// Outcome of reading one agent's session log
#[derive(Debug, Clone)]
pub struct LogResult {
    pub key: String,
    pub generation: u64,
    pub status: Option<Status>,
}

/// Messages consumed by the main loop, one at a time
#[derive(Debug, Clone)]
pub enum Action {
    /// A key was pressed
    KeyPress(KeyEvent),
    /// Mouse input inside the terminal
    Mouse(MouseEvent),
    /// Poll timer fired
    Tick,
    /// Captures for a whole poll cycle
    CapturesReady {
        cycle: u64,
        results: Vec<CaptureResult>,
    },
    /// Out-of-cycle refresh of the interactive pane; its cycle number is
    /// drawn from the same counter as poll batches
    PaneCaptured { cycle: u64, result: CaptureResult },
    /// Session-log classifications for a poll cycle
    LogStatuses { cycle: u64, results: Vec<LogResult> },
    /// Another instance touched the manifest
    ManifestChanged,
    /// Manifest contents plus the tmux sessions alive when it was read
    ManifestLoaded {
        shells: Vec<ShellDefinition>,
        live_sessions: Vec<String>,
    },
    ShellSpawned(ShellDefinition),
    ShellUpdated(ShellDefinition),
    ShellRemoved(String),
    AgentStarted {
        key: String,
        pane: String,
        kind: AgentKind,
    },
    AgentStopped(String),
    WorktreesDiscovered {
        worktrees: Vec<WorktreeInfo>,
        live_sessions: Vec<String>,
    },
    /// Informational message for the status bar
    Notice(String),
    /// An error occurred
    Error(String),
    /// Request to quit the application
    Quit,
}

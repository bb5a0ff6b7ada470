//! Composition root: owns the session set, drives polling and routes
//! interactive input.
//!
//! Everything here runs on the main loop. Slow work is requested as a
//! [`Task`] and its result comes back as an [`Action`]; results carry the
//! poll cycle and per-session generation they were issued under so late
//! arrivals can be dropped.

mod session;
mod tasks;

pub use session::{Agent, Session, SessionKind};
pub use tasks::{CaptureTarget, LogTarget, ManifestHandle, Task, TaskRunner};

use crossterm::event::{KeyEvent, MouseButton, MouseEvent, MouseEventKind};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::actions::{Action, CaptureResult, LogResult};
use crate::clipboard;
use crate::config::Config;
use crate::error::CopyError;
use crate::manifest::ShellDefinition;
use crate::output::PaneCache;
use crate::selection::{Selection, Viewport};
use crate::status::{AgentKind, Status, TextClassifier};
use crate::tmux::{keys, sanitize_session_name, InteractiveInput, PaneInput, PaneSnapshot};
use crate::worktree::WorktreeInfo;

/// Lines moved per wheel notch
const SCROLL_STEP: isize = 3;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub poll_interval: Duration,
    pub capture_ttl: Duration,
    pub buffer_capacity: usize,
    pub project_dir: PathBuf,
    pub default_agent: AgentKind,
    /// Entry ceiling for the pane-capture cache
    pub cache_capacity: usize,
}

impl OrchestratorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            capture_ttl: config.capture_ttl(),
            buffer_capacity: config.buffer_capacity,
            project_dir: config.project_dir(),
            default_agent: config.default_agent,
            cache_capacity: config.cache_capacity,
        }
    }
}

/// Shells that appeared on disk or disappeared from it during a reload
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub discovered: Vec<String>,
    pub retired: Vec<String>,
}

pub struct SessionOrchestrator {
    sessions: Vec<Session>,
    selected: usize,
    interactive: bool,
    selection: Selection,
    viewport: Option<Viewport>,
    pane_cache: PaneCache,
    classifier: TextClassifier,
    /// Last capture cycle issued; polls and single-pane refreshes share it
    cycle: u64,
    /// Poll cycle of the newest session-log results applied
    log_cycle: u64,
    last_poll: Option<Instant>,
    /// Sessions with an out-of-cycle capture in flight
    refreshing: HashSet<String>,
    generations: HashMap<String, u64>,
    pending: Vec<Task>,
    notice: Option<String>,
    closed: bool,
    prefix: String,
    options: OrchestratorOptions,
}

impl SessionOrchestrator {
    pub fn new(options: OrchestratorOptions, classifier: TextClassifier) -> Self {
        let project = options
            .project_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "agent-deck".to_string());
        Self {
            sessions: Vec::new(),
            selected: 0,
            interactive: false,
            selection: Selection::default(),
            viewport: None,
            pane_cache: PaneCache::new(options.cache_capacity, options.capture_ttl),
            classifier,
            cycle: 0,
            log_cycle: 0,
            last_poll: None,
            refreshing: HashSet::new(),
            generations: HashMap::new(),
            pending: Vec::new(),
            notice: None,
            closed: false,
            prefix: sanitize_session_name(&project),
            options,
        }
    }

    /// Queue the startup work: worktree discovery and the first manifest read
    pub fn start(&mut self) {
        self.pending.push(Task::DiscoverWorktrees);
        self.pending.push(Task::ReloadManifest);
    }

    pub fn take_pending_tasks(&mut self) -> Vec<Task> {
        std::mem::take(&mut self.pending)
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn selected_session(&self) -> Option<&Session> {
        self.sessions.get(self.selected)
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(notice.into());
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn generation(&self, key: &str) -> u64 {
        self.generations.get(key).copied().unwrap_or(0)
    }

    /// Invalidate everything in flight for a session
    fn bump_generation(&mut self, key: &str) {
        *self.generations.entry(key.to_string()).or_insert(0) += 1;
        self.refreshing.remove(key);
    }

    fn index_of(&self, key: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.key == key)
    }

    /// Apply one completed piece of work
    pub fn handle(&mut self, action: Action) {
        if self.closed {
            return;
        }
        match action {
            Action::Tick => self.tick(Instant::now()),
            Action::CapturesReady { cycle, results } => self.apply_captures(cycle, results),
            Action::PaneCaptured { cycle, result } => self.apply_single_capture(cycle, result),
            Action::LogStatuses { cycle, results } => self.apply_log_statuses(cycle, results),
            Action::ManifestChanged => self.pending.push(Task::ReloadManifest),
            Action::ManifestLoaded {
                shells,
                live_sessions,
            } => {
                let changes = self.reconcile_shells(shells, &live_sessions);
                if !changes.discovered.is_empty() || !changes.retired.is_empty() {
                    info!(
                        discovered = changes.discovered.len(),
                        retired = changes.retired.len(),
                        "manifest reconciled"
                    );
                }
            }
            Action::ShellSpawned(def) => {
                let key = def.tmux_name.clone();
                self.upsert_shell(&def, true);
                self.sort_sessions();
                if let Some(idx) = self.index_of(&key) {
                    self.select(idx);
                }
                self.notice = Some(format!("Started {}", def.display_name));
            }
            Action::ShellUpdated(def) => {
                self.upsert_shell(&def, false);
            }
            Action::ShellRemoved(name) => {
                self.retire(&name);
                self.notice = Some(format!("Removed {name}"));
            }
            Action::AgentStarted { key, pane, kind } => {
                if let Some(idx) = self.index_of(&key) {
                    let capacity = self.options.buffer_capacity;
                    let session = &mut self.sessions[idx];
                    session.agent = Some(Agent::new(kind, pane, capacity));
                    session.agent_kind = kind;
                    session.paused = false;
                    self.notice = Some(format!("Started {} in {}", kind.profile().display_name, key));
                }
            }
            Action::AgentStopped(key) => {
                if let Some(idx) = self.index_of(&key) {
                    self.pane_gone(idx);
                }
            }
            Action::WorktreesDiscovered {
                worktrees,
                live_sessions,
            } => self.apply_worktrees(worktrees, &live_sessions),
            Action::Notice(msg) => self.notice = Some(msg),
            Action::Error(msg) => {
                warn!(error = %msg, "task failed");
                self.notice = Some(msg);
            }
            Action::KeyPress(_) | Action::Mouse(_) | Action::Quit => {}
        }
    }

    /// Start a poll cycle when one is due; otherwise keep the interactive
    /// pane fresh between cycles.
    pub fn tick(&mut self, now: Instant) {
        let due = self
            .last_poll
            .is_none_or(|last| now.saturating_duration_since(last) >= self.options.poll_interval);
        if due {
            self.poll(now);
            return;
        }

        if !self.interactive {
            return;
        }
        let Some(session) = self.sessions.get(self.selected) else {
            return;
        };
        let Some(agent) = session.agent.as_ref() else {
            return;
        };
        if self.pane_cache.get_at(&session.key, now).is_some() || self.refreshing.contains(&session.key) {
            return;
        }
        let target = CaptureTarget {
            key: session.key.clone(),
            pane: agent.pane.clone(),
            generation: self.generation(&session.key),
        };
        self.refreshing.insert(target.key.clone());
        self.cycle += 1;
        self.pending.push(Task::CapturePane {
            cycle: self.cycle,
            target,
        });
    }

    fn poll(&mut self, now: Instant) {
        self.last_poll = Some(now);
        self.cycle += 1;

        let targets: Vec<CaptureTarget> = self
            .sessions
            .iter()
            .filter(|s| s.pollable())
            .filter_map(|s| {
                let agent = s.agent.as_ref()?;
                Some(CaptureTarget {
                    key: s.key.clone(),
                    pane: agent.pane.clone(),
                    generation: self.generation(&s.key),
                })
            })
            .collect();

        if targets.is_empty() {
            self.pane_cache.set_all(self.cycle, HashMap::new());
            return;
        }
        debug!(cycle = self.cycle, panes = targets.len(), "poll");
        self.pending.push(Task::CapturePanes {
            cycle: self.cycle,
            targets,
        });
    }

    fn apply_captures(&mut self, cycle: u64, results: Vec<CaptureResult>) {
        // Panes refreshed by a later single capture keep that capture
        let current: Vec<CaptureResult> = results
            .into_iter()
            .filter(|r| r.generation == self.generation(&r.key))
            .filter(|r| !self.pane_cache.newer_than(&r.key, cycle))
            .collect();

        let batch: HashMap<String, String> = current
            .iter()
            .filter_map(|r| Some((r.key.clone(), r.outcome.as_ref().ok()?.text.clone())))
            .collect();
        if !self.pane_cache.set_all(cycle, batch) {
            debug!(cycle, latest = self.pane_cache.cycle(), "discarding stale capture batch");
            return;
        }

        for result in current {
            self.apply_outcome(result);
        }

        let targets: Vec<LogTarget> = self
            .sessions
            .iter()
            .filter(|s| s.pollable())
            .filter_map(|s| {
                let agent = s.agent.as_ref()?;
                agent.kind.profile().log_format?;
                Some(LogTarget {
                    key: s.key.clone(),
                    generation: self.generation(&s.key),
                    kind: agent.kind,
                    cwd: s.cwd.clone(),
                })
            })
            .collect();
        if !targets.is_empty() {
            self.pending.push(Task::ClassifyLogs { cycle, targets });
        }
    }

    fn apply_single_capture(&mut self, cycle: u64, result: CaptureResult) {
        self.refreshing.remove(&result.key);
        if result.generation != self.generation(&result.key) {
            return;
        }
        if let Ok(snapshot) = &result.outcome {
            if !self.pane_cache.set_one(cycle, &result.key, snapshot.text.clone()) {
                return;
            }
        }
        self.apply_outcome(result);
    }

    fn apply_outcome(&mut self, result: CaptureResult) {
        let Some(idx) = self.index_of(&result.key) else {
            return;
        };
        match result.outcome {
            Ok(PaneSnapshot { flags, .. }) if flags.dead => {
                debug!(session = %result.key, "pane exited");
                self.pane_gone(idx);
            }
            Ok(snapshot) => {
                let status = self.classifier.classify(&snapshot.text);
                let session = &mut self.sessions[idx];
                if session.paused {
                    return;
                }
                if let Some(agent) = session.agent.as_mut() {
                    agent.buffer.replace(&snapshot.text);
                    agent.flags = snapshot.flags;
                    agent.text_status = Some(status);
                }
            }
            Err(msg) if is_missing_pane(&msg) => {
                debug!(session = %result.key, "pane is gone");
                self.pane_gone(idx);
            }
            Err(msg) => {
                debug!(session = %result.key, error = %msg, "capture failed; retrying next cycle");
            }
        }
    }

    fn apply_log_statuses(&mut self, cycle: u64, results: Vec<LogResult>) {
        if cycle < self.log_cycle {
            return;
        }
        self.log_cycle = cycle;
        for result in results {
            if result.generation != self.generation(&result.key) {
                continue;
            }
            let Some(idx) = self.index_of(&result.key) else {
                continue;
            };
            if let Some(agent) = self.sessions[idx].agent.as_mut() {
                agent.log_status = result.status;
            }
        }
    }

    /// Drop the agent of a session whose pane no longer exists
    fn pane_gone(&mut self, idx: usize) {
        let key = self.sessions[idx].key.clone();
        if idx == self.selected {
            self.leave_interactive();
        }
        self.bump_generation(&key);
        self.pane_cache.remove(&key);
        self.sessions[idx].agent = None;
    }

    /// Bring the in-memory shells in line with the manifest on disk.
    ///
    /// `live_sessions` are the tmux sessions running when the manifest was
    /// read; shells outside it get no agent.
    pub fn reconcile_shells(
        &mut self,
        defs: Vec<ShellDefinition>,
        live_sessions: &[String],
    ) -> Reconciliation {
        let mut changes = Reconciliation::default();
        let on_disk: HashSet<&str> = defs.iter().map(|d| d.tmux_name.as_str()).collect();
        let live: HashSet<&str> = live_sessions.iter().map(String::as_str).collect();

        changes.retired = self
            .sessions
            .iter()
            .filter(|s| s.is_shell() && !on_disk.contains(s.key.as_str()))
            .map(|s| s.key.clone())
            .collect();
        for key in &changes.retired {
            self.retire(key);
        }

        for def in &defs {
            if self.upsert_shell(def, live.contains(def.tmux_name.as_str())) {
                changes.discovered.push(def.tmux_name.clone());
            }
        }
        self.sort_sessions();
        changes
    }

    /// Insert or refresh a shell session; true when it was new.
    ///
    /// A known shell without an agent adopts its pane once it is seen live.
    fn upsert_shell(&mut self, def: &ShellDefinition, live: bool) -> bool {
        let capacity = self.options.buffer_capacity;
        match self.index_of(&def.tmux_name) {
            Some(idx) => {
                let session = &mut self.sessions[idx];
                if live && session.agent.is_none() {
                    session.agent = Some(Agent::new(def.agent_type, def.tmux_name.clone(), capacity));
                }
                session.display_name = def.display_name.clone();
                session.kind = SessionKind::Shell {
                    skip_perms: def.skip_perms,
                };
                session.agent_kind = def.agent_type;
                if let Some(agent) = session.agent.as_mut() {
                    agent.kind = def.agent_type;
                }
                false
            }
            None => {
                let session = Session::shell(def, self.options.project_dir.clone(), live, capacity);
                self.sessions.push(session);
                true
            }
        }
    }

    fn retire(&mut self, key: &str) {
        let Some(idx) = self.index_of(key) else {
            return;
        };
        if idx == self.selected {
            self.leave_interactive();
            self.selection.clear();
        }
        // The bumped generation outlives the session so a re-added shell of
        // the same name never accepts results issued before retirement
        self.bump_generation(key);
        self.pane_cache.remove(key);
        let selected_key = self.selected_session().map(|s| s.key.clone());
        self.sessions.remove(idx);
        self.restore_selection(selected_key.as_deref());
    }

    fn apply_worktrees(&mut self, worktrees: Vec<WorktreeInfo>, live_sessions: &[String]) {
        let live: HashSet<&str> = live_sessions.iter().map(String::as_str).collect();
        let keys: HashSet<String> = worktrees.iter().map(|w| w.path.display().to_string()).collect();

        let gone: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| !s.is_shell() && !keys.contains(&s.key))
            .map(|s| s.key.clone())
            .collect();
        for key in &gone {
            self.retire(key);
        }

        for wt in worktrees {
            let key = wt.path.display().to_string();
            if let Some(idx) = self.index_of(&key) {
                if let SessionKind::Worktree { branch, .. } = &mut self.sessions[idx].kind {
                    *branch = wt.branch.clone();
                }
                continue;
            }
            let pane = self.worktree_pane_name(&wt.name());
            let mut session = Session::worktree(wt.path, wt.branch, self.options.default_agent);
            if live.contains(pane.as_str()) {
                session.agent = Some(Agent::new(
                    self.options.default_agent,
                    pane,
                    self.options.buffer_capacity,
                ));
            }
            self.sessions.push(session);
        }
        self.sort_sessions();
    }

    /// Worktrees first, then shells oldest to newest; keeps the cursor on
    /// the same session.
    fn sort_sessions(&mut self) {
        let selected_key = self.selected_session().map(|s| s.key.clone());
        self.sessions
            .sort_by(|a, b| (a.is_shell(), a.created_at, &a.key).cmp(&(b.is_shell(), b.created_at, &b.key)));
        self.restore_selection(selected_key.as_deref());
    }

    fn restore_selection(&mut self, key: Option<&str>) {
        if let Some(idx) = key.and_then(|k| self.index_of(k)) {
            self.selected = idx;
        }
        if self.selected >= self.sessions.len() {
            self.selected = self.sessions.len().saturating_sub(1);
        }
    }

    pub fn worktree_pane_name(&self, worktree: &str) -> String {
        format!("{}-wt-{}", self.prefix, sanitize_session_name(worktree))
    }

    fn next_shell_name(&self) -> String {
        let stem = format!("{}-sh-", self.prefix);
        let n = self
            .sessions
            .iter()
            .filter_map(|s| s.key.strip_prefix(&stem)?.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("{stem}{}", n + 1)
    }

    pub fn select(&mut self, idx: usize) {
        if idx >= self.sessions.len() || idx == self.selected {
            return;
        }
        self.leave_interactive();
        self.selection.clear();
        self.selected = idx;
        if let Some(view) = self.viewport.as_mut() {
            view.scroll = 0;
        }
    }

    pub fn select_next(&mut self) {
        if !self.sessions.is_empty() {
            self.select((self.selected + 1) % self.sessions.len());
        }
    }

    pub fn select_previous(&mut self) {
        if !self.sessions.is_empty() {
            self.select((self.selected + self.sessions.len() - 1) % self.sessions.len());
        }
    }

    /// Start forwarding input to the selected pane. False when it has none.
    pub fn enter_interactive(&mut self) -> bool {
        let Some(session) = self.sessions.get(self.selected) else {
            return false;
        };
        let Some(agent) = session.agent.as_ref() else {
            return false;
        };
        if session.paused {
            return false;
        }
        let key = session.key.clone();
        let pane = agent.pane.clone();

        self.interactive = true;
        self.selection.clear();
        self.pane_cache.remove(&key);
        if let Some(view) = self.viewport.as_mut() {
            view.scroll = 0;
            self.pending.push(Task::ResizePane {
                pane,
                width: view.width,
                height: view.height,
            });
        }
        true
    }

    pub fn leave_interactive(&mut self) {
        if !self.interactive {
            return;
        }
        self.interactive = false;
        self.selection.clear();
        if let Some(key) = self.selected_session().map(|s| s.key.clone()) {
            self.bump_generation(&key);
        }
    }

    pub fn handle_interactive_key(&mut self, key: KeyEvent) {
        if !self.interactive {
            return;
        }
        let Some((session_key, pane)) = self
            .selected_session()
            .and_then(|s| Some((s.key.clone(), s.agent.as_ref()?.pane.clone())))
        else {
            self.leave_interactive();
            return;
        };

        match keys::translate_key(key) {
            InteractiveInput::Exit => self.leave_interactive(),
            InteractiveInput::Copy => self.copy_selection(),
            InteractiveInput::Paste => self.pending.push(Task::Paste { pane }),
            InteractiveInput::Send(input) => {
                self.selection.clear();
                if let Some(view) = self.viewport.as_mut() {
                    view.scroll = 0;
                }
                self.pane_cache.remove(&session_key);
                self.pending.push(Task::SendInput {
                    pane,
                    inputs: vec![input],
                });
            }
            InteractiveInput::Noop => {}
        }
    }

    fn copy_selection(&mut self) {
        let Some(agent) = self.selected_session().and_then(|s| s.agent.as_ref()) else {
            return;
        };
        self.notice = Some(match clipboard::copy_selection(&self.selection, &agent.buffer) {
            Ok(lines) => format!("Copied {lines} line(s)"),
            Err(CopyError::NothingToCopy) => "Nothing to copy".to_string(),
            Err(e) => e.to_string(),
        });
    }

    /// Mouse input over the preview while interactive.
    ///
    /// Panes whose program wants the mouse get the event forwarded; all
    /// others drive the local selection.
    pub fn handle_mouse(&mut self, event: MouseEvent) {
        let Some(mut view) = self.viewport else {
            return;
        };
        let Some(agent) = self.sessions.get(self.selected).and_then(|s| s.agent.as_ref()) else {
            return;
        };
        let inside = view.contains(event.column, event.row);
        let total = agent.buffer.line_count();

        if self.interactive && agent.flags.mouse {
            if !inside {
                return;
            }
            if let Some(seq) = keys::encode_mouse(&event, view.x, view.y) {
                self.pending.push(Task::SendInput {
                    pane: agent.pane.clone(),
                    inputs: vec![PaneInput::Literal(seq)],
                });
            }
            return;
        }

        match event.kind {
            MouseEventKind::ScrollUp if inside => view.scroll_by(SCROLL_STEP, total),
            MouseEventKind::ScrollDown if inside => view.scroll_by(-SCROLL_STEP, total),
            _ if !self.interactive => return,
            MouseEventKind::Down(MouseButton::Left) => {
                match view.point_at(&agent.buffer, event.column, event.row) {
                    Some(point) => self.selection.pointer_down(point),
                    None => self.selection.clear(),
                }
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                if let Some(point) = view.point_at(&agent.buffer, event.column, event.row) {
                    self.selection.pointer_drag(point);
                }
            }
            MouseEventKind::Up(MouseButton::Left) => self.selection.pointer_up(),
            _ => return,
        }
        self.viewport = Some(view);
        self.selection.view = Some(view);
    }

    /// Record where the preview was drawn; resizes the pane when the
    /// interactive area changes size.
    pub fn set_viewport(&mut self, x: u16, y: u16, width: u16, height: u16) {
        let mut view = Viewport::new(x, y, width, height);
        let resized = match self.viewport {
            Some(old) => {
                view.scroll = old.scroll;
                old.width != width || old.height != height
            }
            None => true,
        };
        self.viewport = Some(view);
        self.selection.view = Some(view);

        if !resized || !self.interactive {
            return;
        }
        if let Some(pane) = self.selected_pane() {
            self.pending.push(Task::ResizePane {
                pane,
                width,
                height,
            });
        }
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    /// Visible lines of the selected pane, selection highlighting applied
    pub fn preview_lines(&self) -> Vec<String> {
        let Some(agent) = self.selected_session().and_then(|s| s.agent.as_ref()) else {
            return Vec::new();
        };
        let buffer = &agent.buffer;
        let (lo, hi) = match self.viewport {
            Some(view) => view.visible_range(buffer.line_count()),
            None => (0, buffer.line_count()),
        };
        buffer
            .lines_range(lo, hi)
            .into_iter()
            .enumerate()
            .map(|(i, line)| self.selection.render_line(lo + i, line))
            .collect()
    }

    pub fn spawn_shell(&mut self, display_name: &str, kind: AgentKind, skip_perms: bool) {
        let tmux_name = self.next_shell_name();
        let display = match display_name.trim() {
            "" => tmux_name.clone(),
            name => name.to_string(),
        };
        let def = ShellDefinition::new(tmux_name, display).with_agent(kind, skip_perms);
        self.pending.push(Task::SpawnShell {
            def,
            cwd: self.options.project_dir.clone(),
            command: kind.launch_command(skip_perms),
        });
    }

    /// Rename the selected shell; worktrees are named by their directory
    pub fn rename_selected(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let Some(session) = self.sessions.get_mut(self.selected) else {
            return false;
        };
        if !session.is_shell() {
            return false;
        }
        session.display_name = name.to_string();
        if let Some(def) = session.shell_definition() {
            self.pending.push(Task::RenameShell(def));
        }
        true
    }

    /// Kill the selected shell, or stop the agent of the selected worktree
    pub fn kill_selected(&mut self) {
        let Some(session) = self.sessions.get(self.selected) else {
            return;
        };
        let key = session.key.clone();
        if session.is_shell() {
            self.pending.push(Task::KillShell { tmux_name: key });
        } else if let Some(agent) = session.agent.as_ref() {
            let pane = agent.pane.clone();
            self.pending.push(Task::StopAgent { key, pane });
        }
    }

    pub fn start_agent_selected(&mut self) {
        let Some(session) = self.sessions.get(self.selected) else {
            return;
        };
        if session.agent.is_some() {
            return;
        }
        let pane = if session.is_shell() {
            session.key.clone()
        } else {
            self.worktree_pane_name(&session.display_name)
        };
        self.pending.push(Task::StartAgent {
            key: session.key.clone(),
            pane,
            cwd: session.cwd.clone(),
            kind: session.agent_kind,
            command: session.agent_kind.launch_command(session.skip_perms()),
        });
    }

    pub fn toggle_pause_selected(&mut self) {
        let Some(session) = self.sessions.get(self.selected) else {
            return;
        };
        if session.agent.is_none() {
            return;
        }
        let key = session.key.clone();
        let paused = !session.paused;
        if paused {
            self.leave_interactive();
        }
        self.sessions[self.selected].paused = paused;
        self.bump_generation(&key);
    }

    pub fn refresh_worktrees(&mut self) {
        self.pending.push(Task::DiscoverWorktrees);
    }

    pub fn attach_selected(&mut self) {
        if let Some(pane) = self.selected_pane() {
            self.pending.push(Task::Attach(pane));
        }
    }

    fn selected_pane(&self) -> Option<String> {
        Some(self.selected_session()?.agent.as_ref()?.pane.clone())
    }

    /// Status per session, in display order
    pub fn statuses(&self) -> Vec<Option<Status>> {
        self.sessions.iter().map(Session::status).collect()
    }

    /// Stop applying any further results
    pub fn shutdown(&mut self) {
        let keys: Vec<String> = self.sessions.iter().map(|s| s.key.clone()).collect();
        for key in keys {
            self.bump_generation(&key);
        }
        self.interactive = false;
        self.selection.clear();
        self.pending.clear();
        self.closed = true;
    }
}

fn is_missing_pane(msg: &str) -> bool {
    ["can't find", "no server running", "session not found", "error connecting to"]
        .iter()
        .any(|needle| msg.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarkerConfig;
    use crate::tmux::PaneFlags;
    use crossterm::event::{KeyCode, KeyModifiers};

    fn orchestrator() -> SessionOrchestrator {
        let options = OrchestratorOptions {
            poll_interval: Duration::from_secs(1),
            capture_ttl: Duration::from_millis(800),
            buffer_capacity: 100,
            project_dir: PathBuf::from("/work/proj"),
            default_agent: AgentKind::Claude,
            cache_capacity: 16,
        };
        SessionOrchestrator::new(options, TextClassifier::new(&MarkerConfig::default()))
    }

    fn shell(name: &str) -> ShellDefinition {
        ShellDefinition::new(name, name).with_agent(AgentKind::Claude, false)
    }

    fn captured(key: &str, generation: u64, text: &str) -> CaptureResult {
        CaptureResult {
            key: key.to_string(),
            generation,
            outcome: Ok(PaneSnapshot {
                text: text.to_string(),
                flags: PaneFlags::default(),
            }),
        }
    }

    /// Orchestrator holding the given shells, all with live panes
    fn with_shells(names: &[&str]) -> SessionOrchestrator {
        let mut orch = orchestrator();
        let live: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        orch.reconcile_shells(names.iter().map(|n| shell(n)).collect(), &live);
        orch
    }

    fn status_of(orch: &SessionOrchestrator, key: &str) -> Option<Status> {
        orch.sessions().iter().find(|s| s.key == key).and_then(Session::status)
    }

    #[test]
    fn test_poll_requests_live_panes() {
        let mut orch = with_shells(&["a", "b"]);
        orch.tick(Instant::now());
        let tasks = orch.take_pending_tasks();
        match &tasks[..] {
            [Task::CapturePanes { cycle, targets }] => {
                assert_eq!(*cycle, 1);
                assert_eq!(targets.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }

        // Not due again until the interval passes
        orch.tick(Instant::now());
        assert!(orch.take_pending_tasks().is_empty());
    }

    #[test]
    fn test_capture_updates_status_and_requests_logs() {
        let mut orch = with_shells(&["a"]);
        orch.handle(Action::CapturesReady {
            cycle: 1,
            results: vec![captured("a", 0, "Apply this edit? [y/n]")],
        });
        assert_eq!(status_of(&orch, "a"), Some(Status::Waiting));
        assert!(matches!(
            orch.take_pending_tasks()[..],
            [Task::ClassifyLogs { cycle: 1, .. }]
        ));
    }

    #[test]
    fn test_stale_cycle_does_not_overwrite_fresh() {
        let mut orch = with_shells(&["a"]);
        orch.handle(Action::CapturesReady {
            cycle: 2,
            results: vec![captured("a", 0, "Traceback (most recent call last):")],
        });
        orch.handle(Action::CapturesReady {
            cycle: 1,
            results: vec![captured("a", 0, "Continue? (y/n)")],
        });
        assert_eq!(status_of(&orch, "a"), Some(Status::Error));
    }

    #[test]
    fn test_log_waiting_refines_active_text() {
        let mut orch = with_shells(&["a"]);
        orch.handle(Action::CapturesReady {
            cycle: 1,
            results: vec![captured("a", 0, "editing src/main.rs")],
        });
        assert_eq!(status_of(&orch, "a"), Some(Status::Active));
        orch.handle(Action::LogStatuses {
            cycle: 1,
            results: vec![LogResult {
                key: "a".into(),
                generation: 0,
                status: Some(Status::Waiting),
            }],
        });
        assert_eq!(status_of(&orch, "a"), Some(Status::Waiting));
    }

    #[test]
    fn test_leaving_interactive_cancels_in_flight_results() {
        let mut orch = with_shells(&["a"]);
        orch.set_viewport(30, 1, 80, 20);
        assert!(orch.enter_interactive());
        let generation = orch.generation("a");
        orch.leave_interactive();

        orch.handle(Action::PaneCaptured {
            cycle: 0,
            result: captured("a", generation, "Error: boom"),
        });
        assert_eq!(status_of(&orch, "a"), None);
    }

    #[test]
    fn test_missing_pane_has_no_status() {
        let mut orch = with_shells(&["a"]);
        orch.set_viewport(30, 1, 80, 20);
        orch.enter_interactive();
        orch.handle(Action::CapturesReady {
            cycle: 1,
            results: vec![CaptureResult {
                key: "a".into(),
                generation: 0,
                outcome: Err("can't find session: a".into()),
            }],
        });
        assert_eq!(status_of(&orch, "a"), None);
        assert!(!orch.is_interactive());
    }

    #[test]
    fn test_reconcile_reports_discovered_and_retired() {
        let mut orch = with_shells(&["a", "b"]);
        let changes = orch.reconcile_shells(vec![shell("b"), shell("c")], &["b".into(), "c".into()]);
        assert_eq!(changes.discovered, vec!["c".to_string()]);
        assert_eq!(changes.retired, vec!["a".to_string()]);
        let keys: Vec<&str> = orch.sessions().iter().map(|s| s.key.as_str()).collect();
        assert!(keys.contains(&"b") && keys.contains(&"c") && !keys.contains(&"a"));
    }

    #[test]
    fn test_manifest_change_triggers_reload() {
        let mut orch = orchestrator();
        orch.handle(Action::ManifestChanged);
        assert_eq!(orch.take_pending_tasks(), vec![Task::ReloadManifest]);
    }

    #[test]
    fn test_switching_session_clears_selection() {
        let mut orch = with_shells(&["a", "b"]);
        orch.set_viewport(0, 0, 40, 5);
        orch.handle(Action::CapturesReady {
            cycle: 1,
            results: vec![captured("a", 0, "one\ntwo\nthree"), captured("b", 0, "x")],
        });
        orch.enter_interactive();

        let mouse = |kind, column, row| MouseEvent {
            kind,
            column,
            row,
            modifiers: KeyModifiers::NONE,
        };
        orch.handle_mouse(mouse(MouseEventKind::Down(MouseButton::Left), 0, 0));
        orch.handle_mouse(mouse(MouseEventKind::Drag(MouseButton::Left), 2, 2));
        orch.handle_mouse(mouse(MouseEventKind::Up(MouseButton::Left), 2, 2));
        assert!(orch.selection().has_selection());

        orch.select_next();
        assert!(!orch.selection().has_selection());
        assert!(!orch.is_interactive());
    }

    #[test]
    fn test_typing_forwards_to_pane() {
        let mut orch = with_shells(&["a"]);
        orch.enter_interactive();
        orch.take_pending_tasks();
        orch.handle_interactive_key(KeyEvent::new(KeyCode::Char('x'), KeyModifiers::NONE));
        assert_eq!(
            orch.take_pending_tasks(),
            vec![Task::SendInput {
                pane: "a".into(),
                inputs: vec![PaneInput::Literal("x".into())],
            }]
        );

        // Ctrl+\ as crossterm reports it on Unix
        orch.handle_interactive_key(KeyEvent::new(KeyCode::Char('4'), KeyModifiers::CONTROL));
        assert!(!orch.is_interactive());
        assert!(orch.take_pending_tasks().is_empty());
    }

    #[test]
    fn test_spawn_shell_numbers_names() {
        let mut orch = with_shells(&["proj-sh-1", "proj-sh-4"]);
        orch.spawn_shell("", AgentKind::Codex, true);
        match &orch.take_pending_tasks()[..] {
            [Task::SpawnShell { def, command, .. }] => {
                assert_eq!(def.tmux_name, "proj-sh-5");
                assert_eq!(def.display_name, "proj-sh-5");
                assert_eq!(
                    command.as_deref(),
                    Some("codex --dangerously-bypass-approvals-and-sandbox")
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_worktrees_pick_up_live_panes() {
        let mut orch = orchestrator();
        orch.handle(Action::WorktreesDiscovered {
            worktrees: vec![
                WorktreeInfo {
                    path: PathBuf::from("/work/proj"),
                    branch: Some("main".into()),
                    bare: false,
                },
                WorktreeInfo {
                    path: PathBuf::from("/work/proj-wt/feat"),
                    branch: Some("feat".into()),
                    bare: false,
                },
            ],
            live_sessions: vec!["proj-wt-feat".into()],
        });
        let pane = |key: &str| {
            orch.sessions()
                .iter()
                .find(|s| s.key == key)
                .and_then(|s| s.agent.as_ref())
                .map(|a| a.pane.clone())
        };
        assert_eq!(pane("/work/proj"), None);
        assert_eq!(pane("/work/proj-wt/feat").as_deref(), Some("proj-wt-feat"));
        assert_eq!(status_of(&orch, "/work/proj-wt/feat"), None);
    }

    #[test]
    fn test_shutdown_ignores_late_results() {
        let mut orch = with_shells(&["a"]);
        orch.shutdown();
        orch.handle(Action::CapturesReady {
            cycle: 1,
            results: vec![captured("a", 0, "Error: late")],
        });
        assert_eq!(status_of(&orch, "a"), None);
        assert!(orch.take_pending_tasks().is_empty());
    }

    #[test]
    fn test_shell_without_live_pane_has_no_status() {
        let mut orch = orchestrator();
        orch.reconcile_shells(vec![ShellDefinition::new("proj-sh-9", "dead")], &[]);
        assert_eq!(orch.sessions()[0].status(), None);
        assert!(orch.sessions()[0].agent.is_none());

        orch.tick(Instant::now());
        assert!(orch.take_pending_tasks().is_empty());
    }

    #[test]
    fn test_live_shell_unknown_until_first_capture() {
        let mut orch = with_shells(&["a"]);
        assert_eq!(status_of(&orch, "a"), None);
        orch.handle(Action::CapturesReady {
            cycle: 1,
            results: vec![captured("a", 0, "editing src/lib.rs")],
        });
        assert_eq!(status_of(&orch, "a"), Some(Status::Active));
    }

    #[test]
    fn test_reload_adopts_pane_once_live() {
        let mut orch = orchestrator();
        orch.reconcile_shells(vec![shell("a")], &[]);
        assert!(orch.sessions()[0].agent.is_none());

        orch.handle(Action::ManifestLoaded {
            shells: vec![shell("a")],
            live_sessions: vec!["a".into()],
        });
        assert_eq!(
            orch.sessions()[0].agent.as_ref().map(|a| a.pane.as_str()),
            Some("a")
        );
    }

    #[test]
    fn test_readded_shell_ignores_results_from_before_retirement() {
        let mut orch = with_shells(&["a"]);
        let before = orch.generation("a");
        orch.reconcile_shells(Vec::new(), &[]);
        orch.reconcile_shells(vec![shell("a")], &["a".into()]);
        assert!(orch.generation("a") > before);

        orch.handle(Action::CapturesReady {
            cycle: 1,
            results: vec![captured("a", before, "Error: from the old pane")],
        });
        assert_eq!(status_of(&orch, "a"), None);
    }

    #[test]
    fn test_poll_batch_does_not_overwrite_later_refresh() {
        let mut orch = with_shells(&["a"]);
        let t0 = Instant::now();
        orch.tick(t0);
        assert!(orch.enter_interactive());
        orch.take_pending_tasks();

        // Refresh between polls, issued after the batch
        orch.tick(t0 + Duration::from_millis(10));
        let cycle = match &orch.take_pending_tasks()[..] {
            [Task::CapturePane { cycle, .. }] => *cycle,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(cycle, 2);

        orch.handle(Action::PaneCaptured {
            cycle,
            result: captured("a", 0, "Continue? (y/n)"),
        });
        orch.handle(Action::CapturesReady {
            cycle: 1,
            results: vec![captured("a", 0, "Traceback (most recent call last):")],
        });
        assert_eq!(status_of(&orch, "a"), Some(Status::Waiting));
        assert_eq!(orch.preview_lines(), vec!["Continue? (y/n)".to_string()]);
    }

    #[test]
    fn test_missing_pane_messages() {
        assert!(is_missing_pane("can't find session: proj-sh-1"));
        assert!(is_missing_pane(
            "error connecting to /tmp/tmux-1000/default (No such file or directory)"
        ));
        assert!(!is_missing_pane("capture-pane: invalid option"));
    }
}

use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::manifest::ShellDefinition;
use crate::output::OutputBuffer;
use crate::status::{combine, AgentKind, Status};
use crate::tmux::PaneFlags;

/// Where a session's identity comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKind {
    /// A git worktree, keyed by its path
    Worktree {
        path: PathBuf,
        branch: Option<String>,
    },
    /// A standalone shell from the manifest, keyed by its tmux name
    Shell { skip_perms: bool },
}

/// The process hosted in a multiplexer pane, owned by one session
#[derive(Debug, Clone)]
pub struct Agent {
    pub kind: AgentKind,
    /// tmux target of the pane
    pub pane: String,
    pub buffer: OutputBuffer,
    pub flags: PaneFlags,
    /// None until the first capture has been classified
    pub text_status: Option<Status>,
    pub log_status: Option<Status>,
}

impl Agent {
    pub fn new(kind: AgentKind, pane: impl Into<String>, capacity: usize) -> Self {
        Self {
            kind,
            pane: pane.into(),
            buffer: OutputBuffer::new(capacity),
            flags: PaneFlags::default(),
            text_status: None,
            log_status: None,
        }
    }

    pub fn status(&self) -> Option<Status> {
        self.text_status.map(|text| combine(text, self.log_status))
    }
}

/// One monitored worktree or shell
#[derive(Debug, Clone)]
pub struct Session {
    pub key: String,
    pub display_name: String,
    pub kind: SessionKind,
    /// Working directory the agent runs in
    pub cwd: PathBuf,
    /// Agent launched when the session's pane is (re)started
    pub agent_kind: AgentKind,
    pub agent: Option<Agent>,
    pub paused: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn worktree(path: PathBuf, branch: Option<String>, agent_kind: AgentKind) -> Self {
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            key: path.display().to_string(),
            display_name,
            cwd: path.clone(),
            kind: SessionKind::Worktree { path, branch },
            agent_kind,
            agent: None,
            paused: false,
            created_at: Utc::now(),
        }
    }

    /// A manifest shell; it hosts an agent only when its tmux session is alive
    pub fn shell(def: &ShellDefinition, cwd: PathBuf, live: bool, capacity: usize) -> Self {
        Self {
            key: def.tmux_name.clone(),
            display_name: def.display_name.clone(),
            kind: SessionKind::Shell {
                skip_perms: def.skip_perms,
            },
            cwd,
            agent_kind: def.agent_type,
            agent: live.then(|| Agent::new(def.agent_type, def.tmux_name.clone(), capacity)),
            paused: false,
            created_at: def.created_at,
        }
    }

    pub fn is_shell(&self) -> bool {
        matches!(self.kind, SessionKind::Shell { .. })
    }

    /// None when no pane is hosted or nothing has been captured yet; never defaulted
    pub fn status(&self) -> Option<Status> {
        let agent = self.agent.as_ref()?;
        if self.paused {
            return Some(Status::Paused);
        }
        agent.status()
    }

    pub fn pollable(&self) -> bool {
        self.agent.is_some() && !self.paused
    }

    pub fn skip_perms(&self) -> bool {
        matches!(self.kind, SessionKind::Shell { skip_perms: true })
    }

    /// Manifest entry describing this session, if it is a shell
    pub fn shell_definition(&self) -> Option<ShellDefinition> {
        if !self.is_shell() {
            return None;
        }
        let mut def = ShellDefinition::new(self.key.clone(), self.display_name.clone())
            .with_agent(self.agent_kind, self.skip_perms());
        def.created_at = self.created_at;
        Some(def)
    }

    pub fn branch(&self) -> Option<&str> {
        match &self.kind {
            SessionKind::Worktree { branch, .. } => branch.as_deref(),
            SessionKind::Shell { .. } => None,
        }
    }
}

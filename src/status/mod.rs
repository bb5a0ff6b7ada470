mod heuristics;
mod locators;
mod session_log;

pub use heuristics::{classify_text, TextClassifier};
pub use session_log::SessionLogReader;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// What a hosted agent is currently doing.
///
/// Never persisted; recomputed from the freshest capture on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Running with nothing notable on screen
    Active,
    /// Waiting on the user (confirmation prompt or finished turn)
    Waiting,
    /// Inside an open reasoning block
    Thinking,
    /// Reported completion
    Done,
    /// Last output was an error
    Error,
    /// Polling suspended by the user
    Paused,
}

impl Status {
    pub fn label(self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Waiting => "waiting",
            Status::Thinking => "thinking",
            Status::Done => "done",
            Status::Error => "error",
            Status::Paused => "paused",
        }
    }
}

/// Fold the text classifier's answer with the session-log answer.
///
/// Any marker found on screen wins; the log only refines an otherwise
/// unremarkable `Active`.
pub fn combine(text: Status, log: Option<Status>) -> Status {
    match (text, log) {
        (Status::Active, Some(Status::Waiting)) => Status::Waiting,
        (status, _) => status,
    }
}

/// On-disk conversation log format written by an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// `~/.claude/projects/<escaped path>/*.jsonl`
    ClaudeJsonl,
    /// `~/.codex/sessions/**/rollout-*.jsonl`
    CodexJsonl,
    /// `~/.gemini/tmp/<sha256>/chats/session-*.json`
    GeminiJson,
}

/// Static facts about one agent kind
#[derive(Debug)]
pub struct AgentProfile {
    pub kind: AgentKind,
    pub id: &'static str,
    pub display_name: &'static str,
    pub command: &'static str,
    pub skip_perms_flag: Option<&'static str>,
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AgentKind {
    Claude,
    Codex,
    Gemini,
    Aider,
    OpenCode,
    #[default]
    Shell,
}

static AGENT_TABLE: [AgentProfile; 6] = [
    AgentProfile {
        kind: AgentKind::Claude,
        id: "claude",
        display_name: "Claude Code",
        command: "claude",
        skip_perms_flag: Some("--dangerously-skip-permissions"),
        log_format: Some(LogFormat::ClaudeJsonl),
    },
    AgentProfile {
        kind: AgentKind::Codex,
        id: "codex",
        display_name: "Codex",
        command: "codex",
        skip_perms_flag: Some("--dangerously-bypass-approvals-and-sandbox"),
        log_format: Some(LogFormat::CodexJsonl),
    },
    AgentProfile {
        kind: AgentKind::Gemini,
        id: "gemini",
        display_name: "Gemini CLI",
        command: "gemini",
        skip_perms_flag: Some("--yolo"),
        log_format: Some(LogFormat::GeminiJson),
    },
    AgentProfile {
        kind: AgentKind::Aider,
        id: "aider",
        display_name: "Aider",
        command: "aider",
        skip_perms_flag: Some("--yes-always"),
        log_format: None,
    },
    AgentProfile {
        kind: AgentKind::OpenCode,
        id: "opencode",
        display_name: "OpenCode",
        command: "opencode",
        skip_perms_flag: None,
        log_format: None,
    },
    AgentProfile {
        kind: AgentKind::Shell,
        id: "shell",
        display_name: "Shell",
        command: "",
        skip_perms_flag: None,
        log_format: None,
    },
];

impl AgentKind {
    pub fn profile(self) -> &'static AgentProfile {
        let idx = match self {
            AgentKind::Claude => 0,
            AgentKind::Codex => 1,
            AgentKind::Gemini => 2,
            AgentKind::Aider => 3,
            AgentKind::OpenCode => 4,
            AgentKind::Shell => 5,
        };
        &AGENT_TABLE[idx]
    }

    pub fn all() -> impl Iterator<Item = AgentKind> {
        AGENT_TABLE.iter().map(|p| p.kind)
    }

    /// Parse a manifest id; anything unrecognised is a plain shell
    pub fn from_id(id: &str) -> Self {
        AGENT_TABLE
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(id))
            .map(|p| p.kind)
            .unwrap_or(AgentKind::Shell)
    }

    pub fn id(self) -> &'static str {
        self.profile().id
    }

    /// Shell command that launches this agent, or None for a bare shell
    pub fn launch_command(self, skip_perms: bool) -> Option<String> {
        let profile = self.profile();
        if profile.command.is_empty() {
            return None;
        }
        match (skip_perms, profile.skip_perms_flag) {
            (true, Some(flag)) => Some(format!("{} {}", profile.command, flag)),
            _ => Some(profile.command.to_string()),
        }
    }

    pub fn next(self) -> Self {
        let all: Vec<AgentKind> = Self::all().collect();
        let idx = all.iter().position(|k| *k == self).unwrap_or(0);
        all[(idx + 1) % all.len()]
    }
}

impl Serialize for AgentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

impl<'de> Deserialize<'de> for AgentKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = String::deserialize(deserializer)?;
        Ok(AgentKind::from_id(&id))
    }
}

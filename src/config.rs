use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::status::AgentKind;

/// Extra status markers appended to the built-in lists
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    pub waiting: Vec<String>,
    pub thinking: Vec<String>,
    pub error: Vec<String>,
    pub done: Vec<String>,
}

/// Runtime configuration, read from `<config dir>/agent-deck/config.json`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub poll_interval_ms: u64,
    pub capture_ttl_ms: u64,
    pub buffer_capacity: usize,
    pub capture_lines: usize,
    pub log_tail_bytes: u64,
    pub log_lookup_ttl_ms: u64,
    pub cache_capacity: usize,
    pub lock_timeout_ms: u64,
    pub lock_retry_ms: u64,
    pub watch_debounce_ms: u64,
    pub markers: MarkerConfig,
    pub project_dir: Option<PathBuf>,
    /// Agent started in worktree panes
    pub default_agent: AgentKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            capture_ttl_ms: 800,
            buffer_capacity: 500,
            capture_lines: 200,
            log_tail_bytes: 2 * 1024 * 1024,
            log_lookup_ttl_ms: 3000,
            cache_capacity: 256,
            lock_timeout_ms: 3000,
            lock_retry_ms: 50,
            watch_debounce_ms: 100,
            markers: MarkerConfig::default(),
            project_dir: None,
            default_agent: AgentKind::Claude,
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match dirs::config_dir() {
            Some(dir) => Self::load_from(&dir.join("agent-deck").join("config.json")),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&data) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring malformed config");
                Self::default()
            }
        }
    }

    pub fn project_dir(&self) -> PathBuf {
        self.project_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Path of the shared shell manifest for the project
    pub fn manifest_path(&self) -> PathBuf {
        self.project_dir().join(".agent-deck").join("shells.json")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn capture_ttl(&self) -> Duration {
        Duration::from_millis(self.capture_ttl_ms)
    }

    pub fn log_lookup_ttl(&self) -> Duration {
        Duration::from_millis(self.log_lookup_ttl_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms.max(1))
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json"));
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.log_tail_bytes, 2 * 1024 * 1024);
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"poll_interval_ms": 250, "markers": {"done": ["all green"]}}"#)
            .unwrap();
        let config = Config::load_from(&path);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.buffer_capacity, 500);
        assert_eq!(config.markers.done, vec!["all green".to_string()]);
        assert_eq!(config.default_agent, AgentKind::Claude);
    }

    #[test]
    fn test_corrupt_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(Config::load_from(&path).lock_timeout_ms, 3000);
    }

    #[test]
    fn test_default_agent_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"default_agent": "codex"}"#).unwrap();
        assert_eq!(Config::load_from(&path).default_agent, AgentKind::Codex);
    }
}

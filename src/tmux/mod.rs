mod client;
pub mod keys;

pub use client::TmuxClient;
pub use keys::{InteractiveInput, PaneInput};

use anyhow::Result;
use std::future::Future;
use std::path::Path;

/// Pane facts reported alongside a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaneFlags {
    /// The hosted program asked for mouse events
    pub mouse: bool,
    /// The pane's process has exited
    pub dead: bool,
    pub width: u16,
    pub height: u16,
}

/// A captured pane: its text plus flags
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PaneSnapshot {
    pub text: String,
    pub flags: PaneFlags,
}

/// Everything the dashboard needs from the terminal multiplexer
pub trait Multiplexer: Send + Sync + 'static {
    /// Last `lines` lines of the pane, escape sequences included
    fn capture_pane(&self, target: &str, lines: usize) -> impl Future<Output = Result<String>> + Send;

    fn pane_flags(&self, target: &str) -> impl Future<Output = Result<PaneFlags>> + Send;

    fn resize_pane(&self, target: &str, width: u16, height: u16) -> impl Future<Output = Result<()>> + Send;

    fn send_input(&self, target: &str, input: &PaneInput) -> impl Future<Output = Result<()>> + Send;

    fn has_session(&self, name: &str) -> impl Future<Output = bool> + Send;

    fn list_session_names(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn new_session(
        &self,
        name: &str,
        cwd: &Path,
        command: Option<&str>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn kill_session(&self, name: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Turn a display name into something tmux accepts as a session name
pub fn sanitize_session_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "session".to_string()
    } else {
        trimmed.to_string()
    }
}

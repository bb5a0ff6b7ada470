use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::{Multiplexer, PaneFlags, PaneInput};

/// Client for interacting with tmux via CLI
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: String,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self {
            tmux_path: "tmux".to_string(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.tmux_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to execute tmux {}", args.first().unwrap_or(&"")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tmux {} failed: {}", args.first().unwrap_or(&""), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Get the command to attach to a session (for external execution)
    pub fn attach_command(&self, session: &str) -> Vec<String> {
        vec![
            self.tmux_path.clone(),
            "attach-session".to_string(),
            "-t".to_string(),
            session.to_string(),
        ]
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer for TmuxClient {
    async fn capture_pane(&self, target: &str, lines: usize) -> Result<String> {
        let start = format!("-{lines}");
        self.run(&["capture-pane", "-p", "-e", "-J", "-S", &start, "-t", target])
            .await
    }

    async fn pane_flags(&self, target: &str) -> Result<PaneFlags> {
        let out = self
            .run(&[
                "display-message",
                "-p",
                "-t",
                target,
                "#{mouse_any_flag}|#{pane_dead}|#{pane_width}|#{pane_height}",
            ])
            .await?;
        Ok(parse_pane_flags(&out))
    }

    async fn resize_pane(&self, target: &str, width: u16, height: u16) -> Result<()> {
        let width = width.to_string();
        let height = height.to_string();
        self.run(&["resize-window", "-t", target, "-x", &width, "-y", &height])
            .await
            .map(|_| ())
    }

    async fn send_input(&self, target: &str, input: &PaneInput) -> Result<()> {
        let result = match input {
            PaneInput::Named(key) => self.run(&["send-keys", "-t", target, key]).await,
            PaneInput::Literal(text) => self.run(&["send-keys", "-l", "-t", target, text]).await,
        };
        result.map(|_| ())
    }

    async fn has_session(&self, name: &str) -> bool {
        Command::new(&self.tmux_path)
            .args(["has-session", "-t", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn list_session_names(&self) -> Result<Vec<String>> {
        match self.run(&["list-sessions", "-F", "#{session_name}"]).await {
            Ok(out) => Ok(out.lines().map(str::to_string).collect()),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("no server running") || msg.contains("no sessions") {
                    return Ok(Vec::new());
                }
                Err(e)
            }
        }
    }

    async fn new_session(&self, name: &str, cwd: &Path, command: Option<&str>) -> Result<()> {
        let cwd = cwd.to_string_lossy();
        let mut args = vec!["new-session", "-d", "-s", name, "-c", cwd.as_ref()];
        if let Some(command) = command {
            args.push(command);
        }
        self.run(&args)
            .await
            .with_context(|| format!("Failed to create tmux session {name}"))
            .map(|_| ())
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        self.run(&["kill-session", "-t", name]).await.map(|_| ())
    }
}

fn parse_pane_flags(out: &str) -> PaneFlags {
    let parts: Vec<&str> = out.trim().split('|').collect();
    let flag = |idx: usize| parts.get(idx).is_some_and(|v| *v == "1");
    let num = |idx: usize| parts.get(idx).and_then(|v| v.parse().ok()).unwrap_or(0);
    PaneFlags {
        mouse: flag(0),
        dead: flag(1),
        width: num(2),
        height: num(3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pane_flags() {
        assert_eq!(
            parse_pane_flags("1|0|120|40\n"),
            PaneFlags {
                mouse: true,
                dead: false,
                width: 120,
                height: 40
            }
        );
        assert_eq!(parse_pane_flags("garbage"), PaneFlags::default());
    }

    #[test]
    fn test_attach_command() {
        let client = TmuxClient::new();
        assert_eq!(client.attach_command("s1"), vec!["tmux", "attach-session", "-t", "s1"]);
    }
}

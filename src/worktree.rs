use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// A git worktree as reported by `git worktree list --porcelain`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub bare: bool,
}

impl WorktreeInfo {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

pub async fn list_worktrees(repo: &Path) -> Result<Vec<WorktreeInfo>> {
    let output = Command::new("git")
        .args(["worktree", "list", "--porcelain"])
        .current_dir(repo)
        .output()
        .await
        .context("Failed to execute git worktree list")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git worktree list failed: {}", stderr.trim());
    }

    Ok(parse_porcelain(&String::from_utf8_lossy(&output.stdout)))
}

pub fn parse_porcelain(out: &str) -> Vec<WorktreeInfo> {
    let mut worktrees = Vec::new();
    let mut current: Option<WorktreeInfo> = None;

    for line in out.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            worktrees.extend(current.take());
            current = Some(WorktreeInfo {
                path: PathBuf::from(path),
                branch: None,
                bare: false,
            });
        } else if let Some(branch) = line.strip_prefix("branch ") {
            if let Some(wt) = current.as_mut() {
                wt.branch = Some(branch.trim_start_matches("refs/heads/").to_string());
            }
        } else if line == "bare" {
            if let Some(wt) = current.as_mut() {
                wt.bare = true;
            }
        }
    }
    worktrees.extend(current);
    worktrees.retain(|wt| !wt.bare);
    worktrees
}

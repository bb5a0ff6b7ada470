//! Pure path resolution for each agent's on-disk conversation logs.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// `~/.claude/projects/<worktree path with '/' and '.' replaced by '-'>`
pub fn claude_project_dir(home: &Path, worktree: &Path) -> PathBuf {
    let escaped: String = worktree
        .to_string_lossy()
        .chars()
        .map(|c| if c == '/' || c == '.' || c == '\\' { '-' } else { c })
        .collect();
    home.join(".claude").join("projects").join(escaped)
}

/// `~/.codex/sessions`, searched recursively for rollout files
pub fn codex_sessions_root(home: &Path) -> PathBuf {
    home.join(".codex").join("sessions")
}

/// `~/.gemini/tmp/<sha256 of worktree path>/chats`
pub fn gemini_chat_dir(home: &Path, worktree: &Path) -> PathBuf {
    let digest = Sha256::digest(worktree.to_string_lossy().as_bytes());
    let hash: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    home.join(".gemini").join("tmp").join(hash).join("chats")
}

pub fn is_claude_log(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "jsonl")
}

pub fn is_codex_rollout(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("rollout-") && n.ends_with(".jsonl"))
}

pub fn is_gemini_session(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("session-") && n.ends_with(".json"))
}

/// Most recently modified file directly inside `dir` accepted by `accept`
pub fn newest_in_dir(dir: &Path, accept: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && accept(path))
        .filter_map(|path| Some((modified(&path)?, path)))
        .max_by_key(|(mtime, _)| *mtime)
        .map(|(_, path)| path)
}

/// Up to `limit` rollout files under the Codex `YYYY/MM/DD` tree, newest first.
///
/// Directories and rollout names both sort by date, so walking in reverse
/// name order reaches recent sessions first and the walk stops at `limit`
/// without visiting older days.
pub fn recent_codex_rollouts(root: &Path, limit: usize) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by(|a, b| b.file_name().cmp(a.file_name()))
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file() && is_codex_rollout(e.path()))
        .take(limit)
        .map(|e| e.into_path())
        .collect()
}

pub fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_dir_escapes_separators_and_dots() {
        let dir = claude_project_dir(Path::new("/home/u"), Path::new("/work/my.repo/wt-a"));
        assert_eq!(dir, PathBuf::from("/home/u/.claude/projects/-work-my-repo-wt-a"));
    }

    #[test]
    fn test_gemini_dir_hashes_path() {
        let dir = gemini_chat_dir(Path::new("/h"), Path::new("/work/repo"));
        let hash = dir.parent().unwrap().file_name().unwrap().to_str().unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(dir, gemini_chat_dir(Path::new("/h"), Path::new("/work/repo")));
        assert_ne!(dir, gemini_chat_dir(Path::new("/h"), Path::new("/work/other")));
    }

    #[test]
    fn test_file_name_filters() {
        assert!(is_codex_rollout(Path::new("/x/rollout-2025-01-01T00-00-00-abc.jsonl")));
        assert!(!is_codex_rollout(Path::new("/x/history.jsonl")));
        assert!(is_gemini_session(Path::new("/x/session-2025.json")));
        assert!(is_claude_log(Path::new("/x/abc.jsonl")));
    }

    #[test]
    fn test_recent_codex_rollouts_stops_at_limit() {
        let home = tempfile::tempdir().unwrap();
        let root = codex_sessions_root(home.path());
        for (day, name) in [
            ("2024/12/31", "rollout-2024-12-31T09-00-00-a.jsonl"),
            ("2025/01/02", "rollout-2025-01-02T08-00-00-b.jsonl"),
            ("2025/01/02", "rollout-2025-01-02T17-30-00-c.jsonl"),
            ("2025/01/10", "rollout-2025-01-10T11-00-00-d.jsonl"),
        ] {
            let dir = root.join(day);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(name), "{}\n").unwrap();
        }
        std::fs::write(root.join("2025/01/10/notes.txt"), "").unwrap();

        let names: Vec<String> = recent_codex_rollouts(&root, 3)
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "rollout-2025-01-10T11-00-00-d.jsonl",
                "rollout-2025-01-02T17-30-00-c.jsonl",
                "rollout-2025-01-02T08-00-00-b.jsonl",
            ]
        );
        assert!(recent_codex_rollouts(&home.path().join("missing"), 5).is_empty());
    }

    #[test]
    fn test_newest_in_dir_missing_dir() {
        assert!(newest_in_dir(Path::new("/definitely/not/here"), |_| true).is_none());
    }
}

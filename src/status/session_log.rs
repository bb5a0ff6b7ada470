use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tracing::debug;

use super::locators;
use super::{AgentKind, LogFormat, Status};
use crate::output::BoundedCache;

/// Newest rollout files inspected per Codex lookup
const CODEX_SCAN_LIMIT: usize = 200;
/// Upper bound on a Codex rollout's first (metadata) line
const CODEX_META_LINE_BYTES: u64 = 64 * 1024;

static RE_GEMINI_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""type"\s*:\s*"(user|gemini|model|assistant)""#).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    User,
    Assistant,
}

impl Role {
    fn status(self) -> Status {
        match self {
            Role::User => Status::Active,
            Role::Assistant => Status::Waiting,
        }
    }
}

#[derive(Debug, Clone)]
struct CwdEntry {
    modified: SystemTime,
    size: u64,
    cwd: Option<String>,
}

/// Classifies agents from their own conversation logs.
///
/// Shared across blocking tasks; both caches sit behind mutexes.
#[derive(Debug)]
pub struct SessionLogReader {
    home: PathBuf,
    tail_bytes: u64,
    /// (search root, worktree) -> resolved log file
    lookups: Mutex<BoundedCache<(PathBuf, PathBuf), PathBuf>>,
    /// rollout file -> cwd recorded in its metadata line
    cwds: Mutex<BoundedCache<PathBuf, CwdEntry>>,
}

impl SessionLogReader {
    pub fn new(home: PathBuf, tail_bytes: u64, lookup_ttl: Duration, capacity: usize) -> Self {
        Self {
            home,
            tail_bytes: tail_bytes.max(1),
            lookups: Mutex::new(BoundedCache::new(capacity, Some(lookup_ttl))),
            cwds: Mutex::new(BoundedCache::new(capacity, None)),
        }
    }

    /// Status from the agent's log, or None when there is no usable log
    pub fn classify(&self, kind: AgentKind, worktree: &Path) -> Option<Status> {
        let format = kind.profile().log_format?;
        let path = self.locate(format, worktree)?;
        let tail = match read_tail(&path, self.tail_bytes) {
            Ok(tail) => tail,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "session log unreadable");
                return None;
            }
        };
        let role = match format {
            LogFormat::ClaudeJsonl => last_jsonl_role(&tail, claude_role),
            LogFormat::CodexJsonl => last_jsonl_role(&tail, codex_role),
            LogFormat::GeminiJson => gemini_last_role(&tail),
        };
        if role.is_none() {
            debug!(path = %path.display(), "no conversation turn in session log tail");
        }
        role.map(Role::status)
    }

    fn search_root(&self, format: LogFormat, worktree: &Path) -> PathBuf {
        match format {
            LogFormat::ClaudeJsonl => locators::claude_project_dir(&self.home, worktree),
            LogFormat::CodexJsonl => locators::codex_sessions_root(&self.home),
            LogFormat::GeminiJson => locators::gemini_chat_dir(&self.home, worktree),
        }
    }

    fn locate(&self, format: LogFormat, worktree: &Path) -> Option<PathBuf> {
        let root = self.search_root(format, worktree);
        let key = (root.clone(), worktree.to_path_buf());
        {
            let mut lookups = lock(&self.lookups);
            if let Some(path) = lookups.get(&key) {
                if path.exists() {
                    return Some(path);
                }
                lookups.remove(&key);
            }
        }

        let found = match format {
            LogFormat::ClaudeJsonl => locators::newest_in_dir(&root, locators::is_claude_log),
            LogFormat::GeminiJson => locators::newest_in_dir(&root, locators::is_gemini_session),
            LogFormat::CodexJsonl => self.find_codex_rollout(&root, worktree),
        }?;
        lock(&self.lookups).insert(key, found.clone());
        Some(found)
    }

    fn find_codex_rollout(&self, root: &Path, worktree: &Path) -> Option<PathBuf> {
        let mut rollouts: Vec<(SystemTime, PathBuf)> =
            locators::recent_codex_rollouts(root, CODEX_SCAN_LIMIT)
                .into_iter()
                .filter_map(|path| Some((locators::modified(&path)?, path)))
                .collect();
        rollouts.sort_by(|a, b| b.0.cmp(&a.0));

        let wanted = worktree.to_string_lossy();
        rollouts
            .into_iter()
            .map(|(_, path)| path)
            .find(|path| self.codex_cwd(path).as_deref() == Some(wanted.as_ref()))
    }

    /// Working directory recorded in a rollout, cached per (mtime, size)
    fn codex_cwd(&self, path: &Path) -> Option<String> {
        let meta = std::fs::metadata(path).ok()?;
        let modified = meta.modified().ok()?;
        let size = meta.len();

        let key = path.to_path_buf();
        if let Some(entry) = lock(&self.cwds).get(&key) {
            if entry.modified == modified && entry.size == size {
                return entry.cwd;
            }
        }

        let cwd = read_codex_cwd(path);
        lock(&self.cwds).insert(key, CwdEntry { modified, size, cwd: cwd.clone() });
        cwd
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Read at most `max_bytes` from the end of a file.
///
/// When the read starts mid-file the leading partial line is dropped.
pub fn read_tail(path: &Path, max_bytes: u64) -> io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start))?;

    let mut buf = Vec::with_capacity((len - start) as usize);
    file.take(max_bytes).read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);

    if start == 0 {
        return Ok(text.into_owned());
    }
    Ok(match text.find('\n') {
        Some(idx) => text[idx + 1..].to_string(),
        None => String::new(),
    })
}

fn read_codex_cwd(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut first = String::new();
    BufReader::new(file.take(CODEX_META_LINE_BYTES))
        .read_line(&mut first)
        .ok()?;
    let value: Value = serde_json::from_str(first.trim()).ok()?;
    if value["type"] != "session_meta" {
        return None;
    }
    value["payload"]["cwd"].as_str().map(str::to_string)
}

fn last_jsonl_role(tail: &str, role_of: fn(&Value) -> Option<Role>) -> Option<Role> {
    tail.lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .find_map(|value| role_of(&value))
}

fn claude_role(value: &Value) -> Option<Role> {
    if value["isSidechain"].as_bool() == Some(true) {
        return None;
    }
    match value["type"].as_str()? {
        "assistant" => Some(Role::Assistant),
        "user" => Some(Role::User),
        _ => None,
    }
}

fn codex_role(value: &Value) -> Option<Role> {
    let payload = &value["payload"];
    match (value["type"].as_str()?, payload["type"].as_str()?) {
        ("response_item", "message") => match payload["role"].as_str()? {
            "assistant" => Some(Role::Assistant),
            "user" => Some(Role::User),
            _ => None,
        },
        ("event_msg", "agent_message") => Some(Role::Assistant),
        ("event_msg", "user_message") => Some(Role::User),
        _ => None,
    }
}

fn gemini_last_role(tail: &str) -> Option<Role> {
    let caps = RE_GEMINI_TYPE.captures_iter(tail).last()?;
    match &caps[1] {
        "user" => Some(Role::User),
        _ => Some(Role::Assistant),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn reader(home: &Path) -> SessionLogReader {
        SessionLogReader::new(home.to_path_buf(), 2 * 1024 * 1024, Duration::from_secs(3), 16)
    }

    fn write_file(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_claude_last_assistant_is_waiting() {
        let home = tempfile::tempdir().unwrap();
        let worktree = Path::new("/work/repo-wt");
        let log = locators::claude_project_dir(home.path(), worktree).join("abc.jsonl");
        write_file(
            &log,
            "{\"type\":\"user\",\"message\":{\"role\":\"user\"}}\n\
             {\"type\":\"assistant\",\"message\":{\"role\":\"assistant\"}}\n\
             {\"type\":\"summary\",\"summary\":\"x\"}\n",
        );
        assert_eq!(reader(home.path()).classify(AgentKind::Claude, worktree), Some(Status::Waiting));
    }

    #[test]
    fn test_claude_last_user_is_active() {
        let home = tempfile::tempdir().unwrap();
        let worktree = Path::new("/work/repo");
        let log = locators::claude_project_dir(home.path(), worktree).join("abc.jsonl");
        write_file(
            &log,
            "{\"type\":\"assistant\"}\n{\"type\":\"user\"}\n{\"type\":\"assistant\",\"isSidechain\":true}\n",
        );
        assert_eq!(reader(home.path()).classify(AgentKind::Claude, worktree), Some(Status::Active));
    }

    #[test]
    fn test_missing_or_garbage_log_is_not_ok() {
        let home = tempfile::tempdir().unwrap();
        let worktree = Path::new("/work/none");
        let reader = reader(home.path());
        assert_eq!(reader.classify(AgentKind::Claude, worktree), None);
        assert_eq!(reader.classify(AgentKind::Shell, worktree), None);

        let log = locators::claude_project_dir(home.path(), worktree).join("x.jsonl");
        write_file(&log, "not json\n{also not\n");
        assert_eq!(reader.classify(AgentKind::Claude, worktree), None);
    }

    #[test]
    fn test_codex_matches_rollout_by_cwd() {
        let home = tempfile::tempdir().unwrap();
        let day = locators::codex_sessions_root(home.path()).join("2025/06/01");
        write_file(
            &day.join("rollout-a.jsonl"),
            "{\"type\":\"session_meta\",\"payload\":{\"cwd\":\"/work/other\"}}\n\
             {\"type\":\"event_msg\",\"payload\":{\"type\":\"user_message\"}}\n",
        );
        write_file(
            &day.join("rollout-b.jsonl"),
            "{\"type\":\"session_meta\",\"payload\":{\"cwd\":\"/work/mine\"}}\n\
             {\"type\":\"response_item\",\"payload\":{\"type\":\"message\",\"role\":\"user\"}}\n\
             {\"type\":\"response_item\",\"payload\":{\"type\":\"message\",\"role\":\"assistant\"}}\n\
             {\"type\":\"response_item\",\"payload\":{\"type\":\"reasoning\"}}\n",
        );
        let reader = reader(home.path());
        assert_eq!(
            reader.classify(AgentKind::Codex, Path::new("/work/mine")),
            Some(Status::Waiting)
        );
        assert_eq!(
            reader.classify(AgentKind::Codex, Path::new("/work/other")),
            Some(Status::Active)
        );
        assert_eq!(reader.classify(AgentKind::Codex, Path::new("/work/absent")), None);
    }

    #[test]
    fn test_gemini_document_last_type() {
        let home = tempfile::tempdir().unwrap();
        let worktree = Path::new("/work/g");
        let chat = locators::gemini_chat_dir(home.path(), worktree).join("session-1.json");
        write_file(
            &chat,
            r#"{"sessionId":"s","messages":[{"type":"user","content":"hi"},{"type":"gemini","content":"hello"}]}"#,
        );
        assert_eq!(reader(home.path()).classify(AgentKind::Gemini, worktree), Some(Status::Waiting));
    }

    #[test]
    fn test_cached_lookup_invalidates_when_file_disappears() {
        let home = tempfile::tempdir().unwrap();
        let worktree = Path::new("/work/gone");
        let log = locators::claude_project_dir(home.path(), worktree).join("a.jsonl");
        write_file(&log, "{\"type\":\"user\"}\n");
        let reader = reader(home.path());
        assert_eq!(reader.classify(AgentKind::Claude, worktree), Some(Status::Active));
        std::fs::remove_file(&log).unwrap();
        assert_eq!(reader.classify(AgentKind::Claude, worktree), None);
    }

    #[test]
    fn test_read_tail_drops_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.jsonl");
        let mut file = File::create(&path).unwrap();
        for _ in 0..100 {
            writeln!(file, "{{\"type\":\"user\",\"pad\":\"xxxxxxxxxxxxxxxxxxxx\"}}").unwrap();
        }
        writeln!(file, "{{\"type\":\"assistant\"}}").unwrap();
        drop(file);

        let tail = read_tail(&path, 100).unwrap();
        assert!(tail.len() <= 100);
        assert!(tail.lines().all(|l| l.starts_with('{')));
        assert_eq!(last_jsonl_role(&tail, claude_role), Some(Role::Assistant));
    }

    #[test]
    fn test_read_tail_small_file_is_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::write(&path, "a\nb\n").unwrap();
        assert_eq!(read_tail(&path, 1024).unwrap(), "a\nb\n");
    }
}

mod lock;
mod watcher;

pub use lock::{lock_path_for, FileLock};
pub use watcher::ManifestWatcher;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::ManifestError;
use crate::status::AgentKind;

pub const MANIFEST_VERSION: u32 = 1;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One hosted shell or agent session, keyed by its tmux session name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellDefinition {
    pub tmux_name: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub agent_type: AgentKind,
    #[serde(default, rename = "skipPerms", skip_serializing_if = "std::ops::Not::not")]
    pub skip_perms: bool,
}

impl ShellDefinition {
    pub fn new(tmux_name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            tmux_name: tmux_name.into(),
            display_name: display_name.into(),
            created_at: Utc::now(),
            agent_type: AgentKind::Shell,
            skip_perms: false,
        }
    }

    pub fn with_agent(mut self, agent: AgentKind, skip_perms: bool) -> Self {
        self.agent_type = agent;
        self.skip_perms = skip_perms;
        self
    }
}

/// On-disk manifest document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestData {
    pub version: u32,
    #[serde(default)]
    pub shells: Vec<ShellDefinition>,
}

impl Default for ManifestData {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            shells: Vec::new(),
        }
    }
}

impl ManifestData {
    /// Insert or replace by tmux name
    fn upsert(&mut self, def: ShellDefinition) {
        match self.shells.iter_mut().find(|s| s.tmux_name == def.tmux_name) {
            Some(existing) => *existing = def,
            None => self.shells.push(def),
        }
    }
}

/// Lock timing for manifest access
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub timeout: Duration,
    pub retry: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            retry: Duration::from_millis(50),
        }
    }
}

/// The durable list of hosted shells shared by every dashboard instance on a project.
///
/// Every mutation is a locked read-modify-write of the file, so concurrent
/// writers in other processes are never lost.
#[derive(Debug)]
pub struct ShellManifest {
    path: PathBuf,
    lock_path: PathBuf,
    options: LockOptions,
    data: ManifestData,
}

impl ShellManifest {
    /// Load the manifest; a missing or corrupt file gives an empty one
    pub fn load(path: impl Into<PathBuf>, options: LockOptions) -> Self {
        let path = path.into();
        let mut manifest = Self {
            lock_path: lock_path_for(&path),
            path,
            options,
            data: ManifestData::default(),
        };
        manifest.reload();
        manifest
    }

    /// Re-read from disk under a shared lock
    pub fn reload(&mut self) {
        let _guard = match FileLock::acquire(
            &self.lock_path,
            false,
            self.options.timeout,
            self.options.retry,
        ) {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "reading manifest without lock");
                None
            }
        };
        self.data = read_file(&self.path);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shells(&self) -> &[ShellDefinition] {
        &self.data.shells
    }

    pub fn get(&self, tmux_name: &str) -> Option<&ShellDefinition> {
        self.data.shells.iter().find(|s| s.tmux_name == tmux_name)
    }

    pub fn len(&self) -> usize {
        self.data.shells.len()
    }

    pub fn add_shell(&mut self, def: ShellDefinition) -> Result<(), ManifestError> {
        info!(tmux_name = %def.tmux_name, "adding shell to manifest");
        self.transact(|data| data.upsert(def))
    }

    /// Same upsert semantics as `add_shell`
    pub fn update_shell(&mut self, def: ShellDefinition) -> Result<(), ManifestError> {
        self.transact(|data| data.upsert(def))
    }

    /// Removing an absent name is a no-op
    pub fn remove_shell(&mut self, tmux_name: &str) -> Result<(), ManifestError> {
        self.transact(|data| data.shells.retain(|s| s.tmux_name != tmux_name))
    }

    /// Write the in-memory state, replacing whatever is on disk
    pub fn save(&mut self) -> Result<(), ManifestError> {
        let data = self.data.clone();
        self.transact(move |disk| *disk = data)
    }

    fn transact(&mut self, apply: impl FnOnce(&mut ManifestData)) -> Result<(), ManifestError> {
        let _guard = FileLock::acquire(
            &self.lock_path,
            true,
            self.options.timeout,
            self.options.retry,
        )?;

        let mut data = read_file(&self.path);
        apply(&mut data);
        data.version = MANIFEST_VERSION;
        write_atomic(&self.path, &data)?;
        self.data = data;
        Ok(())
    }
}

fn read_file(path: &Path) -> ManifestData {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "manifest unreadable, treating as empty");
            }
            return ManifestData::default();
        }
    };
    if raw.trim().is_empty() {
        return ManifestData::default();
    }
    match serde_json::from_str(&raw) {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "manifest corrupt, treating as empty");
            ManifestData::default()
        }
    }
}

/// Write to a temp file in the same directory, then rename over the target
fn write_atomic(path: &Path, data: &ManifestData) -> Result<(), ManifestError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let tmp = dir.join(format!(
        ".{}.tmp-{}-{}",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let json = serde_json::to_vec_pretty(data)?;
    let result = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    debug!(path = %path.display(), shells = data.shells.len(), "manifest written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> LockOptions {
        LockOptions {
            timeout: Duration::from_secs(5),
            retry: Duration::from_millis(5),
        }
    }

    fn manifest_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join(".agent-deck").join("shells.json")
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = ShellManifest::load(manifest_path(&dir), options());
        assert_eq!(manifest.len(), 0);
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = manifest_path(&dir);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{\"version\": 1, \"shells\": [tru").unwrap();
        let manifest = ShellManifest::load(&path, options());
        assert_eq!(manifest.len(), 0);
    }

    #[test]
    fn test_add_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = manifest_path(&dir);
        let def = ShellDefinition::new("proj-sh-1", "build shell").with_agent(AgentKind::Claude, true);

        let mut manifest = ShellManifest::load(&path, options());
        manifest.add_shell(def.clone()).unwrap();

        let reloaded = ShellManifest::load(&path, options());
        assert_eq!(reloaded.shells(), &[def]);
    }

    #[test]
    fn test_add_existing_name_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = ShellManifest::load(manifest_path(&dir), options());
        manifest.add_shell(ShellDefinition::new("a", "first")).unwrap();
        manifest.add_shell(ShellDefinition::new("b", "second")).unwrap();
        manifest.add_shell(ShellDefinition::new("a", "renamed")).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.get("a").unwrap().display_name, "renamed");
        assert_eq!(manifest.shells()[0].tmux_name, "a");
    }

    #[test]
    fn test_update_missing_inserts_and_remove_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = ShellManifest::load(manifest_path(&dir), options());
        manifest.update_shell(ShellDefinition::new("x", "x")).unwrap();
        assert_eq!(manifest.len(), 1);
        manifest.remove_shell("nope").unwrap();
        assert_eq!(manifest.len(), 1);
        manifest.remove_shell("x").unwrap();
        assert_eq!(manifest.len(), 0);
    }

    #[test]
    fn test_save_creates_file_and_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = manifest_path(&dir);
        let mut manifest = ShellManifest::load(&path, options());
        manifest.save().unwrap();

        assert!(path.exists());
        assert!(lock_path_for(&path).exists());
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], MANIFEST_VERSION);
        assert_eq!(raw["shells"], serde_json::json!([]));
    }

    #[test]
    fn test_mutation_merges_other_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = manifest_path(&dir);
        let mut first = ShellManifest::load(&path, options());
        let mut second = ShellManifest::load(&path, options());
        first.add_shell(ShellDefinition::new("one", "1")).unwrap();
        second.add_shell(ShellDefinition::new("two", "2")).unwrap();
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = manifest_path(&dir);
        let writers = 8;

        let handles: Vec<_> = (0..writers)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let mut manifest = ShellManifest::load(&path, options());
                    manifest
                        .add_shell(ShellDefinition::new(format!("sh-{i}"), format!("shell {i}")))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let manifest = ShellManifest::load(&path, options());
        assert_eq!(manifest.len(), writers);
        let mut names: Vec<_> = manifest.shells().iter().map(|s| s.tmux_name.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), writers);
    }

    #[test]
    fn test_write_blocked_by_held_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = manifest_path(&dir);
        let held = FileLock::acquire(&lock_path_for(&path), true, Duration::from_secs(1), Duration::from_millis(5))
            .unwrap();
        let mut manifest = ShellManifest::load(
            &path,
            LockOptions {
                timeout: Duration::from_millis(50),
                retry: Duration::from_millis(5),
            },
        );
        let err = manifest.add_shell(ShellDefinition::new("a", "a")).unwrap_err();
        assert!(matches!(err, ManifestError::Lock(_)));
        drop(held);
        assert!(manifest.add_shell(ShellDefinition::new("a", "a")).is_ok());
    }

    #[test]
    fn test_json_shape() {
        let def = ShellDefinition::new("t", "d");
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["tmuxName"], "t");
        assert_eq!(json["displayName"], "d");
        assert_eq!(json["agentType"], "shell");
        assert!(json.get("skipPerms").is_none());

        let parsed: ShellDefinition =
            serde_json::from_str(r#"{"tmuxName":"x","displayName":"y","createdAt":"2025-01-01T00:00:00Z"}"#)
                .unwrap();
        assert_eq!(parsed.agent_type, AgentKind::Shell);
        assert!(!parsed.skip_perms);
    }
}

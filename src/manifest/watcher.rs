use anyhow::{Context, Result};
use notify::event::{EventKind, ModifyKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Notices when another process rewrites the manifest.
///
/// Watches the parent directory so a manifest created after startup is
/// seen too. Bursts of events are coalesced into one callback. Dropping
/// the watcher stops it.
pub struct ManifestWatcher {
    _watcher: RecommendedWatcher,
    debounce_task: JoinHandle<()>,
}

impl ManifestWatcher {
    /// Must be called from within a tokio runtime
    pub fn spawn<F>(manifest_path: &Path, debounce: Duration, on_change: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let dir = manifest_path
            .parent()
            .context("manifest path has no parent directory")?
            .to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating {}", dir.display()))?;
        let file_name: OsString = manifest_path
            .file_name()
            .context("manifest path has no file name")?
            .to_os_string();

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_relevant(&event, &file_name) {
                    let _ = raw_tx.send(());
                }
            }
            Err(e) => warn!(error = %e, "manifest watch error"),
        })
        .context("creating manifest watcher")?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {}", dir.display()))?;

        let debounce_task = tokio::spawn(async move {
            while raw_rx.recv().await.is_some() {
                tokio::time::sleep(debounce).await;
                while raw_rx.try_recv().is_ok() {}
                debug!("manifest changed on disk");
                on_change();
            }
        });

        Ok(Self {
            _watcher: watcher,
            debounce_task,
        })
    }
}

impl Drop for ManifestWatcher {
    fn drop(&mut self) {
        self.debounce_task.abort();
    }
}

fn is_relevant(event: &Event, file_name: &OsString) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
    );
    kind_matches
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some_and(|n| n == file_name.as_os_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{LockOptions, ShellDefinition, ShellManifest};
    use notify::event::{CreateKind, RenameMode};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_is_relevant_matches_exact_name_only() {
        let name = OsString::from("shells.json");
        let event = |kind, path: &str| Event::new(kind).add_path(PathBuf::from(path));

        assert!(is_relevant(
            &event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), "/p/shells.json"),
            &name
        ));
        assert!(is_relevant(&event(EventKind::Create(CreateKind::File), "/p/shells.json"), &name));
        assert!(!is_relevant(
            &event(EventKind::Create(CreateKind::File), "/p/shells.json.lock"),
            &name
        ));
        assert!(!is_relevant(
            &event(EventKind::Create(CreateKind::File), "/p/.shells.json.tmp-1-0"),
            &name
        ));
        assert!(!is_relevant(
            &event(EventKind::Access(notify::event::AccessKind::Any), "/p/shells.json"),
            &name
        ));
    }

    #[tokio::test]
    async fn test_atomic_save_notifies_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".agent-deck").join("shells.json");
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let _watcher = ManifestWatcher::spawn(&path, Duration::from_millis(100), move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let mut manifest = ShellManifest::load(&path, LockOptions::default());
        manifest.add_shell(ShellDefinition::new("a", "a")).unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shells.json");
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let _watcher = ManifestWatcher::spawn(&path, Duration::from_millis(50), move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        std::fs::write(dir.path().join("other.json"), "{}").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}

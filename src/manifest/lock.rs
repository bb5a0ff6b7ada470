use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::LockError;

/// Advisory cross-process lock held on a sibling `.lock` file.
///
/// Released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Poll for the lock every `retry` until `timeout` elapses
    pub fn acquire(
        path: &Path,
        exclusive: bool,
        timeout: Duration,
        retry: Duration,
    ) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let deadline = Instant::now() + timeout;
        loop {
            let attempt = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match attempt {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {}
                Err(e) => return Err(LockError::Io(e)),
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(path = %path.display(), exclusive, "lock acquisition timed out");
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    timeout,
                });
            }
            std::thread::sleep(retry.min(deadline - now));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// `<path>.lock`
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

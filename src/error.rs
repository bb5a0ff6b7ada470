use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to take the manifest's advisory lock
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {timeout:?} waiting for lock on {path}")]
    Timeout { path: PathBuf, timeout: Duration },
    #[error("lock io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by manifest mutations.
///
/// Reads never fail: a missing or corrupt manifest loads as empty.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("manifest io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("nothing to copy")]
    NothingToCopy,
    #[error("clipboard error: {0}")]
    Clipboard(String),
}

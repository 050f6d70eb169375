use std::path::PathBuf;

use thiserror::Error;

use todosync_sync::SyncError;

/// Errors from the daemon runtime and from talking to it.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A fatal cycle error; the daemon stops with it.
    #[error("sync stopped: {0}")]
    Sync(#[from] SyncError),

    /// A requested cycle ran and failed; the daemon keeps running.
    #[error("cycle failed: {0}")]
    CycleFailed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    /// The daemon answered a request with an error.
    #[error("daemon refused the request: {0}")]
    Rejected(String),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("{task} task failed: {message}")]
    Task { task: &'static str, message: String },

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    #[error("another daemon is already listening on {socket}")]
    AlreadyRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

//! Error types for todosync-sync.

use std::path::PathBuf;

use thiserror::Error;

use todosync_core::{ConfigError, FileName};

/// All errors that can abort a reconciliation cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from loading or validating settings.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The git repository could not be opened.
    #[error("cannot open repository {path}: {source}")]
    Repository {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    /// A git operation on an open repository failed.
    #[error("git {op} failed: {source}")]
    Git {
        op: &'static str,
        #[source]
        source: git2::Error,
    },

    /// A file named in a change set is not present under the repository root.
    #[error("cannot stage {path}: file does not exist")]
    MissingStagedFile { path: PathBuf },

    /// The remote listing returned nothing for the tracked names.
    #[error("no remote objects found for {}", join_names(.names))]
    NoRemoteObjects { names: Vec<FileName> },

    /// A remote object disappeared between listing and use.
    #[error("remote object '{name}' not found")]
    RemoteObjectMissing { name: FileName },

    /// A remote store call failed.
    #[error("remote {op} failed for {target}: {source}")]
    Remote {
        op: &'static str,
        target: String,
        retryable: bool,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abort the current cycle only; the next tick retries from scratch.
    Retryable,
    /// The setup itself is broken; retrying cannot succeed.
    Fatal,
}

impl SyncError {
    pub fn severity(&self) -> Severity {
        match self {
            SyncError::Config(_)
            | SyncError::Repository { .. }
            | SyncError::NoRemoteObjects { .. } => Severity::Fatal,
            SyncError::Remote { retryable, .. } if !retryable => Severity::Fatal,
            SyncError::Remote { .. }
            | SyncError::Io { .. }
            | SyncError::Git { .. }
            | SyncError::MissingStagedFile { .. }
            | SyncError::RemoteObjectMissing { .. } => Severity::Retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.severity() == Severity::Retryable
    }
}

fn join_names(names: &[FileName]) -> String {
    names
        .iter()
        .map(FileName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SyncError::Git`].
pub(crate) fn git_err(op: &'static str) -> impl FnOnce(git2::Error) -> SyncError {
    move |source| SyncError::Git { op, source }
}

use std::path::PathBuf;

use thiserror::Error;

use todosync_sync::SyncError;

/// Error surface for Drive HTTP calls and OAuth credential handling.
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("{op} returned HTTP {status}: {body}")]
    Status {
        op: &'static str,
        status: u16,
        body: String,
    },

    #[error("{op} transport error: {message}")]
    Transport { op: &'static str, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("unexpected response from {op}: {message}")]
    Response { op: &'static str, message: String },
}

impl DriveError {
    /// Whether the same call may succeed on a later cycle.
    ///
    /// 404 counts as retryable: an object that vanished between listing and
    /// use is a cycle-level data error, not a broken setup.
    pub fn is_retryable(&self) -> bool {
        match self {
            DriveError::Status { status, .. } => {
                *status == 404 || *status == 408 || *status == 429 || *status >= 500
            }
            DriveError::Transport { .. } => true,
            DriveError::Io { .. } => true,
            DriveError::Json { .. }
            | DriveError::Credentials(_)
            | DriveError::Response { .. } => false,
        }
    }

    /// Wrap into the sync error surface, naming the operation and target file.
    pub fn into_sync(self, op: &'static str, target: impl Into<String>) -> SyncError {
        SyncError::Remote {
            op,
            target: target.into(),
            retryable: self.is_retryable(),
            source: Box::new(self),
        }
    }

    /// Classify a failed `ureq` call.
    pub(crate) fn from_ureq(op: &'static str, err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => DriveError::Status {
                op,
                status,
                body: response.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(transport) => DriveError::Transport {
                op,
                message: transport.to_string(),
            },
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DriveError {
    DriveError::Io {
        path: path.into(),
        source,
    }
}

//! Control-socket wire types and the blocking client the CLI uses.
//!
//! One JSON object per line in each direction. Requests are
//! `{"cmd": "status" | "sync" | "stop"}`; every response is a
//! [`DaemonResponse`] envelope whose `data` decodes into [`DaemonStatus`],
//! [`CycleSummary`] or [`Stopping`] depending on the command.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use todosync_core::{CycleReport, FileName};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum DaemonRequest {
    Status,
    /// Run a cycle now and answer once it has finished.
    Sync,
    Stop,
}

/// Result of one cycle as reported to whoever requested it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    /// `timer` or `socket`.
    pub source: String,
    pub changed: usize,
    pub snapshots: usize,
    pub duration_ms: u64,
    pub report: CycleReport,
}

/// Counters and last results kept across cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonState {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_report: Option<CycleReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Answer to `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub interval_secs: u64,
    pub repository: PathBuf,
    pub local_dir: PathBuf,
    pub tracked_files: Vec<FileName>,
    pub socket: PathBuf,
    pub state: DaemonState,
}

/// Answer to `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stopping {
    pub stopping: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: &impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                ok: true,
                data: Some(value),
                error: None,
            },
            Err(err) => Self::error(format!("cannot encode response: {err}")),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Decode `data` as `T`, or turn a refusal into [`DaemonError::Rejected`].
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, DaemonError> {
        if !self.ok {
            return Err(DaemonError::Rejected(
                self.error
                    .unwrap_or_else(|| "unknown daemon error".to_string()),
            ));
        }
        let data = self.data.unwrap_or(Value::Null);
        Ok(serde_json::from_value(data)?)
    }
}

/// Send one request to the daemon socket and read one response line.
pub fn send_request(home: &Path, request: DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound
        | std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset => DaemonError::DaemonNotRunning {
            socket: socket.clone(),
        },
        _ => io_err(&socket, err),
    })?;

    let mut payload = serde_json::to_string(&request)?;
    payload.push('\n');
    stream
        .write_all(payload.as_bytes())
        .and_then(|()| stream.flush())
        .map_err(|e| io_err(&socket, e))?;

    let mut line = String::new();
    let read = BufReader::new(stream)
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(format!(
            "daemon closed the connection before answering {request:?}"
        )));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Query the running daemon, allowing a freshly started one a moment to bind.
pub fn request_status(home: &Path) -> Result<DaemonStatus, DaemonError> {
    const ATTEMPTS: u32 = 5;

    let mut attempt = 1;
    loop {
        match send_request(home, DaemonRequest::Status) {
            Ok(response) => return response.into_data(),
            Err(DaemonError::DaemonNotRunning { .. }) if attempt < ATTEMPTS => {
                attempt += 1;
                sleep(Duration::from_millis(100));
            }
            Err(err) => return Err(err),
        }
    }
}

pub fn request_stop(home: &Path) -> Result<Stopping, DaemonError> {
    send_request(home, DaemonRequest::Stop)?.into_data()
}

/// Ask the daemon to run a cycle now; returns once that cycle has finished.
pub fn request_sync(home: &Path) -> Result<CycleSummary, DaemonError> {
    send_request(home, DaemonRequest::Sync)?.into_data()
}

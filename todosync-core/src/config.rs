//! YAML settings file.
//!
//! # Storage layout
//!
//! ```text
//! ~/.todosync/
//!   config.yaml        (mode 0600)
//!   credentials.json   (OAuth client secret, default location)
//!   token.json         (OAuth token, default location)
//! ```
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::FileName;

pub const DEFAULT_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const DEFAULT_TRACKED_FILES: [&str; 2] = ["done.txt", "todo.txt"];

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Commit author identity stamped on every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Default for Author {
    fn default() -> Self {
        Self {
            name: "ToDo Sync".to_string(),
            email: "todosync@unclebear.ru".to_string(),
        }
    }
}

/// Process configuration for the sync daemon and CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the git working tree holding the last known content.
    pub repository: PathBuf,
    /// Local working directory edited by hand.
    pub local_dir: PathBuf,
    #[serde(default = "default_tracked_files")]
    pub tracked_files: Vec<FileName>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub author: Author,
    /// OAuth client secret; defaults to `~/.todosync/credentials.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<PathBuf>,
    /// Cached OAuth token; defaults to `~/.todosync/token.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<PathBuf>,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_tracked_files() -> Vec<FileName> {
    DEFAULT_TRACKED_FILES
        .iter()
        .map(|name| FileName::from(*name))
        .collect()
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

impl Settings {
    /// Settings with every optional field at its default.
    pub fn new(repository: PathBuf, local_dir: PathBuf) -> Self {
        Self {
            repository,
            local_dir,
            tracked_files: default_tracked_files(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            author: Author::default(),
            credentials: None,
            token: None,
            scope: default_scope(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Credentials path, resolved against `home` when not configured.
    pub fn credentials_path_at(&self, home: &Path) -> PathBuf {
        self.credentials
            .clone()
            .unwrap_or_else(|| root_at(home).join("credentials.json"))
    }

    /// Token path, resolved against `home` when not configured.
    pub fn token_path_at(&self, home: &Path) -> PathBuf {
        self.token
            .clone()
            .unwrap_or_else(|| root_at(home).join("token.json"))
    }

    /// Reject settings the reconciliation cycle cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tracked_files.is_empty() {
            return Err(ConfigError::Invalid(
                "tracked_files must name at least one file".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for name in &self.tracked_files {
            let raw = name.as_str();
            if raw.is_empty() || raw == "." || raw == ".." || raw.contains(['/', '\\']) {
                return Err(ConfigError::Invalid(format!(
                    "tracked file '{raw}' must be a plain file name"
                )));
            }
            if !seen.insert(raw) {
                return Err(ConfigError::Invalid(format!(
                    "tracked file '{raw}' is listed twice"
                )));
            }
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.todosync/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".todosync")
}

/// `<home>/.todosync/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load and validate settings from `<home>/.todosync/config.yaml`.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Settings, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let settings: Settings =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    settings.validate()?;
    Ok(settings)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, ConfigError> {
    load_at(&home()?)
}

/// Atomically save settings to `<home>/.todosync/config.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, settings: &Settings) -> Result<PathBuf, ConfigError> {
    settings.validate()?;
    let dir = root_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(settings)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(settings: &Settings) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, settings)
}

/// The user's home directory.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

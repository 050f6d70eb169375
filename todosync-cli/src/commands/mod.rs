pub mod auth;
pub mod daemon;
pub mod init;
pub mod status;
pub mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};

use todosync_core::{config, Settings};
use todosync_drive::DriveStore;

/// Home directory plus the validated settings file under it.
pub(crate) fn load_settings() -> Result<(PathBuf, Settings)> {
    let home = config::home().context("could not determine home directory")?;
    let settings = config::load_at(&home).context("failed to load settings")?;
    Ok((home, settings))
}

/// Drive client authorized with the configured credentials and token.
pub(crate) fn drive_store(home: &std::path::Path, settings: &Settings) -> Result<DriveStore> {
    DriveStore::from_settings_at(settings, home).with_context(|| {
        format!(
            "failed to set up Google Drive access (credentials: {}, token: {})",
            settings.credentials_path_at(home).display(),
            settings.token_path_at(home).display()
        )
    })
}

//! `todosync init --repository <path> --local-dir <path>`

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use todosync_core::config::{self, DEFAULT_INTERVAL_SECS};
use todosync_core::{FileName, Settings};

/// Write the settings file.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Git working tree that records every propagated change.
    #[arg(long, env = "TODOSYNC_REPOSITORY")]
    pub repository: PathBuf,

    /// Directory holding the working copies you edit.
    #[arg(long, env = "TODOSYNC_LOCAL_DIR")]
    pub local_dir: PathBuf,

    /// Seconds between daemon cycles.
    #[arg(long, env = "TODOSYNC_INTERVAL_SECS", default_value_t = DEFAULT_INTERVAL_SECS)]
    pub interval: u64,

    /// Tracked file name; repeat to replace the default done.txt / todo.txt pair.
    #[arg(long = "track", value_name = "NAME")]
    pub track: Vec<String>,

    /// Overwrite an existing settings file.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = config::home().context("could not determine home directory")?;
        self.run_at(&home)
    }

    fn run_at(self, home: &Path) -> Result<()> {
        let path = config::config_path_at(home);
        if path.exists() && !self.force {
            bail!(
                "settings already exist at {}; pass --force to overwrite",
                path.display()
            );
        }

        let repository = resolve_dir(&self.repository, "repository")?;
        let local_dir = resolve_dir(&self.local_dir, "local directory")?;
        if !repository.join(".git").exists() {
            eprintln!(
                "{} {} does not look like a git working tree; snapshots will fail until it is one",
                "warning:".yellow().bold(),
                repository.display()
            );
        }

        let mut settings = Settings::new(repository, local_dir);
        settings.interval_secs = self.interval;
        if !self.track.is_empty() {
            settings.tracked_files = self.track.into_iter().map(FileName::from).collect();
        }

        let saved = config::save_at(home, &settings)
            .with_context(|| format!("failed to write {}", path.display()))?;

        println!("✓ Wrote {}", saved.display());
        println!(
            "  Tracking: {}",
            settings
                .tracked_files
                .iter()
                .map(FileName::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!(
            "  Next: place the OAuth client secret at {} and run `todosync auth`",
            settings.credentials_path_at(home).display()
        );
        Ok(())
    }
}

fn resolve_dir(path: &Path, what: &str) -> Result<PathBuf> {
    let resolved = path
        .canonicalize()
        .with_context(|| format!("cannot resolve {what} '{}'", path.display()))?;
    if !resolved.is_dir() {
        bail!("{what} '{}' is not a directory", resolved.display());
    }
    Ok(resolved)
}

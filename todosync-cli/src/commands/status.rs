//! `todosync status`: fingerprint every tracked file in each replica.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use todosync_core::{Fingerprint, TrackedFile};
use todosync_sync::{pipeline, RemoteStore};

/// Arguments for `todosync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Skip Google Drive; compare the repository and local directory only.
    #[arg(long)]
    pub local_only: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let (home, settings) = super::load_settings()?;

        let files = if self.local_only {
            pipeline::observe(&settings, None)
        } else {
            let store = super::drive_store(&home, &settings)?;
            pipeline::observe(&settings, Some(&store as &dyn RemoteStore))
        }
        .context("failed to fingerprint replicas")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&files).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_table(&files);
        Ok(())
    }
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "file")]
    file: String,
    #[tabled(rename = "remote")]
    remote: String,
    #[tabled(rename = "repository")]
    repository: String,
    #[tabled(rename = "local")]
    local: String,
    #[tabled(rename = "state")]
    state: &'static str,
}

impl From<&TrackedFile> for StatusTableRow {
    fn from(file: &TrackedFile) -> Self {
        StatusTableRow {
            file: file.name.to_string(),
            remote: file.remote.as_ref().map(short).unwrap_or_else(|| "-".into()),
            repository: short(&file.repository),
            local: short(&file.local),
            state: if file.is_converged() { "in sync" } else { "pending" },
        }
    }
}

fn render_table(files: &[TrackedFile]) -> String {
    let mut table = Table::new(files.iter().map(StatusTableRow::from));
    table.with(Style::rounded());
    table.to_string()
}

fn print_table(files: &[TrackedFile]) {
    println!("{}", render_table(files));

    let pending = files.iter().filter(|f| !f.is_converged()).count();
    if pending > 0 {
        println!(
            "{}",
            format!("{pending} file(s) differ; the next cycle will propagate them.").yellow()
        );
    } else {
        println!("{}", "All replicas in sync.".green());
    }
}

/// First eight hex digits, or `absent`.
fn short(fingerprint: &Fingerprint) -> String {
    match fingerprint {
        Fingerprint::Absent => "absent".to_string(),
        Fingerprint::Digest(hex) => hex.chars().take(8).collect(),
    }
}

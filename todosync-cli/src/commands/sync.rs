//! `todosync sync`: run one cycle in the foreground.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use todosync_core::{CycleReport, Direction, PassReport};
use todosync_sync::Pipeline;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Print the cycle report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        todosync_daemon::init_tracing();
        let (home, settings) = super::load_settings()?;
        let store = super::drive_store(&home, &settings)?;
        let pipeline = Pipeline::new(settings, Box::new(store));

        let report = pipeline
            .run_cycle()
            .into_result()
            .context("sync cycle failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render cycle report")?
            );
        } else {
            print_report(&report);
        }
        Ok(())
    }
}

/// Human-readable cycle report, one line per pass.
pub(crate) fn print_report(report: &CycleReport) {
    if report.is_noop() {
        println!("✓ Everything in sync");
        return;
    }
    for pass in &report.passes {
        println!("{}", describe_pass(pass));
    }
}

fn describe_pass(pass: &PassReport) -> String {
    let route = match pass.direction {
        Direction::FromRemote => "remote → repository → local",
        Direction::FromLocal => "local → repository → remote",
    };
    if pass.changed.is_empty() && pass.restored.is_empty() {
        return format!("  {route}: {}", "no changes".dimmed());
    }

    let names: Vec<&str> = pass.changed.iter().map(|n| n.as_str()).collect();
    let mut line = format!("✓ {route}: {}", names.join(", ").bold());
    if let Some(snapshot) = &pass.snapshot {
        let short: String = snapshot.0.chars().take(7).collect();
        line.push_str(&format!(" (snapshot {short})"));
    }
    if !pass.kept_local.is_empty() {
        let kept: Vec<&str> = pass.kept_local.iter().map(|n| n.as_str()).collect();
        line.push_str(&format!("; local edit kept for {}", kept.join(", ")));
    }
    if !pass.restored.is_empty() {
        let restored: Vec<&str> = pass.restored.iter().map(|n| n.as_str()).collect();
        line.push_str(&format!("; restored {}", restored.join(", ")));
    }
    line
}

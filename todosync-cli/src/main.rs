//! todosync: keep todo.txt / done.txt in step across Google Drive, a git
//! repository and a local directory.
//!
//! # Usage
//!
//! ```text
//! todosync init --repository <path> --local-dir <path> [--interval <secs>] [--force]
//! todosync auth [--code <code>]
//! todosync sync [--json]
//! todosync status [--local-only] [--json]
//! todosync daemon start|stop|status|sync
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    auth::AuthArgs, daemon::DaemonCommand, init::InitArgs, status::StatusArgs, sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "todosync",
    version,
    about = "Sync todo.txt files between Google Drive, a git repository and a local directory",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.todosync/config.yaml.
    Init(InitArgs),

    /// Authorize Google Drive access and save the OAuth token.
    Auth(AuthArgs),

    /// Run one reconciliation cycle in the foreground.
    Sync(SyncArgs),

    /// Show per-file fingerprints in each replica.
    Status(StatusArgs),

    /// Run or control the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Auth(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

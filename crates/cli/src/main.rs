mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use services::services::snapshot::SnapshotError;
use tracing_subscriber::EnvFilter;

/// autosaved, pronounced autosave-d (for autosave daemon), continuously
/// snapshots in-progress work onto side branches without interfering with
/// your branches, index or HEAD.
#[derive(Parser)]
#[command(name = "autosaved", version, about = "Never lose your work. Code without worrying")]
pub(crate) struct Cli {
    /// Config file (default: <config dir>/config.json)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Save the current state of a repository
    Save {
        /// Commit message
        #[arg(short, long, default_value = "manual save")]
        message: String,
        /// Path to the repository (default: current directory)
        path: Option<PathBuf>,
    },
    /// Start the autosave daemon
    Start,
    /// Stop the autosave daemon
    Stop,
    /// List recent commits along with their autosaves
    List {
        /// Autosaves to show under each commit
        #[arg(long, default_value_t = 5)]
        autosaves: usize,
        /// Number of commits to walk
        #[arg(default_value_t = 10)]
        limit: usize,
    },
    /// Start watching a directory for autosaving
    Watch {
        /// Path to the repository (default: current directory)
        path: Option<PathBuf>,
    },
    /// Stop watching a directory
    Unwatch {
        /// Path to the repository (default: current directory)
        path: Option<PathBuf>,
    },
    /// Restore the worktree to a snapshot without moving your branch
    Restore {
        /// Full hash of the snapshot commit
        hash: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match commands::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // An interactive decline already spoke for itself.
            let declined = err
                .downcast_ref::<SnapshotError>()
                .is_some_and(|err| matches!(err, SnapshotError::UserDidNotConfirm));
            if !declined {
                eprintln!("{} {err:#}", "error:".red().bold());
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!("warn,cli={level},services={level},utils={level}");
    let env_filter =
        EnvFilter::try_new(filter_string).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

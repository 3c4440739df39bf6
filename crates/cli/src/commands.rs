use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use colored::Colorize;

use services::services::config::{FileConfig, load_settings, save_settings};
use services::services::config_watcher;
use services::services::daemon::{self, Daemon};
use services::services::snapshot::{Confirmation, ListEntry, SnapshotRepo};
use utils::paths;

use crate::{Cli, Command};

pub(crate) async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings_path = cli.config.unwrap_or_else(paths::settings_path);
    match cli.command {
        Command::Save { message, path } => save(&repo_path(path), &message, &settings_path),
        Command::Start => start(&settings_path).await,
        Command::Stop => stop(&settings_path),
        Command::List { autosaves, limit } => list(limit, autosaves, &settings_path),
        Command::Watch { path } => watch(repo_path(path), &settings_path),
        Command::Unwatch { path } => unwatch(repo_path(path), &settings_path),
        Command::Restore { hash } => restore(&hash, &settings_path),
    }
}

fn repo_path(arg: Option<PathBuf>) -> PathBuf {
    paths::to_absolute(&arg.unwrap_or_else(|| PathBuf::from(".")))
}

fn lock_path_for(settings_path: &Path) -> PathBuf {
    settings_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(".autosaved.lock")
}

fn open_repo(path: &Path, settings_path: &Path) -> anyhow::Result<SnapshotRepo> {
    let settings = load_settings(settings_path)?;
    SnapshotRepo::open(path, settings.min_interval())
        .with_context(|| format!("couldn't access Git repository at {}", path.display()))
}

fn save(path: &Path, message: &str, settings_path: &Path) -> anyhow::Result<()> {
    let repo = open_repo(path, settings_path)?;
    repo.save(message)?;
    println!("{}", "Saved successfully".green());
    Ok(())
}

async fn start(settings_path: &Path) -> anyhow::Result<()> {
    println!("{}", "Initialising autosave daemon".green());
    let (watcher, updates) = config_watcher::watch_settings(settings_path)?;
    let daemon = Daemon::new(
        FileConfig::new(settings_path),
        updates,
        lock_path_for(settings_path),
    )?;

    println!("{}", "Starting autosave daemon".green());
    let result = daemon.run().await;
    drop(watcher);
    Ok(result?)
}

fn stop(settings_path: &Path) -> anyhow::Result<()> {
    println!("{}", "Stopping autosave daemon".green());
    daemon::stop(&lock_path_for(settings_path))?;
    println!("{}", "Stopped daemon successfully".green());
    Ok(())
}

fn list(limit: usize, autosaves: usize, settings_path: &Path) -> anyhow::Result<()> {
    let repo = open_repo(&repo_path(None), settings_path)?;
    let entries = repo.list(limit, autosaves)?;

    let now = Utc::now();
    for (index, entry) in entries.iter().enumerate() {
        print_entry(index + 1, entry, now);
    }
    Ok(())
}

fn print_entry(serial: usize, entry: &ListEntry, now: DateTime<Utc>) {
    let commit = &entry.commit;
    println!(
        "{} {} {} ({})",
        format!("({serial})").bold(),
        commit.id.to_string().yellow(),
        commit.author_name,
        relative(now, commit.author_time).cyan(),
    );
    println!("    {}", commit.summary);
    for autosave in &entry.autosaves {
        println!(
            "    {} {} ({})",
            "*".green(),
            autosave.id.to_string().yellow(),
            relative(now, autosave.author_time).cyan(),
        );
        println!("        {}", autosave.summary);
    }
    println!();
}

fn relative(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(then).num_seconds().max(0) as u64;
    format!("{} ago", humantime::format_duration(Duration::from_secs(seconds)))
}

fn watch(path: PathBuf, settings_path: &Path) -> anyhow::Result<()> {
    if !path.join(".git").exists() {
        bail!("path (or current directory) should have a Git repository");
    }

    let mut settings = load_settings(settings_path)?;
    if settings.repositories.contains(&path) {
        bail!("the repo you want to add is already being watched");
    }
    settings.repositories.push(path);
    save_settings(&settings, settings_path)?;

    println!("{}", "Repo added to autosaved".green());
    Ok(())
}

fn unwatch(path: PathBuf, settings_path: &Path) -> anyhow::Result<()> {
    let mut settings = load_settings(settings_path)?;
    let before = settings.repositories.len();
    settings.repositories.retain(|watched| *watched != path);
    if settings.repositories.len() == before {
        bail!("the repo you want to unwatch is not being watched in the first place");
    }
    save_settings(&settings, settings_path)?;

    println!("{}", "Repo unwatched from autosaved".green());
    Ok(())
}

struct TerminalConfirmation;

impl Confirmation for TerminalConfirmation {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{prompt} [y/N] ");
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }
}

fn restore(hash: &str, settings_path: &Path) -> anyhow::Result<()> {
    let repo = open_repo(&repo_path(None), settings_path)?;
    repo.restore(hash, &TerminalConfirmation)?;
    println!("{}", "Restored successfully".green());
    Ok(())
}

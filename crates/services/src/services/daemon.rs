use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::{Instant, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use utils::lock_file::{self, LockFile, LockFileError, LockGuard};

use super::config::{ConfigError, ConfigSource, Settings};
use super::registry::RepoRegistry;
use super::snapshot::{SnapshotError, SnapshotRepo};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("it seems like the autosave daemon is already running")]
    AlreadyRunning,
    #[error("the autosave daemon is not running")]
    NotRunning,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Lock(#[from] LockFileError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The autosave loop: sweeps every watched repository once per tick,
/// rebuilds the registry on config-change notifications and exits on
/// SIGTERM/SIGINT or cancellation.
pub struct Daemon<C: ConfigSource> {
    config: C,
    updates: mpsc::Receiver<()>,
    lock_path: PathBuf,
    settings: Settings,
    registry: RepoRegistry,
    shutdown: CancellationToken,
}

impl<C: ConfigSource> Daemon<C> {
    pub fn new(
        config: C,
        updates: mpsc::Receiver<()>,
        lock_path: PathBuf,
    ) -> Result<Self, DaemonError> {
        let settings = config.load()?;
        settings.validate()?;
        let registry = RepoRegistry::from_settings(&settings);
        Ok(Self {
            config,
            updates,
            lock_path,
            settings,
            registry,
            shutdown: CancellationToken::new(),
        })
    }

    /// Cancelling this token stops the loop; `run` also cancels it when a
    /// SIGTERM or SIGINT arrives.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(mut self) -> Result<(), DaemonError> {
        let _lock = self.acquire_lock()?;
        info!(repos = self.registry.len(), "autosave daemon running");

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let signals = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv() => {}
            }
            signals.cancel();
        });

        // The first tick fires immediately, so a freshly started daemon
        // sweeps right away.
        let mut ticker = interval(tick_period(&self.settings));
        let mut updates_open = true;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("gracefully shutting down daemon");
                    return Ok(());
                }
                update = self.updates.recv(), if updates_open => match update {
                    Some(()) => {
                        info!("configuration changed, reloading");
                        self.reload()?;
                        let period = tick_period(&self.settings);
                        ticker = interval_at(Instant::now() + period, period);
                        self.check_all_repos()?;
                    }
                    None => updates_open = false,
                },
                _ = ticker.tick() => self.check_all_repos()?,
            }
        }
    }

    fn acquire_lock(&self) -> Result<LockGuard, DaemonError> {
        match LockFile::new(&self.lock_path).acquire() {
            Ok(guard) => Ok(guard),
            Err(LockFileError::Busy(_)) => Err(DaemonError::AlreadyRunning),
            Err(err) => Err(err.into()),
        }
    }

    fn reload(&mut self) -> Result<(), DaemonError> {
        let settings = self.config.load()?;
        settings.validate()?;
        self.registry = RepoRegistry::from_settings(&settings);
        self.settings = settings;
        Ok(())
    }

    /// One sweep. `NothingToSave` and `UnbornHead` keep the sweep going;
    /// anything else aborts the daemon rather than silently skipping a
    /// repository in an unexpected state.
    fn check_all_repos(&self) -> Result<(), DaemonError> {
        info!("checking all repositories");
        for (path, repo) in self.registry.iter() {
            if self.shutdown.is_cancelled() {
                break;
            }
            match Self::check_repo(path, repo) {
                Ok(()) => {}
                Err(SnapshotError::NothingToSave) => {
                    info!(repo = %path.display(), "nothing to save");
                }
                Err(SnapshotError::UnbornHead) => {
                    warn!(repo = %path.display(), "repository has no commits yet, skipping");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn check_repo(path: &Path, repo: &SnapshotRepo) -> Result<(), SnapshotError> {
        let decision = repo.should_save()?;
        if decision.save {
            info!(repo = %path.display(), "autosaving repository");
            let id = repo.save(&decision.reason)?;
            info!(repo = %path.display(), commit = %id, "autosaved");
        } else {
            debug!(repo = %path.display(), "shouldn't save: {}", decision.reason);
        }
        Ok(())
    }
}

// tokio's interval panics on a zero period; a zero checking interval still
// has to tick.
fn tick_period(settings: &Settings) -> Duration {
    settings.checking_interval().max(Duration::from_secs(1))
}

/// Ask a running daemon to exit by signalling the lockfile owner.
pub fn stop(lock_path: &Path) -> Result<(), DaemonError> {
    let lock = LockFile::new(lock_path);
    let Some(pid) = lock.owner()? else {
        return Err(DaemonError::NotRunning);
    };
    if !lock_file::process_alive(pid) {
        return Err(DaemonError::NotRunning);
    }
    lock_file::terminate(pid)?;
    Ok(())
}

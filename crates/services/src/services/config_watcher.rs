use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConfigWatcherError {
    #[error(transparent)]
    Notify(#[from] notify::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("config path {} has no parent directory", .0.display())]
    NoParent(PathBuf),
}

fn canonicalize_lossy(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Watches the directory holding the settings file and forwards debounced
/// events that touch it into a bounded channel. The channel has capacity 1
/// and sends never block: a pending reload subsumes a later one.
pub struct ConfigWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

pub fn watch_settings(
    settings_path: &Path,
) -> Result<(ConfigWatcher, mpsc::Receiver<()>), ConfigWatcherError> {
    let dir = settings_path
        .parent()
        .ok_or_else(|| ConfigWatcherError::NoParent(settings_path.to_path_buf()))?;
    std::fs::create_dir_all(dir)?;

    // Editors and `watch`/`unwatch` replace the file rather than write in
    // place, so match on both the canonical path and the file name.
    let canonical = canonicalize_lossy(settings_path);
    let file_name = settings_path.file_name().map(|name| name.to_os_string());

    let (tx, rx) = mpsc::channel(1);
    let mut debouncer = new_debouncer(
        Duration::from_millis(200),
        None,
        move |result: DebounceEventResult| match result {
            Ok(events) => {
                let relevant = events.iter().any(|event| {
                    event.paths.iter().any(|path| {
                        *path == canonical || path.file_name() == file_name.as_deref()
                    })
                });
                if relevant {
                    // A full channel already carries a pending reload.
                    let _ = tx.try_send(());
                }
            }
            Err(errors) => {
                for err in errors {
                    warn!("config watcher error: {err}");
                }
            }
        },
    )?;
    debouncer.watch(dir, RecursiveMode::NonRecursive)?;
    debug!(path = %settings_path.display(), "watching settings file");

    Ok((
        ConfigWatcher {
            _debouncer: debouncer,
        },
        rx,
    ))
}

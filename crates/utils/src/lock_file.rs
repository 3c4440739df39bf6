use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockFileError {
    #[error("lockfile {} is held by a running process", .0.display())]
    Busy(PathBuf),
    #[error("lockfile {} has unreadable contents", .0.display())]
    Corrupt(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Git-style PID lockfile: the file holds the owning process id followed by
/// a newline. A lockfile whose recorded owner is no longer alive is stale
/// and may be taken over.
pub struct LockFile {
    path: PathBuf,
}

/// Removes the lockfile when dropped.
pub struct LockGuard {
    path: PathBuf,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock for the current process, taking over stale locks.
    pub fn acquire(&self) -> Result<LockGuard, LockFileError> {
        match self.try_create() {
            Err(LockFileError::Busy(_)) => match self.owner()? {
                Some(pid) if process_alive(pid) => Err(LockFileError::Busy(self.path.clone())),
                _ => {
                    debug!(path = %self.path.display(), "removing stale lockfile");
                    match fs::remove_file(&self.path) {
                        Ok(()) => {}
                        Err(err) if err.kind() == ErrorKind::NotFound => {}
                        Err(err) => return Err(err.into()),
                    }
                    self.try_create()
                }
            },
            result => result,
        }
    }

    fn try_create(&self) -> Result<LockGuard, LockFileError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(LockGuard {
                    path: self.path.clone(),
                })
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(LockFileError::Busy(self.path.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Process id recorded in the lockfile, or `None` when no lockfile exists.
    pub fn owner(&self) -> Result<Option<u32>, LockFileError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => contents
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| LockFileError::Corrupt(self.path.clone())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "failed to remove lockfile: {err}");
        }
    }
}

/// `kill(pid, 0)` probes for existence; EPERM still means the process exists.
pub fn process_alive(pid: u32) -> bool {
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

pub fn terminate(pid: u32) -> io::Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

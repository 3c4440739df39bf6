use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_minutes() -> i64 {
    2
}

fn default_checking_interval() -> i64 {
    120
}

/// How long a repository must have been quiet before an autosave is due.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AfterEvery {
    #[serde(default = "default_minutes")]
    pub minutes: i64,
    #[serde(default)]
    pub seconds: i64,
}

impl Default for AfterEvery {
    fn default() -> Self {
        Self {
            minutes: default_minutes(),
            seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub after_every: AfterEvery,
    /// Seconds between daemon sweeps.
    #[serde(default = "default_checking_interval")]
    pub checking_interval: i64,
    /// Absolute paths of the watched repositories.
    #[serde(default)]
    pub repositories: Vec<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            after_every: AfterEvery::default(),
            checking_interval: default_checking_interval(),
            repositories: Vec::new(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.checking_interval < 0 {
            return Err(ConfigError::Invalid(
                "negative checking interval is not allowed".to_string(),
            ));
        }
        if self.after_every.minutes < 0 || self.after_every.seconds < 0 {
            return Err(ConfigError::Invalid(
                "negative autosave interval is not allowed".to_string(),
            ));
        }
        Ok(())
    }

    /// Minimum quiet time before an autosave is taken.
    pub fn min_interval(&self) -> Duration {
        let seconds = self.after_every.minutes * 60 + self.after_every.seconds;
        Duration::from_secs(seconds.max(0) as u64)
    }

    pub fn checking_interval(&self) -> Duration {
        Duration::from_secs(self.checking_interval.max(0) as u64)
    }
}

/// Read settings, falling back to defaults when no file exists yet.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("no config file at {}, using defaults", path.display());
            return Ok(Settings::default());
        }
        Err(err) => return Err(err.into()),
    };
    let settings: Settings = serde_json::from_str(&raw)?;
    settings.validate()?;
    Ok(settings)
}

pub fn save_settings(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

/// Read-only settings provider injected into the daemon, so tests can drive
/// reloads without a file on disk.
pub trait ConfigSource: Send + 'static {
    fn load(&self) -> Result<Settings, ConfigError>;
}

/// The production source: settings read from a JSON file.
pub struct FileConfig {
    path: PathBuf,
}

impl FileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfig {
    fn load(&self) -> Result<Settings, ConfigError> {
        load_settings(&self.path)
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::config::Settings;
use super::snapshot::SnapshotRepo;

/// Watched repositories by absolute path. Rebuilt wholesale on every config
/// reload; paths that fail to open are skipped with a warning.
#[derive(Default)]
pub struct RepoRegistry {
    repos: HashMap<PathBuf, SnapshotRepo>,
}

impl RepoRegistry {
    pub fn from_settings(settings: &Settings) -> Self {
        let min_interval = settings.min_interval();
        let mut repos = HashMap::new();
        for path in &settings.repositories {
            match SnapshotRepo::open(path, min_interval) {
                Ok(repo) => {
                    repos.insert(path.clone(), repo);
                }
                Err(err) => {
                    warn!(path = %path.display(), "git repo couldn't be initialised: {err}");
                }
            }
        }
        Self { repos }
    }

    /// Enumeration order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &SnapshotRepo)> {
        self.repos.iter().map(|(path, repo)| (path.as_path(), repo))
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }
}

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Per-user configuration directory.
///
/// ✔ macOS → ~/Library/Application Support/autosaved
/// ✔ Linux → ~/.config/autosaved (respects XDG_CONFIG_HOME)
pub fn config_home() -> PathBuf {
    let proj =
        ProjectDirs::from("", "", "autosaved").expect("OS didn't give us a home directory");
    proj.config_dir().to_path_buf()
}

pub fn settings_path() -> PathBuf {
    config_home().join("config.json")
}

/// Absolute, symlink-resolved form of a user-supplied path. Paths that do
/// not exist (yet) are returned absolute but unresolved.
pub fn to_absolute(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    dunce::canonicalize(&absolute).unwrap_or(absolute)
}

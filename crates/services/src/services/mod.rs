pub mod config;
pub mod config_watcher;
pub mod daemon;
pub mod decision;
pub mod git;
pub mod registry;
pub mod snapshot;

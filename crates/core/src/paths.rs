//! Centralized path functions for jobwatch storage locations.

use std::path::PathBuf;

/// App data root: `~/Library/Application Support/jobwatch/` (macOS) or `~/.local/share/jobwatch/` (Linux).
pub fn app_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("jobwatch"))
}

/// App config root: `~/.config/jobwatch/` on Linux.
pub fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("jobwatch"))
}

/// Recovery snapshot file: `<app_data_dir>/job-snapshot.json`.
pub fn snapshot_path() -> Option<PathBuf> {
    app_data_dir().map(|d| d.join("job-snapshot.json"))
}

/// Persisted client identity: `<app_config_dir>/user-id`.
pub fn identity_path() -> Option<PathBuf> {
    app_config_dir().map(|d| d.join("user-id"))
}

/// Default TOML config file: `<app_config_dir>/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    app_config_dir().map(|d| d.join("config.toml"))
}

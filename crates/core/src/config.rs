// crates/core/src/config.rs
//! Tracker configuration: defaults, optional TOML file, env overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;
use crate::paths;

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api/jobs";

/// Configuration for one tracking engine.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub api_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub poll_interval: Duration,
    pub snapshot_ttl: Duration,
    /// None = no durable snapshot location could be resolved.
    pub snapshot_path: Option<PathBuf>,
    pub identity_path: Option<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            username: None,
            password: None,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            poll_interval: Duration::from_secs(10),
            snapshot_ttl: Duration::from_secs(24 * 60 * 60),
            snapshot_path: paths::snapshot_path(),
            identity_path: paths::identity_path(),
        }
    }
}

/// On-disk shape. Every key is optional; missing keys keep the default.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    api_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    poll_interval_secs: Option<u64>,
    snapshot_ttl_hours: Option<u64>,
    snapshot_path: Option<PathBuf>,
    identity_path: Option<PathBuf>,
}

impl TrackerConfig {
    /// Load configuration.
    ///
    /// Priority (highest first):
    /// 1. `JOBWATCH_*` environment variables
    /// 2. The TOML file at `path`, or the default config file if it exists
    /// 3. Built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => paths::config_path().filter(|p| p.exists()),
        };
        if let Some(file) = file {
            let text = std::fs::read_to_string(&file).map_err(|source| ConfigError::Io {
                path: file.clone(),
                source,
            })?;
            config.apply_toml(&text, &file)?;
            tracing::debug!(path = %file.display(), "Loaded config file");
        }

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_toml(&mut self, text: &str, path: &Path) -> Result<(), ConfigError> {
        let file: FileConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(v) = file.api_url {
            self.api_url = v;
        }
        if file.username.is_some() {
            self.username = file.username;
        }
        if file.password.is_some() {
            self.password = file.password;
        }
        if let Some(ms) = file.base_delay_ms {
            self.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.max_delay_ms {
            self.max_delay = Duration::from_millis(ms);
        }
        if let Some(n) = file.max_reconnect_attempts {
            self.max_reconnect_attempts = n;
        }
        if let Some(secs) = file.poll_interval_secs {
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    key: "poll_interval_secs",
                    reason: "must be at least 1",
                });
            }
            self.poll_interval = Duration::from_secs(secs);
        }
        if let Some(hours) = file.snapshot_ttl_hours {
            self.snapshot_ttl = Duration::from_secs(hours.saturating_mul(60 * 60));
        }
        if file.snapshot_path.is_some() {
            self.snapshot_path = file.snapshot_path;
        }
        if file.identity_path.is_some() {
            self.identity_path = file.identity_path;
        }
        Ok(())
    }

    /// Apply `JOBWATCH_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("JOBWATCH_API_URL") {
            self.api_url = url;
        }
        if let Some(user) = lookup("JOBWATCH_USERNAME") {
            self.username = Some(user);
        }
        if let Some(pass) = lookup("JOBWATCH_PASSWORD") {
            self.password = Some(pass);
        }
        if let Some(raw) = lookup("JOBWATCH_POLL_INTERVAL_SECS") {
            let secs: u64 = parse_env("JOBWATCH_POLL_INTERVAL_SECS", &raw)?;
            if secs == 0 {
                return Err(ConfigError::InvalidEnv {
                    key: "JOBWATCH_POLL_INTERVAL_SECS",
                    value: raw,
                });
            }
            self.poll_interval = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("JOBWATCH_MAX_RECONNECT_ATTEMPTS") {
            self.max_reconnect_attempts = parse_env("JOBWATCH_MAX_RECONNECT_ATTEMPTS", &raw)?;
        }
        Ok(())
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.base_delay, self.max_delay)
    }

    pub fn snapshot_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.snapshot_ttl).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnv {
        key,
        value: raw.to_string(),
    })
}

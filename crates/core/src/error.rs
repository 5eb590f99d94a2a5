// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

use jobwatch_types::JobId;

/// Failures of the jobs API collaborator.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Jobs API returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Unexpected response body from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Stream read failed: {0}")]
    Stream(String),
}

impl ApiError {
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }
}

/// Failures while opening or reading the event stream.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Failed to open event stream for job {job_id}: {source}")]
    Open {
        job_id: JobId,
        #[source]
        source: ApiError,
    },

    #[error("Event stream for job {job_id} broke: {source}")]
    Read {
        job_id: JobId,
        #[source]
        source: ApiError,
    },
}

/// Snapshot storage failures. Always logged and swallowed by callers.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error on snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed snapshot {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid setting {key}: {reason}")]
    Invalid {
        key: &'static str,
        reason: &'static str,
    },
}

/// Caller-visible errors from the job tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Please enter some text to process")]
    EmptyInput,

    #[error("Failed to create job: {0}")]
    Submit(#[source] ApiError),

    #[error("Failed to cancel job {job_id}: {source}")]
    Cancel {
        job_id: JobId,
        #[source]
        source: ApiError,
    },

    #[error("Gave up reconnecting to job {job_id} after {attempts} attempts")]
    RetriesExhausted { job_id: JobId, attempts: u32 },

    #[error("Status query failed: {0}")]
    Api(#[from] ApiError),

    #[error("Tracking engine for job {0} is no longer running")]
    EngineGone(JobId),
}

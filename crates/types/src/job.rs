// crates/types/src/job.rs
//! Job identity, canonical job state and the recovery snapshot.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::status::JobStatus;

/// Opaque server-assigned job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Canonical client-side view of one job.
///
/// `progress_text` is append-only: the only way to shrink it is to drop the
/// whole state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    id: JobId,
    status: JobStatus,
    input_text: String,
    progress_text: String,
    is_processing: bool,
    last_updated: DateTime<Utc>,
}

impl JobState {
    /// Fresh state for a just-submitted job.
    pub fn new(id: JobId, input_text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Created,
            input_text: input_text.into(),
            progress_text: String::new(),
            is_processing: true,
            last_updated: now,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn input_text(&self) -> &str {
        &self.input_text
    }

    pub fn progress_text(&self) -> &str {
        &self.progress_text
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn append_progress(&mut self, fragment: &str, now: DateTime<Utc>) {
        self.progress_text.push_str(fragment);
        self.last_updated = now;
    }

    /// Set the status. Reaching a terminal status also clears `is_processing`.
    pub fn set_status(&mut self, status: JobStatus, now: DateTime<Utc>) {
        self.status = status;
        if status.is_terminal() {
            self.is_processing = false;
        }
        self.last_updated = now;
    }
}

/// Connection lifecycle of one engine instance. Exactly one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionPhase {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionPhase::Idle => "idle",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::Reconnecting => "reconnecting",
            ConnectionPhase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Durable recovery copy of a [`JobState`] plus its write time.
///
/// The JSON shape is fixed: `jobId`, `progressText`, `status`, `inputText`,
/// `isProcessing` and `timestamp` in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub job_id: JobId,
    pub progress_text: String,
    pub status: JobStatus,
    pub input_text: String,
    pub is_processing: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    pub fn capture(state: &JobState, now: DateTime<Utc>) -> Self {
        Self {
            job_id: state.id.clone(),
            progress_text: state.progress_text.clone(),
            status: state.status,
            input_text: state.input_text.clone(),
            is_processing: state.is_processing,
            timestamp: now,
        }
    }

    /// True when the snapshot was written more than `ttl` before `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.timestamp) > ttl
    }

    pub fn into_state(self) -> JobState {
        JobState {
            id: self.job_id,
            status: self.status,
            input_text: self.input_text,
            progress_text: self.progress_text,
            is_processing: self.is_processing,
            last_updated: self.timestamp,
        }
    }
}

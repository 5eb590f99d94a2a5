// crates/types/src/wire.rs
//! JSON bodies exchanged with the jobs API and the event stream.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::StreamEvent;
use crate::job::JobId;
use crate::status::JobStatus;

/// POST body for job submission: `{ "jobType": 1, "jobData": { "Input": "..." } }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub job_type: u32,
    pub job_data: JobData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobData {
    #[serde(rename = "Input")]
    pub input: String,
}

impl CreateJobRequest {
    pub fn new(job_type: u32, input: impl Into<String>) -> Self {
        Self {
            job_type,
            job_data: JobData {
                input: input.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: JobId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_status: JobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Connected,
    Progress,
    Status,
    Reconnecting,
    Disconnected,
}

/// JSON payload of one `data:` line on the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseFrame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A frame that parsed as JSON but cannot become a [`StreamEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("progress frame without payload")]
    MissingPayload,

    #[error("status frame without status")]
    MissingStatus,

    #[error("status frame with unknown status {0:?}")]
    UnknownStatus(String),
}

impl SseFrame {
    pub fn into_event(self) -> Result<StreamEvent, FrameError> {
        match self.kind {
            FrameKind::Connected => Ok(StreamEvent::Connected),
            FrameKind::Progress => match self.payload {
                None | Some(serde_json::Value::Null) => Err(FrameError::MissingPayload),
                Some(serde_json::Value::String(text)) => Ok(StreamEvent::Progress(text)),
                Some(other) => Ok(StreamEvent::Progress(other.to_string())),
            },
            FrameKind::Status => {
                let raw = self.status.ok_or(FrameError::MissingStatus)?;
                raw.parse::<JobStatus>()
                    .map(StreamEvent::StatusChanged)
                    .map_err(|_| FrameError::UnknownStatus(raw))
            }
            FrameKind::Reconnecting => Ok(StreamEvent::Reconnecting(
                self.message.unwrap_or_default(),
            )),
            FrameKind::Disconnected => Ok(StreamEvent::Disconnected),
        }
    }
}

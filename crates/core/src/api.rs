// crates/core/src/api.rs
//! JobApi trait: the boundary between the tracking engine and the jobs service.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use jobwatch_types::{JobId, JobStatus};

use crate::error::ApiError;

/// Raw body of a streaming response, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

/// Operations the engine needs from the jobs service.
///
/// Implementations:
/// - `HttpJobApi` — talks to the real service over HTTP
/// - test doubles that script responses in memory
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Submit new work. Returns the server-assigned id.
    async fn submit(&self, job_type: u32, input: &str) -> Result<JobId, ApiError>;

    /// Point-in-time status of a job.
    async fn query_status(&self, job_id: &JobId) -> Result<JobStatus, ApiError>;

    /// Ask the server to cancel. The job passes through `Cancelling` first.
    async fn cancel(&self, job_id: &JobId) -> Result<(), ApiError>;

    /// Open the long-lived progress stream for a job.
    async fn open_stream(&self, job_id: &JobId) -> Result<ByteStream, ApiError>;
}

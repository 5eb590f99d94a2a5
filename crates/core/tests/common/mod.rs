// crates/core/tests/common/mod.rs
//! Scripted in-memory JobApi for engine and controller tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use jobwatch_core::{ApiError, ByteStream, JobApi, PersistenceError, SnapshotStore, TrackerConfig};
use jobwatch_types::{JobId, JobStatus, Snapshot};
use serde_json::json;

/// What the next `open_stream` call does.
pub enum Script {
    /// Open fails with HTTP 503.
    Refuse,
    /// Open succeeds; the body yields `chunks` and then does `then`.
    Body { chunks: Vec<String>, then: After },
}

pub enum After {
    /// Clean end of body.
    End,
    /// Body read fails.
    Error,
    /// Never yields again.
    Hang,
}

impl Script {
    pub fn body(chunks: impl IntoIterator<Item = String>, then: After) -> Self {
        Script::Body {
            chunks: chunks.into_iter().collect(),
            then,
        }
    }
}

pub fn data(value: serde_json::Value) -> String {
    format!("data: {value}\n")
}

pub fn connected(job_id: &str) -> String {
    data(json!({ "type": "connected", "jobId": job_id }))
}

pub fn progress(text: &str) -> String {
    data(json!({ "type": "progress", "payload": text }))
}

pub fn status(status: &str) -> String {
    data(json!({ "type": "status", "status": status }))
}

/// Decrements the live-stream counter when the body is dropped.
struct LiveGuard(Arc<AtomicI32>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ScriptedApi {
    job_id: String,
    submit_error: Mutex<Option<u16>>,
    cancel_error: Mutex<Option<u16>>,
    streams: Mutex<VecDeque<Script>>,
    statuses: Mutex<VecDeque<Result<JobStatus, u16>>>,
    fallback_status: Mutex<Result<JobStatus, u16>>,
    live_streams: Arc<AtomicI32>,
    submit_calls: AtomicU32,
    status_calls: AtomicU32,
    cancel_calls: AtomicU32,
    open_calls: AtomicU32,
}

impl ScriptedApi {
    pub fn new(job_id: &str) -> Arc<Self> {
        Arc::new(Self {
            job_id: job_id.to_string(),
            submit_error: Mutex::new(None),
            cancel_error: Mutex::new(None),
            streams: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(VecDeque::new()),
            fallback_status: Mutex::new(Ok(JobStatus::Running)),
            live_streams: Arc::new(AtomicI32::new(0)),
            submit_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            cancel_calls: AtomicU32::new(0),
            open_calls: AtomicU32::new(0),
        })
    }

    pub fn fail_submit(&self, code: u16) {
        *self.submit_error.lock().unwrap() = Some(code);
    }

    pub fn fail_cancel(&self, code: u16) {
        *self.cancel_error.lock().unwrap() = Some(code);
    }

    pub fn push_stream(&self, script: Script) {
        self.streams.lock().unwrap().push_back(script);
    }

    /// Queue one status answer ahead of the fallback.
    pub fn push_status(&self, result: Result<JobStatus, u16>) {
        self.statuses.lock().unwrap().push_back(result);
    }

    /// Answer for status queries once the queue is empty.
    pub fn set_status(&self, result: Result<JobStatus, u16>) {
        *self.fallback_status.lock().unwrap() = result;
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> u32 {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Stream bodies handed out and not yet dropped.
    pub fn live_streams(&self) -> i32 {
        self.live_streams.load(Ordering::SeqCst)
    }

    fn http_error(code: u16) -> ApiError {
        ApiError::Status {
            url: "scripted".into(),
            status: code,
        }
    }
}

#[async_trait]
impl JobApi for ScriptedApi {
    async fn submit(&self, _job_type: u32, _input: &str) -> Result<JobId, ApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        match *self.submit_error.lock().unwrap() {
            Some(code) => Err(Self::http_error(code)),
            None => Ok(JobId::new(self.job_id.clone())),
        }
    }

    async fn query_status(&self, _job_id: &JobId) -> Result<JobStatus, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let queued = self.statuses.lock().unwrap().pop_front();
        let result = queued.unwrap_or_else(|| *self.fallback_status.lock().unwrap());
        result.map_err(Self::http_error)
    }

    async fn cancel(&self, _job_id: &JobId) -> Result<(), ApiError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        match *self.cancel_error.lock().unwrap() {
            Some(code) => Err(Self::http_error(code)),
            None => Ok(()),
        }
    }

    async fn open_stream(&self, _job_id: &JobId) -> Result<ByteStream, ApiError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.streams.lock().unwrap().pop_front();
        let (chunks, then) = match script {
            None | Some(Script::Refuse) => return Err(Self::http_error(503)),
            Some(Script::Body { chunks, then }) => (chunks, then),
        };

        self.live_streams.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(Arc::clone(&self.live_streams));
        let body = async_stream::stream! {
            let _guard = guard;
            for chunk in chunks {
                yield Ok(Bytes::from(chunk));
            }
            match then {
                After::End => {}
                After::Error => {
                    yield Err(ApiError::Stream("connection reset".into()));
                }
                After::Hang => futures_util::future::pending::<()>().await,
            }
        };
        Ok(Box::pin(body))
    }
}

/// Defaults with no on-disk paths and a poll interval long enough to stay
/// out of the way unless a test wants it.
pub fn test_config() -> TrackerConfig {
    TrackerConfig {
        snapshot_path: None,
        identity_path: None,
        poll_interval: Duration::from_secs(3600),
        ..TrackerConfig::default()
    }
}

/// Snapshot store whose writes and clears always fail.
#[derive(Default)]
pub struct FailingStore {
    saves: AtomicU32,
    clears: AtomicU32,
}

impl FailingStore {
    pub fn save_attempts(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn clear_attempts(&self) -> u32 {
        self.clears.load(Ordering::SeqCst)
    }

    fn denied() -> PersistenceError {
        PersistenceError::io(
            "/read-only/snapshot.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only filesystem"),
        )
    }
}

#[async_trait]
impl SnapshotStore for FailingStore {
    async fn save(&self, _snapshot: &Snapshot) -> Result<(), PersistenceError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Err(Self::denied())
    }

    async fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        Ok(None)
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Err(Self::denied())
    }
}

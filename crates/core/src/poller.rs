// crates/core/src/poller.rs
//! Polling fallback: queries job status on a fixed interval, independent of
//! the event stream, so a terminal status is caught even when the stream is
//! wedged.

use std::sync::Arc;
use std::time::Duration;

use jobwatch_types::{JobId, JobStatus};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::JobApi;

/// One successful poll result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Polled(pub JobStatus);

pub struct PollingFallback {
    api: Arc<dyn JobApi>,
    job_id: JobId,
    period: Duration,
    cancel: CancellationToken,
}

impl PollingFallback {
    pub fn new(
        api: Arc<dyn JobApi>,
        job_id: JobId,
        period: Duration,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            api,
            job_id,
            period,
            cancel: parent.child_token(),
        }
    }

    pub fn spawn<T>(self, tx: mpsc::Sender<T>) -> PollerHandle
    where
        T: From<Polled> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run(tx));
        PollerHandle { cancel, task }
    }

    /// Tick until cancelled or the receiver is dropped. The first query runs
    /// one full period after start. A failed query is logged and the next
    /// tick proceeds normally.
    pub async fn run<T>(self, tx: mpsc::Sender<T>)
    where
        T: From<Polled> + Send + 'static,
    {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.api.query_status(&self.job_id) => result,
            };

            match result {
                Ok(status) => {
                    debug!(job_id = %self.job_id, %status, "Polled job status");
                    if tx.send(Polled(status).into()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(job_id = %self.job_id, error = %e, "Status poll failed");
                }
            }
        }
        debug!(job_id = %self.job_id, "Polling stopped");
    }
}

pub struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop ticking. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "Polling task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ByteStream;
    use crate::error::ApiError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns scripted results in order, then repeats the last one.
    struct ScriptedStatus {
        results: Mutex<Vec<Result<JobStatus, u16>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedStatus {
        fn new(results: Vec<Result<JobStatus, u16>>) -> Self {
            Self {
                results: Mutex::new(results),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl JobApi for ScriptedStatus {
        async fn submit(&self, _job_type: u32, _input: &str) -> Result<JobId, ApiError> {
            unreachable!()
        }

        async fn query_status(&self, _job_id: &JobId) -> Result<JobStatus, ApiError> {
            *self.calls.lock().unwrap() += 1;
            let mut results = self.results.lock().unwrap();
            let next = if results.len() > 1 {
                results.remove(0)
            } else {
                results[0]
            };
            next.map_err(|status| ApiError::Status {
                url: "test".into(),
                status,
            })
        }

        async fn cancel(&self, _job_id: &JobId) -> Result<(), ApiError> {
            unreachable!()
        }

        async fn open_stream(&self, _job_id: &JobId) -> Result<ByteStream, ApiError> {
            unreachable!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_waits_one_period() {
        let api = Arc::new(ScriptedStatus::new(vec![Ok(JobStatus::Running)]));
        let root = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<Polled>(8);
        let handle = PollingFallback::new(api.clone(), JobId::new("j"), Duration::from_secs(10), &root)
            .spawn(tx);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(api.calls(), 0);

        assert_eq!(rx.recv().await, Some(Polled(JobStatus::Running)));
        assert_eq!(api.calls(), 1);

        handle.cancel();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_does_not_stop_ticking() {
        let api = Arc::new(ScriptedStatus::new(vec![
            Err(503),
            Err(500),
            Ok(JobStatus::Completed),
        ]));
        let root = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<Polled>(8);
        let handle = PollingFallback::new(api.clone(), JobId::new("j"), Duration::from_secs(10), &root)
            .spawn(tx);

        assert_eq!(rx.recv().await, Some(Polled(JobStatus::Completed)));
        assert_eq!(api.calls(), 3);
        handle.cancel();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_polling() {
        let api = Arc::new(ScriptedStatus::new(vec![Ok(JobStatus::Running)]));
        let root = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<Polled>(8);
        let handle = PollingFallback::new(api.clone(), JobId::new("j"), Duration::from_secs(10), &root)
            .spawn(tx);

        assert!(rx.recv().await.is_some());
        root.cancel();
        handle.join().await;
        let calls = api.calls();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.calls(), calls);
        assert_eq!(rx.recv().await, None);
    }
}

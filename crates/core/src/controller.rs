// crates/core/src/controller.rs
//! Reconnection controller: keeps one event stream open for a job, retrying
//! with capped exponential backoff.
//!
//! ```text
//! Idle -> Connecting -> Connected -> (error | ambiguous end) -> Reconnecting -> Connecting ...
//!                                                                  \-> Stopped
//! ```
//!
//! The attempt counter resets only when the first frame of a connection is
//! the `connected` acknowledgment; a late `connected` frame is ignored.
//!
//! Before every retry a gating status query decides whether reconnecting is
//! still worth it. A job outside the processable set stops the controller
//! cleanly; a failed gating query is treated as "still running".

use std::sync::Arc;

use futures_util::StreamExt;
use jobwatch_types::{ConnectionPhase, JobId, JobStatus, StreamEvent};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::JobApi;
use crate::backoff::BackoffPolicy;
use crate::sse::EventStreamConnector;

/// Messages the controller puts on the engine's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// A stream event to relay to the state machine.
    Stream(StreamEvent),
    /// Result of a gating status query.
    Gated(JobStatus),
    /// Final message; nothing follows.
    Stopped(ControllerOutcome),
}

/// Why the controller stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerOutcome {
    /// Gating found the job outside the processable set. Not an error.
    Finished(JobStatus),
    /// More than `max_attempts` consecutive retries.
    Exhausted { attempts: u32 },
    /// Explicitly cancelled, or the engine went away.
    Cancelled,
}

enum GateDecision {
    Retry,
    Stop(JobStatus),
    Cancelled,
}

pub struct ReconnectionController {
    api: Arc<dyn JobApi>,
    job_id: JobId,
    connector: EventStreamConnector,
    backoff: BackoffPolicy,
    max_attempts: u32,
    attempt: u32,
    cancel: CancellationToken,
    phase: watch::Sender<ConnectionPhase>,
}

impl ReconnectionController {
    pub fn new(
        api: Arc<dyn JobApi>,
        job_id: JobId,
        backoff: BackoffPolicy,
        max_attempts: u32,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let connector = EventStreamConnector::new(Arc::clone(&api), &cancel);
        let (phase, _) = watch::channel(ConnectionPhase::Idle);
        Self {
            api,
            job_id,
            connector,
            backoff,
            max_attempts,
            attempt: 0,
            cancel,
            phase,
        }
    }

    pub fn phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run on a background task.
    pub fn spawn<T>(self, tx: mpsc::Sender<T>) -> ControllerHandle
    where
        T: From<ControllerEvent> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let phase = self.phase();
        let task = tokio::spawn(self.run(tx));
        ControllerHandle {
            cancel,
            phase,
            task,
        }
    }

    /// Drive the connect/retry loop until it stops. The outcome is also sent
    /// as the last [`ControllerEvent::Stopped`] message.
    pub async fn run<T>(mut self, tx: mpsc::Sender<T>) -> ControllerOutcome
    where
        T: From<ControllerEvent> + Send + 'static,
    {
        let outcome = self.drive(&tx).await;
        self.set_phase(ConnectionPhase::Stopped);
        match &outcome {
            ControllerOutcome::Finished(status) => {
                info!(job_id = %self.job_id, %status, "Job no longer processable, stream stopped")
            }
            ControllerOutcome::Exhausted { attempts } => {
                warn!(job_id = %self.job_id, attempts, "Reconnect attempts exhausted")
            }
            ControllerOutcome::Cancelled => debug!(job_id = %self.job_id, "Reconnection controller cancelled"),
        }
        let _ = tx.send(ControllerEvent::Stopped(outcome.clone()).into()).await;
        outcome
    }

    async fn drive<T>(&mut self, tx: &mpsc::Sender<T>) -> ControllerOutcome
    where
        T: From<ControllerEvent> + Send,
    {
        loop {
            if self.cancel.is_cancelled() {
                return ControllerOutcome::Cancelled;
            }

            self.set_phase(ConnectionPhase::Connecting);
            if !self.stream_once(tx).await || self.cancel.is_cancelled() {
                return ControllerOutcome::Cancelled;
            }

            let next = self.attempt + 1;
            if next > self.max_attempts {
                return ControllerOutcome::Exhausted {
                    attempts: self.attempt,
                };
            }

            match self.gate(tx).await {
                GateDecision::Retry => {}
                GateDecision::Stop(status) => return ControllerOutcome::Finished(status),
                GateDecision::Cancelled => return ControllerOutcome::Cancelled,
            }

            self.attempt = next;
            let delay = self.backoff.delay(self.attempt);
            self.set_phase(ConnectionPhase::Reconnecting);
            info!(
                job_id = %self.job_id,
                attempt = self.attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to event stream"
            );
            let message = format!(
                "Reconnecting (attempt {}/{})",
                self.attempt, self.max_attempts
            );
            if !emit(tx, ControllerEvent::Stream(StreamEvent::Reconnecting(message))).await {
                return ControllerOutcome::Cancelled;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ControllerOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One connection: open, relay events until error or end of body.
    /// Returns false when the engine's queue is gone.
    async fn stream_once<T>(&mut self, tx: &mpsc::Sender<T>) -> bool
    where
        T: From<ControllerEvent> + Send,
    {
        let mut source = match self.connector.connect(&self.job_id).await {
            Ok(source) => source,
            Err(e) => {
                warn!(job_id = %self.job_id, attempt = self.attempt, error = %e, "Event stream connect failed");
                return true;
            }
        };

        // Only a connected frame that opens the stream acknowledges it.
        let mut first = true;
        while let Some(item) = source.next().await {
            let opening = std::mem::replace(&mut first, false);
            match item {
                Ok(StreamEvent::Connected) => {
                    if !opening {
                        debug!(job_id = %self.job_id, "Connected frame after other events ignored");
                        continue;
                    }
                    self.attempt = 0;
                    self.set_phase(ConnectionPhase::Connected);
                    info!(job_id = %self.job_id, "Event stream connected");
                    if !emit(tx, ControllerEvent::Stream(StreamEvent::Connected)).await {
                        return false;
                    }
                }
                Ok(event) => {
                    if opening {
                        debug!(job_id = %self.job_id, event = event.kind(), "Stream opened without connected acknowledgment");
                    }
                    if !emit(tx, ControllerEvent::Stream(event)).await {
                        return false;
                    }
                }
                Err(e) => {
                    warn!(job_id = %self.job_id, error = %e, "Event stream failed");
                    return true;
                }
            }
        }

        if !self.cancel.is_cancelled() {
            info!(job_id = %self.job_id, "Event stream ended without a job outcome");
        }
        true
    }

    async fn gate<T>(&self, tx: &mpsc::Sender<T>) -> GateDecision
    where
        T: From<ControllerEvent> + Send,
    {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return GateDecision::Cancelled,
            result = self.api.query_status(&self.job_id) => result,
        };

        match result {
            Ok(status) => {
                if !emit(tx, ControllerEvent::Gated(status)).await {
                    return GateDecision::Cancelled;
                }
                if status.is_processable() {
                    GateDecision::Retry
                } else {
                    GateDecision::Stop(status)
                }
            }
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Gating status query failed, assuming job is still active");
                GateDecision::Retry
            }
        }
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        self.phase.send_replace(phase);
    }
}

async fn emit<T>(tx: &mpsc::Sender<T>, event: ControllerEvent) -> bool
where
    T: From<ControllerEvent>,
{
    tx.send(event.into()).await.is_ok()
}

/// Handle to a spawned controller.
pub struct ControllerHandle {
    cancel: CancellationToken,
    phase: watch::Receiver<ConnectionPhase>,
    task: JoinHandle<ControllerOutcome>,
}

impl ControllerHandle {
    /// Stop the controller: aborts any in-flight read, clears a pending
    /// backoff wait and prevents further retries. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.borrow()
    }

    pub fn phase_receiver(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase.clone()
    }

    /// Wait for the controller task to finish.
    pub async fn join(self) -> ControllerOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Reconnection controller task failed");
                ControllerOutcome::Cancelled
            }
        }
    }
}

// crates/core/src/engine.rs
//! Job tracking engine.
//!
//! One engine tracks one job. Stream events, gating results, poll ticks,
//! reconciliation results and caller commands all land on a single queue and
//! are applied to the [`JobStateMachine`] one at a time by the engine task,
//! so state never needs a lock and arrival order is preserved across
//! channels.
//!
//! ```text
//! ReconnectionController ──┐
//! PollingFallback ─────────┼──► mpsc<Inbound> ──► engine task ──► watch<TrackerView>
//! reconcile queries ───────┤                         │              StateObserver
//! TrackerHandle commands ──┘                         └──► Persistence
//! ```

use std::sync::Arc;

use jobwatch_types::{ConnectionPhase, JobId, JobState, JobStatus};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::JobApi;
use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::controller::{ControllerEvent, ControllerHandle, ControllerOutcome, ReconnectionController};
use crate::error::TrackerError;
use crate::machine::{JobStateMachine, StatusSource, Transition};
use crate::persistence::{Persistence, SnapshotStore};
use crate::poller::{PollerHandle, PollingFallback, Polled};

const INBOUND_CAPACITY: usize = 64;

/// What observers and `subscribe()` receivers see after each mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerView {
    pub state: JobState,
    pub phase: ConnectionPhase,
    /// Transient display text such as "Reconnecting (attempt 2/10)".
    pub connection_message: Option<String>,
}

/// Callbacks invoked synchronously by the engine task. Keep them quick.
pub trait StateObserver: Send + Sync {
    /// After every applied mutation.
    fn on_state(&self, _view: &TrackerView) {}

    /// Once, when the job reaches a terminal status.
    fn on_terminal(&self, _state: &JobState) {}

    /// Caller-actionable failures: exhausted retries, rejected cancel.
    fn on_error(&self, _error: &TrackerError) {}
}

/// Collaborators for one engine instance.
#[derive(Clone)]
pub struct TrackerDeps {
    pub api: Arc<dyn JobApi>,
    pub store: Arc<dyn SnapshotStore>,
    pub clock: Arc<dyn Clock>,
    pub config: TrackerConfig,
    pub observer: Option<Arc<dyn StateObserver>>,
}

impl TrackerDeps {
    pub fn new(api: Arc<dyn JobApi>, store: Arc<dyn SnapshotStore>, config: TrackerConfig) -> Self {
        Self {
            api,
            store,
            clock: Arc::new(SystemClock),
            config,
            observer: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StateObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn persistence(&self) -> Persistence {
        Persistence::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.snapshot_ttl_chrono(),
        )
    }
}

/// Result of [`JobTracker::recover`].
pub enum Recovery {
    /// No fresh snapshot.
    Nothing,
    /// The snapshot described a job that is already settled. The snapshot
    /// has been cleared; this is its last known state.
    Settled(JobState),
    /// Tracking resumed for the persisted job.
    Resumed(JobTracker),
}

/// How tracking ended without an error.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingOutcome {
    /// The job reached a terminal status.
    Terminal(JobState),
    /// Stopped by `reset()` or `detach()`.
    Stopped(JobState),
}

enum Inbound {
    Controller(ControllerEvent),
    Polled(JobStatus),
    Reconciled(JobStatus),
    CancelAccepted,
    Stop {
        clear: bool,
        done: oneshot::Sender<()>,
    },
}

impl From<ControllerEvent> for Inbound {
    fn from(event: ControllerEvent) -> Self {
        Inbound::Controller(event)
    }
}

impl From<Polled> for Inbound {
    fn from(Polled(status): Polled) -> Self {
        Inbound::Polled(status)
    }
}

/// Cloneable control surface of a running engine.
#[derive(Clone)]
pub struct TrackerHandle {
    job_id: JobId,
    api: Arc<dyn JobApi>,
    persistence: Persistence,
    observer: Option<Arc<dyn StateObserver>>,
    tx: mpsc::Sender<Inbound>,
    view: watch::Receiver<TrackerView>,
    phase: watch::Receiver<ConnectionPhase>,
}

impl TrackerHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Latest published job state.
    pub fn state(&self) -> JobState {
        self.view.borrow().state.clone()
    }

    /// Live connection phase of the reconnection controller.
    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.borrow()
    }

    pub fn connection_message(&self) -> Option<String> {
        self.view.borrow().connection_message.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerView> {
        self.view.clone()
    }

    /// Ask the server to cancel the job. On success the local status moves to
    /// `Cancelling`; the terminal `Cancelled` arrives later over the stream or
    /// a poll. On failure tracking continues unchanged.
    pub async fn cancel_job(&self) -> Result<(), TrackerError> {
        if let Err(source) = self.api.cancel(&self.job_id).await {
            let err = TrackerError::Cancel {
                job_id: self.job_id.clone(),
                source,
            };
            warn!(job_id = %self.job_id, error = %err, "Cancel request rejected");
            if let Some(observer) = &self.observer {
                observer.on_error(&err);
            }
            return Err(err);
        }
        info!(job_id = %self.job_id, "Cancel request accepted");
        self.tx
            .send(Inbound::CancelAccepted)
            .await
            .map_err(|_| TrackerError::EngineGone(self.job_id.clone()))
    }

    /// Stop both channels, clear the snapshot and discard the state.
    /// Works after the engine has already stopped, e.g. on exhausted retries.
    pub async fn reset(&self) {
        if !self.stop(true).await {
            self.persistence.clear().await;
        }
        info!(job_id = %self.job_id, "Tracking reset");
    }

    /// Stop both channels but keep the snapshot so a later
    /// [`JobTracker::recover`] can resume.
    pub async fn detach(&self) {
        self.stop(false).await;
        info!(job_id = %self.job_id, "Tracking detached");
    }

    /// True when the engine acknowledged the stop.
    async fn stop(&self, clear: bool) -> bool {
        let (done, ack) = oneshot::channel();
        if self.tx.send(Inbound::Stop { clear, done }).await.is_err() {
            return false;
        }
        ack.await.is_ok()
    }
}

/// A running tracking engine for one job.
pub struct JobTracker {
    handle: TrackerHandle,
    task: JoinHandle<Result<TrackingOutcome, TrackerError>>,
}

impl JobTracker {
    /// Submit new work and start tracking it.
    ///
    /// Blank input is rejected before any request. A failed submission is
    /// returned as-is and never retried.
    pub async fn submit(deps: TrackerDeps, job_type: u32, input: &str) -> Result<Self, TrackerError> {
        if input.trim().is_empty() {
            return Err(TrackerError::EmptyInput);
        }

        let job_id = deps
            .api
            .submit(job_type, input)
            .await
            .map_err(TrackerError::Submit)?;
        info!(%job_id, job_type, "Job submitted");

        let state = JobState::new(job_id, input, deps.clock.now());
        deps.persistence().save(&state).await;
        Ok(Self::start(deps, state))
    }

    /// Startup recovery from the persisted snapshot.
    ///
    /// - no fresh snapshot: [`Recovery::Nothing`]
    /// - snapshot of a processing job: one reconciliation query; a terminal
    ///   answer settles it, anything else (including a failed query) resumes
    /// - snapshot of a settled job: one final status check, then cleared
    pub async fn recover(deps: TrackerDeps) -> Recovery {
        let persistence = deps.persistence();
        let Some(snapshot) = persistence.load().await else {
            return Recovery::Nothing;
        };

        let was_processing = snapshot.is_processing;
        let mut state = snapshot.into_state();
        let job_id = state.id().clone();
        info!(%job_id, status = %state.status(), was_processing, "Found job snapshot");

        let queried = match deps.api.query_status(&job_id).await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(%job_id, error = %e, "Recovery status query failed");
                None
            }
        };
        if let Some(status) = queried {
            if status != state.status() {
                state.set_status(status, deps.clock.now());
            }
        }

        if !was_processing || state.is_terminal() {
            persistence.clear().await;
            info!(%job_id, status = %state.status(), "Recovered job is settled, snapshot discarded");
            return Recovery::Settled(state);
        }

        if queried.is_some() {
            persistence.save(&state).await;
        }
        info!(%job_id, status = %state.status(), "Resuming job tracking");
        Recovery::Resumed(Self::start(deps, state))
    }

    fn start(deps: TrackerDeps, state: JobState) -> Self {
        let job_id = state.id().clone();
        let root = CancellationToken::new();
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let persistence = deps.persistence();

        let controller = ReconnectionController::new(
            Arc::clone(&deps.api),
            job_id.clone(),
            deps.config.backoff(),
            deps.config.max_reconnect_attempts,
            &root,
        );
        let phase = controller.phase();
        let poller = PollingFallback::new(
            Arc::clone(&deps.api),
            job_id.clone(),
            deps.config.poll_interval,
            &root,
        );

        let machine = JobStateMachine::new(state);
        let initial = TrackerView {
            state: machine.state().clone(),
            phase: *phase.borrow(),
            connection_message: None,
        };
        let (view_tx, view_rx) = watch::channel(initial);

        let controller = controller.spawn(tx.clone());
        let poller = poller.spawn(tx.clone());

        let engine = Engine {
            machine,
            api: Arc::clone(&deps.api),
            persistence: persistence.clone(),
            clock: Arc::clone(&deps.clock),
            observer: deps.observer.clone(),
            view: view_tx,
            phase: phase.clone(),
            root,
            tx: tx.clone(),
            reconciles: JoinSet::new(),
        };
        let task = tokio::spawn(engine.run(rx, controller, poller));

        Self {
            handle: TrackerHandle {
                job_id,
                api: deps.api,
                persistence,
                observer: deps.observer,
                tx,
                view: view_rx,
                phase,
            },
            task,
        }
    }

    /// Cloneable control surface, usable while [`wait`](Self::wait) runs.
    pub fn handle(&self) -> TrackerHandle {
        self.handle.clone()
    }

    pub fn job_id(&self) -> &JobId {
        self.handle.job_id()
    }

    pub fn state(&self) -> JobState {
        self.handle.state()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.handle.phase()
    }

    pub fn connection_message(&self) -> Option<String> {
        self.handle.connection_message()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerView> {
        self.handle.subscribe()
    }

    pub async fn cancel_job(&self) -> Result<(), TrackerError> {
        self.handle.cancel_job().await
    }

    pub async fn reset(&self) {
        self.handle.reset().await
    }

    pub async fn detach(&self) {
        self.handle.detach().await
    }

    /// Wait for tracking to end.
    pub async fn wait(self) -> Result<TrackingOutcome, TrackerError> {
        let job_id = self.handle.job_id.clone();
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(%job_id, error = %e, "Tracking engine task failed");
                Err(TrackerError::EngineGone(job_id))
            }
        }
    }
}

struct Engine {
    machine: JobStateMachine,
    api: Arc<dyn JobApi>,
    persistence: Persistence,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn StateObserver>>,
    view: watch::Sender<TrackerView>,
    phase: watch::Receiver<ConnectionPhase>,
    /// Parent of the controller and poller tokens.
    root: CancellationToken,
    tx: mpsc::Sender<Inbound>,
    reconciles: JoinSet<()>,
}

impl Engine {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Inbound>,
        controller: ControllerHandle,
        poller: PollerHandle,
    ) -> Result<TrackingOutcome, TrackerError> {
        let job_id = self.machine.state().id().clone();
        debug!(%job_id, "Tracking engine started");
        self.publish();

        let mut stop_ack = None;
        let result = loop {
            let Some(inbound) = rx.recv().await else {
                break Ok(TrackingOutcome::Stopped(self.machine.state().clone()));
            };
            let now = self.clock.now();

            let transition = match inbound {
                Inbound::Controller(ControllerEvent::Stream(event)) => {
                    self.machine.apply_event(event, now)
                }
                Inbound::Controller(ControllerEvent::Gated(status)) => {
                    self.machine.apply_status(status, StatusSource::Gate, now)
                }
                Inbound::Controller(ControllerEvent::Stopped(outcome)) => match outcome {
                    ControllerOutcome::Exhausted { attempts } => {
                        let err = TrackerError::RetriesExhausted {
                            job_id: job_id.clone(),
                            attempts,
                        };
                        if let Some(observer) = &self.observer {
                            observer.on_error(&err);
                        }
                        self.publish();
                        break Err(err);
                    }
                    ControllerOutcome::Finished(status) => {
                        // Stream is done with a non-terminal, non-processable
                        // status (Created or Cancelling). Polling carries on.
                        debug!(%job_id, %status, "Stream stopped, polling continues");
                        self.publish();
                        continue;
                    }
                    ControllerOutcome::Cancelled => continue,
                },
                Inbound::Polled(status) => self.machine.apply_status(status, StatusSource::Poll, now),
                Inbound::Reconciled(status) => {
                    self.machine.apply_status(status, StatusSource::Reconcile, now)
                }
                Inbound::CancelAccepted => {
                    self.machine
                        .apply_status(JobStatus::Cancelling, StatusSource::CancelRequest, now)
                }
                Inbound::Stop { clear, done } => {
                    if clear {
                        self.persistence.clear().await;
                    }
                    stop_ack = Some(done);
                    break Ok(TrackingOutcome::Stopped(self.machine.state().clone()));
                }
            };

            if self.commit(transition).await {
                break Ok(TrackingOutcome::Terminal(self.machine.state().clone()));
            }
            while self.reconciles.try_join_next().is_some() {}
        };

        // Stop both channels first, then unblock any sender parked on a full
        // queue before waiting for the tasks.
        self.root.cancel();
        rx.close();
        let _ = controller.join().await;
        poller.join().await;
        self.reconciles.shutdown().await;
        self.publish();

        if let Some(done) = stop_ack {
            let _ = done.send(());
        }
        debug!(%job_id, "Tracking engine stopped");
        result
    }

    /// Run the side effects of one applied input. True when tracking is over.
    async fn commit(&mut self, transition: Transition) -> bool {
        if transition.terminal {
            // Both channels stop before anything else runs.
            self.root.cancel();
            self.persistence.clear().await;
            self.publish();
            if let Some(observer) = &self.observer {
                observer.on_terminal(self.machine.state());
            }
            return true;
        }
        if transition.persist {
            self.persistence.save(self.machine.state()).await;
        }
        if transition.changed {
            self.publish();
        }
        if transition.reconcile {
            self.spawn_reconcile();
        }
        false
    }

    fn spawn_reconcile(&mut self) {
        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        let cancel = self.root.clone();
        let job_id = self.machine.state().id().clone();

        self.reconciles.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = api.query_status(&job_id) => result,
            };
            match result {
                Ok(status) => {
                    debug!(%job_id, %status, "Reconciled job status");
                    let _ = tx.send(Inbound::Reconciled(status)).await;
                }
                Err(e) => {
                    warn!(%job_id, error = %e, "Reconciliation query failed, keeping current status");
                }
            }
        });
    }

    fn publish(&self) {
        let view = TrackerView {
            state: self.machine.state().clone(),
            phase: *self.phase.borrow(),
            connection_message: self.machine.connection_message().map(str::to_owned),
        };
        if let Some(observer) = &self.observer {
            observer.on_state(&view);
        }
        self.view.send_replace(view);
    }
}

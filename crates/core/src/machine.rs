// crates/core/src/machine.rs
//! Job state machine: the single owner of the canonical [`JobState`].
//!
//! Inputs arrive one at a time from the engine's queue: relayed stream events
//! and status observations (poll ticks, reconciliation and gating queries,
//! accepted cancel requests). Each input is applied as one step and reports a
//! [`Transition`] telling the engine which side effects to run.
//!
//! Once a terminal status is applied the machine is finished and ignores
//! everything else, so a terminal status arriving over both channels is
//! harmless.
//!
//! Progress fragments the server emits while the stream is down are not
//! recovered. Reconnecting triggers a status reconciliation only; the text
//! missed during the gap stays missing.

use chrono::{DateTime, Utc};
use jobwatch_types::{JobState, JobStatus, StreamEvent};
use tracing::{debug, info};

/// Where a status observation came from. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    Stream,
    Poll,
    Reconcile,
    Gate,
    CancelRequest,
}

impl StatusSource {
    fn as_str(&self) -> &'static str {
        match self {
            StatusSource::Stream => "stream",
            StatusSource::Poll => "poll",
            StatusSource::Reconcile => "reconcile",
            StatusSource::Gate => "gate",
            StatusSource::CancelRequest => "cancel",
        }
    }
}

/// Side effects requested by one applied input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// The published view changed; observers must be notified.
    pub changed: bool,
    /// Canonical state changed; the snapshot must be rewritten.
    pub persist: bool,
    /// Issue a one-shot status reconciliation query.
    pub reconcile: bool,
    /// A terminal status was just applied. Stop everything.
    pub terminal: bool,
}

impl Transition {
    fn ignored() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct JobStateMachine {
    state: JobState,
    connection_message: Option<String>,
    finished: bool,
}

impl JobStateMachine {
    pub fn new(state: JobState) -> Self {
        let finished = state.is_terminal();
        Self {
            state,
            connection_message: None,
            finished,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn into_state(self) -> JobState {
        self.state
    }

    /// Transient connection status for display. Never affects `status`.
    pub fn connection_message(&self) -> Option<&str> {
        self.connection_message.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn apply_event(&mut self, event: StreamEvent, now: DateTime<Utc>) -> Transition {
        if self.finished {
            debug!(job_id = %self.state.id(), event = event.kind(), "Ignoring event after terminal status");
            return Transition::ignored();
        }

        match event {
            StreamEvent::Connected => {
                self.connection_message = None;
                Transition {
                    changed: true,
                    reconcile: true,
                    ..Transition::default()
                }
            }
            StreamEvent::Progress(fragment) => {
                self.state.append_progress(&fragment, now);
                Transition {
                    changed: true,
                    persist: true,
                    ..Transition::default()
                }
            }
            StreamEvent::StatusChanged(status) => {
                self.apply_status(status, StatusSource::Stream, now)
            }
            StreamEvent::Reconnecting(message) => {
                self.connection_message = Some(message);
                Transition {
                    changed: true,
                    ..Transition::default()
                }
            }
            StreamEvent::Disconnected => {
                self.connection_message = Some("Disconnected".to_string());
                Transition {
                    changed: true,
                    ..Transition::default()
                }
            }
        }
    }

    /// Apply a status observation. The latest observation wins, except that
    /// a terminal status is never replaced.
    pub fn apply_status(
        &mut self,
        status: JobStatus,
        source: StatusSource,
        now: DateTime<Utc>,
    ) -> Transition {
        if self.finished {
            debug!(job_id = %self.state.id(), %status, source = source.as_str(), "Ignoring status after terminal status");
            return Transition::ignored();
        }
        if status == self.state.status() {
            return Transition::ignored();
        }

        debug!(
            job_id = %self.state.id(),
            from = %self.state.status(),
            to = %status,
            source = source.as_str(),
            "Job status changed"
        );
        self.state.set_status(status, now);

        if status.is_terminal() {
            self.finished = true;
            self.connection_message = None;
            info!(job_id = %self.state.id(), %status, source = source.as_str(), "Job reached terminal status");
            return Transition {
                changed: true,
                terminal: true,
                ..Transition::default()
            };
        }

        Transition {
            changed: true,
            persist: true,
            ..Transition::default()
        }
    }
}

// crates/types/src/event.rs
use crate::status::JobStatus;

/// Typed event surfaced by the event stream connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Server acknowledged the stream.
    Connected,
    /// A fragment of progress text, to be appended.
    Progress(String),
    /// The job moved to a new status.
    StatusChanged(JobStatus),
    /// Connection is being re-established. Display only.
    Reconnecting(String),
    /// Connection dropped. Display only.
    Disconnected,
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Connected => "connected",
            StreamEvent::Progress(_) => "progress",
            StreamEvent::StatusChanged(_) => "status",
            StreamEvent::Reconnecting(_) => "reconnecting",
            StreamEvent::Disconnected => "disconnected",
        }
    }
}

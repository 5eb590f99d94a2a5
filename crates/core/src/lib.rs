// crates/core/src/lib.rs
pub mod api;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod http;
pub mod identity;
pub mod machine;
pub mod paths;
pub mod persistence;
pub mod poller;
pub mod sse;

pub use api::{ByteStream, JobApi};
pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TrackerConfig;
pub use controller::{ControllerEvent, ControllerOutcome, ReconnectionController};
pub use engine::*;
pub use error::*;
pub use http::HttpJobApi;
pub use persistence::{FileSnapshotStore, MemorySnapshotStore, Persistence, SnapshotStore};
pub use poller::PollingFallback;
pub use sse::EventStreamConnector;

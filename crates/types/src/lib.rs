// crates/types/src/lib.rs
//! Shared data model for the jobwatch workspace.
//!
//! Everything here is plain data: job identity and status, the canonical
//! job state, the typed stream events, the recovery snapshot and the JSON
//! bodies exchanged with the jobs API.

pub mod event;
pub mod job;
pub mod status;
pub mod wire;

pub use event::*;
pub use job::*;
pub use status::*;
pub use wire::*;

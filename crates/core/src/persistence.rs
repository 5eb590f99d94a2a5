// crates/core/src/persistence.rs
//! Recovery snapshot storage.
//!
//! The snapshot is a convenience for surviving restarts, never the source of
//! truth for a live engine. Every failure here is logged and swallowed by
//! [`Persistence`]; stores themselves report errors so tests can see them.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jobwatch_types::{JobState, Snapshot};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::PersistenceError;

/// Single-slot snapshot storage.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Overwrite the stored snapshot.
    async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError>;

    /// Read the stored snapshot, if any. No staleness filtering.
    async fn load(&self) -> Result<Option<Snapshot>, PersistenceError>;

    /// Remove the stored snapshot. Removing nothing is not an error.
    async fn clear(&self) -> Result<(), PersistenceError>;
}

/// JSON file on local disk, replaced atomically (temp file + rename).
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec(snapshot).map_err(|source| PersistenceError::Json {
            path: self.path.clone(),
            source,
        })?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::io(parent, e))?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| PersistenceError::io(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| PersistenceError::io(&self.path, e))
    }

    async fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| PersistenceError::Json {
                path: self.path.clone(),
                source,
            })
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::io(&self.path, e)),
        }
    }
}

/// In-process store for tests and sessions without durable storage.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            slot: Mutex::new(Some(snapshot)),
        }
    }

    /// Synchronous read for assertions.
    pub fn peek(&self) -> Option<Snapshot> {
        match self.slot.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn put(&self, value: Option<Snapshot>) {
        match self.slot.lock() {
            Ok(mut slot) => *slot = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        self.put(Some(snapshot.clone()));
        Ok(())
    }

    async fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        Ok(self.peek())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        self.put(None);
        Ok(())
    }
}

/// Failure-tolerant front for a [`SnapshotStore`] that stamps write times and
/// enforces the snapshot TTL.
#[derive(Clone)]
pub struct Persistence {
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl Persistence {
    pub fn new(store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>, ttl: chrono::Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub async fn save(&self, state: &JobState) {
        let snapshot = Snapshot::capture(state, self.clock.now());
        match self.store.save(&snapshot).await {
            Ok(()) => debug!(job_id = %snapshot.job_id, status = %snapshot.status, "Snapshot saved"),
            Err(e) => warn!(job_id = %snapshot.job_id, error = %e, "Failed to save snapshot (non-fatal)"),
        }
    }

    /// Load a fresh snapshot. Stale or unreadable snapshots are cleared and
    /// reported as absent.
    pub async fn load(&self) -> Option<Snapshot> {
        let snapshot = match self.store.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable snapshot");
                self.clear().await;
                return None;
            }
        };

        if snapshot.is_stale(self.clock.now(), self.ttl) {
            debug!(
                job_id = %snapshot.job_id,
                written = %snapshot.timestamp,
                "Discarding stale snapshot"
            );
            self.clear().await;
            return None;
        }
        Some(snapshot)
    }

    pub async fn clear(&self) {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear snapshot (non-fatal)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, Utc};
    use jobwatch_types::{JobId, JobStatus};
    use pretty_assertions::assert_eq;

    fn state() -> JobState {
        let mut state = JobState::new(JobId::new("j1"), "input", Utc::now());
        state.set_status(JobStatus::Running, Utc::now());
        state.append_progress("partial", Utc::now());
        state
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("sub").join("snap.json"));
        assert_eq!(store.load().await.unwrap(), None);

        let snapshot = Snapshot::capture(&state(), Utc::now());
        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(snapshot.clone()));
        assert!(!store.path().with_extension("json.tmp").exists());

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
        // Idempotent.
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_reports_corrupt_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        std::fs::write(&path, "{ truncated").unwrap();

        let store = FileSnapshotStore::new(&path);
        assert!(matches!(store.load().await, Err(PersistenceError::Json { .. })));
    }

    #[tokio::test]
    async fn test_persistence_discards_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        std::fs::write(&path, "not json").unwrap();

        let persistence = Persistence::new(
            Arc::new(FileSnapshotStore::new(&path)),
            Arc::new(ManualClock::new(Utc::now())),
            Duration::hours(24),
        );
        assert_eq!(persistence.load().await, None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_persistence_stamps_and_enforces_ttl() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(MemorySnapshotStore::new());
        let persistence = Persistence::new(store.clone(), clock.clone(), Duration::hours(24));

        persistence.save(&state()).await;
        assert_eq!(store.peek().unwrap().timestamp, start);

        clock.advance(Duration::hours(23));
        assert!(persistence.load().await.is_some());

        clock.advance(Duration::hours(2));
        assert_eq!(persistence.load().await, None);
        // Stale snapshot is removed, not just skipped.
        assert_eq!(store.peek(), None);
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_never_applied_even_if_valid() {
        let now = Utc::now();
        let mut snapshot = Snapshot::capture(&state(), now - Duration::hours(30));
        snapshot.is_processing = true;
        let store = Arc::new(MemorySnapshotStore::with_snapshot(snapshot));
        let persistence =
            Persistence::new(store.clone(), Arc::new(ManualClock::new(now)), Duration::hours(24));

        assert_eq!(persistence.load().await, None);
    }
}

//! AttendanceRecorder - Durable, debounced attendance sink
//!
//! ## Responsibilities
//!
//! - Debounce per (employee, direction) within a configurable window;
//!   the first event wins
//! - Flush accepted events to the durable store with exponential backoff
//! - Spill to a local append-only file when the store stays down, so no
//!   accepted event is silently lost

mod store;

pub use store::{AttendanceStore, MemoryStore, SqliteStore};

use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

/// Crossing direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Enter,
    Exit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Enter => "enter",
            Direction::Exit => "exit",
        }
    }
}

/// One attendance event, emitted at a tripwire crossing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub timestamp: DateTime<Utc>,
    pub employee_id: String,
    pub camera_id: String,
    pub tripwire_id: u32,
    pub direction: Direction,
    pub confidence: f32,
}

/// Outcome of a record attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Accepted,
    Debounced,
}

/// AttendanceRecorder instance
pub struct AttendanceRecorder {
    store: Arc<dyn AttendanceStore>,
    /// Most recent accepted event per (employee, direction)
    debounce: RwLock<HashMap<(String, Direction), DateTime<Utc>>>,
    /// Store writes are serialized
    write_guard: Mutex<()>,
    window: ChronoDuration,
    retry_ceiling: Duration,
    spill_path: PathBuf,
    store_healthy: AtomicBool,
}

impl AttendanceRecorder {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        debounce_window: Duration,
        retry_ceiling: Duration,
        spill_path: PathBuf,
    ) -> Self {
        Self {
            store,
            debounce: RwLock::new(HashMap::new()),
            write_guard: Mutex::new(()),
            window: ChronoDuration::from_std(debounce_window)
                .unwrap_or_else(|_| ChronoDuration::seconds(300)),
            retry_ceiling,
            spill_path,
            store_healthy: AtomicBool::new(true),
        }
    }

    /// Whether the last persist reached the durable store
    pub fn store_healthy(&self) -> bool {
        self.store_healthy.load(Ordering::Relaxed)
    }

    /// Record an event. Within the debounce window the first event wins;
    /// later ones return `Debounced` without touching the store.
    pub async fn record(&self, event: AttendanceEvent) -> Result<RecordOutcome> {
        let key = (event.employee_id.clone(), event.direction);

        {
            let mut debounce = self.debounce.write().await;
            if let Some(last) = debounce.get(&key) {
                if event.timestamp - *last < self.window {
                    tracing::debug!(
                        employee_id = %event.employee_id,
                        direction = event.direction.as_str(),
                        "Attendance event debounced"
                    );
                    return Ok(RecordOutcome::Debounced);
                }
            }
            debounce.insert(key, event.timestamp);
        }

        tracing::info!(
            employee_id = %event.employee_id,
            camera_id = %event.camera_id,
            tripwire_id = event.tripwire_id,
            direction = event.direction.as_str(),
            confidence = event.confidence,
            "Attendance event accepted"
        );

        self.persist(&event).await?;
        Ok(RecordOutcome::Accepted)
    }

    /// Accepted events for one employee within the trailing window
    pub async fn recent_for(
        &self,
        employee_id: &str,
        window: Duration,
    ) -> Result<Vec<AttendanceEvent>> {
        let to = Utc::now();
        let from = to
            - ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::seconds(0));
        self.store.list_by_employee(employee_id, from, to).await
    }

    /// Flush one event to the store, retrying with jittered exponential
    /// backoff; exhausted retries spill the event and surface
    /// `StoreUnavailable`.
    async fn persist(&self, event: &AttendanceEvent) -> Result<()> {
        let _guard = self.write_guard.lock().await;

        let started = tokio::time::Instant::now();
        let mut delay = Duration::from_millis(500);
        let mut last_error: Option<Error> = None;

        loop {
            match self.store.append(event).await {
                Ok(()) => {
                    self.store_healthy.store(true, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        employee_id = %event.employee_id,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Attendance store append failed"
                    );
                    last_error = Some(e);
                }
            }

            if started.elapsed() + delay > self.retry_ceiling {
                break;
            }

            let jitter = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
            tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
            delay = (delay * 2).min(self.retry_ceiling);
        }

        self.store_healthy.store(false, Ordering::Relaxed);
        self.spill(event).await?;

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Err(Error::StoreUnavailable(reason))
    }

    /// Append the event to the local spill file, one JSON record per line
    async fn spill(&self, event: &AttendanceEvent) -> Result<()> {
        let line = serde_json::to_string(event)
            .map_err(|e| Error::SpillFull(format!("serialize: {e}")))?;

        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.spill_path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                tracing::warn!(
                    employee_id = %event.employee_id,
                    spill_path = %self.spill_path.display(),
                    "Attendance event spilled to local file"
                );
                Ok(())
            }
            Err(e) => Err(Error::SpillFull(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    fn event(employee_id: &str, direction: Direction) -> AttendanceEvent {
        AttendanceEvent {
            timestamp: Utc::now(),
            employee_id: employee_id.to_string(),
            camera_id: "cam-1".to_string(),
            tripwire_id: 1,
            direction,
            confidence: 0.92,
        }
    }

    fn recorder(store: Arc<dyn AttendanceStore>, spill: PathBuf) -> AttendanceRecorder {
        AttendanceRecorder::new(
            store,
            Duration::from_secs(300),
            Duration::from_millis(50),
            spill,
        )
    }

    #[tokio::test]
    async fn test_second_event_within_window_debounced() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let rec = recorder(store.clone(), dir.path().join("spill.jsonl"));

        let first = rec.record(event("E001", Direction::Enter)).await.unwrap();
        let second = rec.record(event("E001", Direction::Enter)).await.unwrap();

        assert_eq!(first, RecordOutcome::Accepted);
        assert_eq!(second, RecordOutcome::Debounced);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_directions_debounce_independently() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let rec = recorder(store.clone(), dir.path().join("spill.jsonl"));

        rec.record(event("E001", Direction::Enter)).await.unwrap();
        let exit = rec.record(event("E001", Direction::Exit)).await.unwrap();

        assert_eq!(exit, RecordOutcome::Accepted);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_different_employees_not_debounced() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let rec = recorder(store.clone(), dir.path().join("spill.jsonl"));

        rec.record(event("E001", Direction::Enter)).await.unwrap();
        let other = rec.record(event("E002", Direction::Enter)).await.unwrap();
        assert_eq!(other, RecordOutcome::Accepted);
    }

    /// Store that always fails
    struct DownStore {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl AttendanceStore for DownStore {
        async fn append(&self, _event: &AttendanceEvent) -> crate::error::Result<()> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            Err(Error::Internal("store down".to_string()))
        }

        async fn list_by_employee(
            &self,
            _employee_id: &str,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> crate::error::Result<Vec<AttendanceEvent>> {
            Ok(Vec::new())
        }

        async fn list_by_range(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> crate::error::Result<Vec<AttendanceEvent>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_store_failure_spills_event() {
        let dir = tempfile::tempdir().unwrap();
        let spill_path = dir.path().join("spill.jsonl");
        let store = Arc::new(DownStore {
            attempts: AtomicU32::new(0),
        });
        let rec = recorder(store.clone(), spill_path.clone());

        let err = rec.record(event("E001", Direction::Enter)).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert!(!rec.store_healthy());
        assert!(store.attempts.load(Ordering::Relaxed) >= 1);

        let spilled = std::fs::read_to_string(&spill_path).unwrap();
        let parsed: AttendanceEvent = serde_json::from_str(spilled.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.employee_id, "E001");
        assert_eq!(parsed.direction, Direction::Enter);
    }

    #[tokio::test]
    async fn test_recent_for_returns_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let rec = recorder(store, dir.path().join("spill.jsonl"));

        rec.record(event("E001", Direction::Enter)).await.unwrap();
        let recent = rec
            .recent_for("E001", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].employee_id, "E001");
    }
}

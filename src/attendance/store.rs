//! AttendanceStore adapter - durable sink behind the recorder
//!
//! The reference deployment persists to a relational database; the core
//! only depends on append/list semantics, so any adapter works and the
//! service starts without a database at all.

use super::{AttendanceEvent, Direction};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;

/// Durable attendance sink
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn append(&self, event: &AttendanceEvent) -> Result<()>;

    async fn list_by_employee(
        &self,
        employee_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AttendanceEvent>>;

    async fn list_by_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AttendanceEvent>>;
}

/// In-memory store; default when no database is configured, and the
/// backing for tests
pub struct MemoryStore {
    events: RwLock<Vec<AttendanceEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    async fn append(&self, event: &AttendanceEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn list_by_employee(
        &self,
        employee_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AttendanceEvent>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| {
                e.employee_id == employee_id && e.timestamp >= from && e.timestamp <= to
            })
            .cloned()
            .collect())
    }

    async fn list_by_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AttendanceEvent>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .cloned()
            .collect())
    }
}

/// SQLite-backed store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and ensure the schema exists
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS attendance_events (\
             id INTEGER PRIMARY KEY AUTOINCREMENT, \
             employee_id TEXT NOT NULL, \
             camera_id TEXT NOT NULL, \
             tripwire_id INTEGER NOT NULL, \
             direction TEXT NOT NULL, \
             timestamp TEXT NOT NULL, \
             confidence REAL NOT NULL)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_attendance_employee \
             ON attendance_events (employee_id, timestamp)",
        )
        .execute(&pool)
        .await?;

        tracing::info!(database_url = %database_url, "Attendance store connected");
        Ok(Self { pool })
    }
}

#[async_trait]
impl AttendanceStore for SqliteStore {
    async fn append(&self, event: &AttendanceEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO attendance_events \
             (employee_id, camera_id, tripwire_id, direction, timestamp, confidence) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.employee_id)
        .bind(&event.camera_id)
        .bind(event.tripwire_id)
        .bind(event.direction.as_str())
        .bind(event.timestamp.to_rfc3339())
        .bind(event.confidence)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_employee(
        &self,
        employee_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AttendanceEvent>> {
        let rows = sqlx::query(
            "SELECT employee_id, camera_id, tripwire_id, direction, timestamp, confidence \
             FROM attendance_events \
             WHERE employee_id = ? AND timestamp >= ? AND timestamp <= ? \
             ORDER BY timestamp",
        )
        .bind(employee_id)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_event).collect()
    }

    async fn list_by_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AttendanceEvent>> {
        let rows = sqlx::query(
            "SELECT employee_id, camera_id, tripwire_id, direction, timestamp, confidence \
             FROM attendance_events \
             WHERE timestamp >= ? AND timestamp <= ? \
             ORDER BY timestamp",
        )
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_event).collect()
    }
}

fn row_to_event(row: sqlx::sqlite::SqliteRow) -> Result<AttendanceEvent> {
    let direction = match row.get::<String, _>("direction").as_str() {
        "enter" => Direction::Enter,
        "exit" => Direction::Exit,
        other => {
            return Err(Error::Internal(format!(
                "corrupt direction in store: {other}"
            )))
        }
    };

    let timestamp = DateTime::parse_from_rfc3339(&row.get::<String, _>("timestamp"))
        .map_err(|e| Error::Internal(format!("corrupt timestamp in store: {e}")))?
        .with_timezone(&Utc);

    Ok(AttendanceEvent {
        timestamp,
        employee_id: row.get("employee_id"),
        camera_id: row.get("camera_id"),
        tripwire_id: row.get::<i64, _>("tripwire_id") as u32,
        direction,
        confidence: row.get::<f64, _>("confidence") as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(employee_id: &str) -> AttendanceEvent {
        AttendanceEvent {
            timestamp: Utc::now(),
            employee_id: employee_id.to_string(),
            camera_id: "cam-1".to_string(),
            tripwire_id: 2,
            direction: Direction::Exit,
            confidence: 0.8,
        }
    }

    #[tokio::test]
    async fn test_sqlite_append_and_query() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.append(&event("E001")).await.unwrap();
        store.append(&event("E002")).await.unwrap();

        let from = Utc::now() - chrono::Duration::minutes(1);
        let to = Utc::now() + chrono::Duration::minutes(1);

        let one = store.list_by_employee("E001", from, to).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].employee_id, "E001");
        assert_eq!(one[0].direction, Direction::Exit);
        assert_eq!(one[0].tripwire_id, 2);

        let all = store.list_by_range(from, to).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_range_excludes_outside() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.append(&event("E001")).await.unwrap();

        let from = Utc::now() + chrono::Duration::minutes(5);
        let to = Utc::now() + chrono::Duration::minutes(10);
        let none = store.list_by_range(from, to).await.unwrap();
        assert!(none.is_empty());
    }
}

//! SQLite-backed store.
//!
//! The event id is the primary key and inserts use `INSERT OR IGNORE`, so a
//! repeated store is a no-op and each record lands in a single statement.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode};
use tracing::debug;

use super::{CapabilityError, EventStore};
use crate::domain::EnrichedEvent;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS enriched_events (
    event_id    TEXT PRIMARY KEY,
    record      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    enriched_at TEXT NOT NULL
);
";

/// Store backed by a single SQLite connection
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite store: {}", path.display()))?;
        Self::init(conn)
    }

    /// Private in-memory database, gone when the store is dropped
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite store")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create enriched_events table")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Number of stored records
    pub async fn count(&self) -> Result<u64> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM enriched_events", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
        .context("SQLite task panicked")?
    }

    /// Most recently enriched records first
    pub async fn records(&self, limit: usize) -> Result<Vec<EnrichedEvent>> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<Vec<EnrichedEvent>> {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let mut stmt = conn.prepare(
                "SELECT record FROM enriched_events ORDER BY enriched_at DESC, event_id LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;

            let mut records = Vec::new();
            for row in rows {
                let json = row?;
                let record: EnrichedEvent = serde_json::from_str(&json)
                    .with_context(|| format!("Failed to parse record: {}", json))?;
                records.push(record);
            }
            Ok(records)
        })
        .await
        .context("SQLite task panicked")?
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn store(&self, event: &EnrichedEvent) -> Result<(), CapabilityError> {
        let json = serde_json::to_string(event)
            .map_err(|e| CapabilityError::permanent(format!("Failed to serialize record: {}", e)))?;
        let event_id = event.event_id().to_string();
        let created_at = event.created_at().to_rfc3339();
        let enriched_at = event.enriched_at().to_rfc3339();
        let conn = Arc::clone(&self.conn);

        let inserted = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            conn.execute(
                "INSERT OR IGNORE INTO enriched_events (event_id, record, created_at, enriched_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![event_id, json, created_at, enriched_at],
            )
        })
        .await
        .map_err(|e| CapabilityError::transient(format!("SQLite task failed: {}", e)))?
        .map_err(classify)?;

        if inserted == 0 {
            debug!(event_id = %event.event_id(), "Record already stored");
        }
        Ok(())
    }
}

/// Busy and locked databases clear up on their own; anything else will not
fn classify(err: rusqlite::Error) -> CapabilityError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            CapabilityError::transient(err.to_string())
        }
        _ => CapabilityError::permanent(err.to_string()),
    }
}

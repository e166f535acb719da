//! Append-only store with file-based persistence.
//!
//! Enriched events are stored as newline-delimited JSON (JSONL) for simplicity
//! and easy inspection. The set of stored ids is rebuilt by replay on open.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{CapabilityError, EventStore};
use crate::domain::{EnrichedEvent, EventId};

/// File-based store using JSONL format
pub struct JsonlStore {
    /// Path to the records file
    path: PathBuf,

    /// Held across the append so writes are serialized
    state: Mutex<State>,
}

struct State {
    /// Ids already on disk
    stored: HashSet<EventId>,

    /// File length covering only complete records
    committed: u64,
}

impl JsonlStore {
    /// Create or open a store, replaying existing records.
    ///
    /// A partial record at the end of the file (a write cut short by a crash)
    /// is truncated away. A bad record anywhere else fails the open.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;
        }

        let (records, committed) = load(&path).await?;
        let stored: HashSet<EventId> = records.iter().map(|r| r.event_id().clone()).collect();
        debug!(path = %path.display(), records = stored.len(), "Opened JSONL store");

        Ok(Self {
            path,
            state: Mutex::new(State { stored, committed }),
        })
    }

    /// Get the path to the records file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct records on disk
    pub async fn len(&self) -> usize {
        self.state.lock().await.stored.len()
    }

    pub async fn contains(&self, id: &EventId) -> bool {
        self.state.lock().await.stored.contains(id)
    }

    /// Replay all complete records in write order
    pub async fn replay(&self) -> Result<Vec<EnrichedEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read store file: {}", self.path.display()))?;
        let (records, _) = parse_records(&bytes)?;
        Ok(records)
    }

    /// Append one line, leaving the file at `committed` bytes if any step fails
    async fn append(&self, committed: u64, line: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        // An earlier failed append may have left a fragment behind
        if file.metadata().await?.len() > committed {
            file.set_len(committed).await?;
        }

        if let Err(e) = write_line(&mut file, line).await {
            if let Err(undo) = file.set_len(committed).await {
                warn!(
                    path = %self.path.display(),
                    error = %undo,
                    "Failed to roll back partial append"
                );
            }
            return Err(e);
        }
        Ok(())
    }
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    // One write per record keeps a record from being split across lines
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

#[async_trait]
impl EventStore for JsonlStore {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn store(&self, event: &EnrichedEvent) -> Result<(), CapabilityError> {
        let mut state = self.state.lock().await;

        if state.stored.contains(event.event_id()) {
            debug!(event_id = %event.event_id(), "Record already stored, skipping append");
            return Ok(());
        }

        let json = serde_json::to_string(event)
            .map_err(|e| CapabilityError::permanent(format!("Failed to serialize record: {}", e)))?;
        let line = format!("{}\n", json);

        self.append(state.committed, line.as_bytes()).await.map_err(|e| {
            CapabilityError::transient(format!(
                "Failed to append to {}: {}",
                self.path.display(),
                e
            ))
        })?;

        state.committed += line.len() as u64;
        state.stored.insert(event.event_id().clone());
        Ok(())
    }
}

/// Read the file, repairing its tail, and return the records with the file's new length
async fn load(path: &Path) -> Result<(Vec<EnrichedEvent>, u64)> {
    if !path.exists() {
        return Ok((Vec::new(), 0));
    }

    let bytes = fs::read(path)
        .await
        .with_context(|| format!("Failed to read store file: {}", path.display()))?;
    let (records, intact) = parse_records(&bytes)?;
    let mut len = intact as u64;

    if intact < bytes.len() {
        warn!(
            path = %path.display(),
            dropped_bytes = bytes.len() - intact,
            "Truncating partial record at end of store file"
        );
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open store file: {}", path.display()))?;
        file.set_len(len)
            .await
            .with_context(|| format!("Failed to truncate store file: {}", path.display()))?;
        file.sync_all().await?;
    }

    // The next append must start on its own line
    if intact > 0 && bytes[intact - 1] != b'\n' {
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open store file: {}", path.display()))?;
        write_line(&mut file, b"\n").await?;
        len += 1;
    }

    Ok((records, len))
}

/// Parse records, tolerating a bad final line.
///
/// Returns the records and the length of the prefix holding them.
fn parse_records(bytes: &[u8]) -> Result<(Vec<EnrichedEvent>, usize)> {
    let mut records = Vec::new();
    let mut offset = 0;

    for (index, line) in bytes.split_inclusive(|b| *b == b'\n').enumerate() {
        let start = offset;
        offset += line.len();

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<EnrichedEvent>(line) {
            Ok(record) => records.push(record),
            Err(_) if bytes[offset..].iter().all(u8::is_ascii_whitespace) => {
                return Ok((records, start));
            }
            Err(e) => {
                return Err(anyhow!(
                    "Failed to parse record on line {}: {}: {}",
                    index + 1,
                    e,
                    String::from_utf8_lossy(line).trim_end()
                ));
            }
        }
    }

    Ok((records, bytes.len()))
}

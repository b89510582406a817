//! Durable storage for the status history.
//!
//! The history lives in a single key-value slot (`HISTORY_KEY`) as a JSON array,
//! newest first. Stores report faults as `StoreError`; deciding what to do about
//! them is left to the caller.

use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::warn;

use crate::{HistoryRecord, HISTORY_KEY};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access history slot: {0}")]
    Io(#[from] io::Error),

    #[error("history slot is not a JSON array: {0}")]
    Parse(serde_json::Error),

    #[error("failed to serialize history: {0}")]
    Serialize(serde_json::Error),
}

pub trait HistoryStore: Send + Sync + Debug {
    /// Reads the slot. A missing slot is an empty history.
    fn load(&self) -> Result<Vec<HistoryRecord>, StoreError>;

    /// Overwrites the slot with `history`.
    fn save(&self, history: &[HistoryRecord]) -> Result<(), StoreError>;
}

/// Decodes a slot's contents, dropping records that don't parse.
pub fn decode_history(raw: &str) -> Result<Vec<HistoryRecord>, StoreError> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(raw).map_err(StoreError::Parse)?;
    let total = entries.len();
    let records: Vec<HistoryRecord> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Dropping malformed history record {index}: {e}");
                None
            }
        })
        .collect();
    if records.len() < total {
        warn!("Loaded {} of {} history records", records.len(), total);
    }
    Ok(records)
}

pub fn encode_history(history: &[HistoryRecord]) -> Result<String, StoreError> {
    serde_json::to_string(history).map_err(StoreError::Serialize)
}

/// Stores each slot as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$XDG_DATA_HOME/panwatch`, else `$HOME/.local/share/panwatch`, else `./.panwatch`.
    pub fn default_location() -> Self {
        let dir = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share"))
            })
            .map_or_else(|| PathBuf::from(".panwatch"), |base| base.join("panwatch"));
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn slot_path(&self) -> PathBuf {
        self.dir.join(format!("{HISTORY_KEY}.json"))
    }
}

impl HistoryStore for FileStore {
    fn load(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        match fs::read_to_string(self.slot_path()) {
            Ok(raw) => decode_history(&raw),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, history: &[HistoryRecord]) -> Result<(), StoreError> {
        let encoded = encode_history(history)?;
        fs::create_dir_all(&self.dir)?;
        // Write beside the slot and rename over it so readers never see a partial file.
        let tmp = self.dir.join(format!("{HISTORY_KEY}.json.tmp"));
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, self.slot_path())?;
        Ok(())
    }
}

/// Keeps the slot in memory. History survives only as long as the store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose slot already holds `raw`, valid or not.
    pub fn with_contents(raw: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(raw.into())),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl HistoryStore for MemoryStore {
    fn load(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        match self.lock().as_deref() {
            Some(raw) => decode_history(raw),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, history: &[HistoryRecord]) -> Result<(), StoreError> {
        let encoded = encode_history(history)?;
        *self.lock() = Some(encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn sample_history() -> Vec<HistoryRecord> {
        let base = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        vec![
            HistoryRecord {
                checked_at: base + Duration::milliseconds(60_123),
                response_time_ms: 80,
                is_healthy: true,
                error: None,
            },
            HistoryRecord {
                checked_at: base + Duration::milliseconds(30_456),
                response_time_ms: 30_000,
                is_healthy: false,
                error: Some("timeout".to_string()),
            },
            HistoryRecord {
                checked_at: base,
                response_time_ms: 50,
                is_healthy: true,
                error: None,
            },
        ]
    }

    #[test]
    fn file_store_round_trips_history() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        let history = sample_history();

        store.save(&history).unwrap();
        assert!(store.slot_path().ends_with("api_status_history.json"));
        assert_eq!(store.load().unwrap(), history);
    }

    #[test]
    fn file_store_missing_slot_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn file_store_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store.save(&sample_history()).unwrap();
        store.save(&[]).unwrap();
        assert!(store.load().unwrap().is_empty());
        assert_eq!(fs::read_to_string(store.slot_path()).unwrap(), "[]");
    }

    #[test]
    fn file_store_invalid_json_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        fs::write(store.slot_path(), "not valid json").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Parse(_))));
    }

    #[test]
    fn file_store_save_into_a_file_path_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let store = FileStore::new(&blocker);
        assert!(matches!(store.save(&sample_history()), Err(StoreError::Io(_))));
    }

    #[test]
    fn malformed_records_are_dropped_individually() {
        let raw = r#"[
            {"timestamp": "2026-10-16T09:01:00.000Z", "responseTime": 80, "isHealthy": true},
            {"timestamp": "yesterday", "responseTime": 10, "isHealthy": true},
            {"responseTime": 10, "isHealthy": false},
            {"timestamp": "2026-10-16T09:00:00.000Z", "responseTime": 50, "isHealthy": false, "error": "Network Error"}
        ]"#;
        let history = decode_history(raw).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].response_time_ms, 80);
        assert_eq!(history[1].error.as_deref(), Some("Network Error"));
    }

    #[test]
    fn browser_written_history_decodes() {
        let raw = r#"[{"timestamp":"2026-10-16T01:02:03.004Z","responseTime":120,"isHealthy":false,"error":"timeout of 30000ms exceeded"}]"#;
        let history = decode_history(raw).unwrap();
        assert_eq!(
            history[0].checked_at,
            Utc.with_ymd_and_hms(2026, 10, 16, 1, 2, 3).unwrap() + Duration::milliseconds(4)
        );
        assert_eq!(encode_history(&history).unwrap(), raw);
    }

    #[test]
    fn memory_store_round_trips_and_reports_corruption() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_empty());
        store.save(&sample_history()).unwrap();
        assert_eq!(store.load().unwrap(), sample_history());

        let corrupt = MemoryStore::with_contents("{\"not\": \"an array\"}");
        assert!(matches!(corrupt.load(), Err(StoreError::Parse(_))));
    }
}

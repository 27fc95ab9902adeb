//! Per-contract resume cursors persisted as a JSON object.
//!
//! Layout: `{"MESZ4": "20241213 16:59:00", ...}` with cursors in broker-local
//! time. The whole mapping is rewritten after every update (tmp file, then
//! rename into place), so a crash loses at most the page being fetched.

use crate::domain::{format_cursor, parse_cursor};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt checkpoint file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Contract id → cursor (the end of the next window to request).
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    entries: BTreeMap<String, NaiveDateTime>,
}

impl CheckpointStore {
    /// Load the mapping from disk; a missing file is an empty mapping.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => parse_entries(&path, &content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(CheckpointError::Io { path, source }),
        };
        debug!(path = %path.display(), entries = entries.len(), "checkpoints loaded");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, contract_id: &str) -> Option<NaiveDateTime> {
        self.entries.get(contract_id).copied()
    }

    /// Record a cursor and persist the full mapping before returning.
    pub fn set(&mut self, contract_id: &str, cursor: NaiveDateTime) -> Result<(), CheckpointError> {
        self.entries.insert(contract_id.to_string(), cursor);
        self.persist()
    }

    /// Forget a contract's cursor. Returns whether one existed.
    pub fn remove(&mut self, contract_id: &str) -> Result<bool, CheckpointError> {
        let existed = self.entries.remove(contract_id).is_some();
        if existed {
            self.persist()?;
        }
        Ok(existed)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, NaiveDateTime)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> Result<(), CheckpointError> {
        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };

        let on_disk: BTreeMap<&str, String> = self
            .entries
            .iter()
            .map(|(k, v)| (k.as_str(), format_cursor(*v)))
            .collect();
        let json = serde_json::to_string_pretty(&on_disk).map_err(|e| CheckpointError::Corrupt {
            path: self.path.clone(),
            reason: format!("serialize: {e}"),
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(io_err)?;
        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            io_err(e)
        })?;
        Ok(())
    }
}

fn parse_entries(
    path: &Path,
    content: &str,
) -> Result<BTreeMap<String, NaiveDateTime>, CheckpointError> {
    let corrupt = |reason: String| CheckpointError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let raw: BTreeMap<String, String> =
        serde_json::from_str(content).map_err(|e| corrupt(e.to_string()))?;

    raw.into_iter()
        .map(|(id, cursor)| {
            parse_cursor(&cursor)
                .map(|ts| (id.clone(), ts))
                .map_err(|e| corrupt(format!("cursor for {id} ('{cursor}'): {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn cursor(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::load(dir.path().join("fetch_log.json")).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.get("MESZ4"), None);
    }

    #[test]
    fn set_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetch_log.json");

        let mut store = CheckpointStore::load(&path).unwrap();
        store.set("MESU4", cursor(10, 8)).unwrap();

        let reloaded = CheckpointStore::load(&path).unwrap();
        assert_eq!(reloaded.get("MESU4"), Some(cursor(10, 8)));
        assert_eq!(reloaded.len(), 1);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"20240610 08:00:00\""), "{raw}");
        assert!(!dir.path().join("fetch_log.json.tmp").exists());
    }

    #[test]
    fn set_overwrites_and_keeps_other_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetch_log.json");

        let mut store = CheckpointStore::load(&path).unwrap();
        store.set("MESU4", cursor(10, 8)).unwrap();
        store.set("MESZ4", cursor(11, 9)).unwrap();
        store.set("MESU4", cursor(3, 1)).unwrap();

        let reloaded = CheckpointStore::load(&path).unwrap();
        assert_eq!(reloaded.get("MESU4"), Some(cursor(3, 1)));
        assert_eq!(reloaded.get("MESZ4"), Some(cursor(11, 9)));
    }

    #[test]
    fn reads_broker_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetch_log.json");
        fs::write(&path, r#"{"MESH5": "20250101 17:59:00"}"#).unwrap();

        let store = CheckpointStore::load(&path).unwrap();
        assert_eq!(
            store.get("MESH5"),
            Some(
                NaiveDate::from_ymd_opt(2025, 1, 1)
                    .unwrap()
                    .and_hms_opt(17, 59, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn corrupt_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetch_log.json");
        fs::write(&path, "{not json").unwrap();
        let err = CheckpointStore::load(&path).unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }

    #[test]
    fn bad_cursor_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetch_log.json");
        fs::write(&path, r#"{"MESH5": "last tuesday"}"#).unwrap();
        let err = CheckpointStore::load(&path).unwrap_err();
        assert!(err.to_string().contains("MESH5"), "{err}");
    }

    #[test]
    fn remove_drops_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetch_log.json");

        let mut store = CheckpointStore::load(&path).unwrap();
        store.set("MESU4", cursor(10, 8)).unwrap();
        assert!(store.remove("MESU4").unwrap());
        assert!(!store.remove("MESU4").unwrap());

        let reloaded = CheckpointStore::load(&path).unwrap();
        assert!(reloaded.is_empty());
    }
}

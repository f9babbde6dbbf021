//! # Store Snapshot Persistence
//!
//! The file-backed store keeps its whole contents in one JSON snapshot.
//! Writes go to a temporary file first and are renamed over the snapshot so
//! a crash never leaves a half-written file behind.

use std::fs;
use std::path::Path;

use super::memory::StoreSnapshot;
use super::{StoreError, StoreResult};

/// Snapshot file name inside a data directory
pub const SNAPSHOT_FILE: &str = "docmigrate_store.json";

/// Load a snapshot. A missing file is an empty store.
pub fn load_snapshot(path: &Path) -> StoreResult<StoreSnapshot> {
    if !path.exists() {
        return Ok(StoreSnapshot::default());
    }

    let content = fs::read_to_string(path).map_err(|e| StoreError::SnapshotRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    serde_json::from_str(&content).map_err(|e| StoreError::SnapshotCorrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Atomically replace the snapshot at `path`.
pub fn write_snapshot(path: &Path, snapshot: &StoreSnapshot) -> StoreResult<()> {
    let content = serde_json::to_string_pretty(snapshot).map_err(|e| {
        StoreError::SnapshotCorrupt {
            path: path.to_path_buf(),
            message: format!("Failed to serialize snapshot: {}", e),
        }
    })?;

    let temp_file = path.with_extension("json.tmp");
    fs::write(&temp_file, &content).map_err(|e| StoreError::SnapshotWrite {
        path: temp_file.clone(),
        source: e,
    })?;

    fs::rename(&temp_file, path).map_err(|e| StoreError::SnapshotWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

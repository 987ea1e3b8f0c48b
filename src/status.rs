//! # Status Snapshots
//!
//! Parsing of the plain-text status file the plaso tools overwrite while
//! they run (`--status-view file`).
//!
//! The file holds a header token followed by alternating `name:` / value
//! tokens. Each read is a complete snapshot; nothing accumulates between
//! reads.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusParseError {
    #[error("counter {name} has non-integer value {value:?}")]
    InvalidValue { name: String, value: String },
}

/// Counters from one read of a status file.
///
/// Serializes as `{"tasks": {...}}`, the shape progress consumers expect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub tasks: BTreeMap<String, i64>,
}

impl StatusSnapshot {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.tasks.get(name).copied()
    }
}

/// Parse one status snapshot.
///
/// The first token is a label and is ignored. A trailing token without a
/// value is dropped.
pub fn parse_status(text: &str) -> Result<StatusSnapshot, StatusParseError> {
    let items: Vec<&str> = text.split_whitespace().skip(1).collect();
    let mut snapshot = StatusSnapshot::default();

    for pair in items.chunks_exact(2) {
        let name = pair[0].trim_matches(':').to_lowercase();
        let value = pair[1]
            .parse::<i64>()
            .map_err(|_| StatusParseError::InvalidValue {
                name: name.clone(),
                value: pair[1].to_string(),
            })?;
        snapshot.tasks.insert(name, value);
    }

    Ok(snapshot)
}

/// Parse a snapshot, downgrading a malformed one to an empty snapshot.
pub fn parse_status_lenient(text: &str) -> StatusSnapshot {
    match parse_status(text) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            debug!("discarding malformed status snapshot: {err}");
            StatusSnapshot::default()
        }
    }
}

/// Read the status file at `path`.
///
/// Returns `None` while the file does not exist yet (or cannot be read this
/// tick); the caller retries on its next poll.
pub fn read_snapshot(path: &Path) -> Option<StatusSnapshot> {
    read_status_text(path).map(|text| parse_status_lenient(&text))
}

/// Read the raw status text at `path`, `None` when absent or unreadable.
pub fn read_status_text(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => {
            debug!("status file {} not readable yet: {err}", path.display());
            None
        }
    }
}

//! # Storage Inspection
//!
//! Best-effort metadata read from a finished plaso SQLite storage file:
//! the storage format version and the number of events per parser chain.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("not a plaso storage file: {0}")]
    NotStorage(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    pub format_version: Option<String>,
    /// Event counts keyed by parser chain, plus a `total` entry.
    pub parser_counts: BTreeMap<String, u64>,
}

pub fn inspect(path: &Path) -> Result<StorageInfo, StorageError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    if !has_table(&conn, "metadata")? {
        return Err(StorageError::NotStorage(path.display().to_string()));
    }

    let format_version = read_metadata_value(&conn, "format_version")?;
    let parser_counts = if has_table(&conn, "event_data")? {
        count_parser_chains(&conn)?
    } else {
        BTreeMap::new()
    };

    Ok(StorageInfo {
        format_version,
        parser_counts,
    })
}

fn has_table(conn: &Connection, name: &str) -> Result<bool, StorageError> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")?;
    let mut rows = stmt.query([name])?;
    Ok(rows.next()?.is_some())
}

fn columns(conn: &Connection, table: &str) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn read_metadata_value(conn: &Connection, key: &str) -> Result<Option<String>, StorageError> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = ?1")?;
    let mut rows = stmt.query([key])?;
    match rows.next()? {
        Some(row) => {
            let value: rusqlite::types::Value = row.get(0)?;
            Ok(match value {
                rusqlite::types::Value::Text(text) => Some(text),
                rusqlite::types::Value::Integer(n) => Some(n.to_string()),
                _ => None,
            })
        }
        None => Ok(None),
    }
}

/// Newer storage versions keep the parser chain in its own column; older
/// ones serialize every attribute into a JSON `_data` column.
fn count_parser_chains(conn: &Connection) -> Result<BTreeMap<String, u64>, StorageError> {
    let cols = columns(conn, "event_data")?;
    let mut counts = BTreeMap::new();
    let mut total = 0u64;

    if cols.iter().any(|c| c == "_parser_chain") {
        let mut stmt = conn.prepare("SELECT _parser_chain, COUNT(*) FROM event_data GROUP BY _parser_chain")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (chain, count) = row?;
            let count = count.max(0) as u64;
            total += count;
            if let Some(chain) = chain.filter(|c| !c.is_empty()) {
                *counts.entry(chain).or_insert(0) += count;
            }
        }
    } else if cols.iter().any(|c| c == "_data") {
        let mut stmt = conn.prepare("SELECT _data FROM event_data")?;
        let rows = stmt.query_map([], |row| row.get::<_, Option<String>>(0))?;
        for row in rows {
            total += 1;
            let chain = row?
                .and_then(|data| serde_json::from_str::<serde_json::Value>(&data).ok())
                .and_then(|value| value.get("_parser_chain")?.as_str().map(str::to_string));
            if let Some(chain) = chain {
                *counts.entry(chain).or_insert(0) += 1;
            }
        }
    }

    counts.insert("total".to_string(), total);
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_with(schema: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("timeline.plaso");
        let conn = Connection::open(&path).expect("open");
        conn.execute_batch(schema).expect("schema");
        (dir, path)
    }

    #[test]
    fn reads_version_and_column_counters() {
        let (_dir, path) = storage_with(
            "CREATE TABLE metadata (key TEXT, value TEXT);
             INSERT INTO metadata VALUES ('format_version', '20230327');
             CREATE TABLE event_data (_identifier INTEGER PRIMARY KEY, _parser_chain TEXT);
             INSERT INTO event_data (_parser_chain) VALUES ('filestat'), ('filestat'), ('winreg/amcache');",
        );
        let info = inspect(&path).expect("inspect");
        assert_eq!(info.format_version.as_deref(), Some("20230327"));
        assert_eq!(info.parser_counts.get("filestat"), Some(&2));
        assert_eq!(info.parser_counts.get("winreg/amcache"), Some(&1));
        assert_eq!(info.parser_counts.get("total"), Some(&3));
    }

    #[test]
    fn reads_json_serialized_counters() {
        let (_dir, path) = storage_with(
            r#"CREATE TABLE metadata (key TEXT, value TEXT);
               INSERT INTO metadata VALUES ('format_version', 20211121);
               CREATE TABLE event_data (_identifier INTEGER PRIMARY KEY, _data TEXT);
               INSERT INTO event_data (_data) VALUES ('{"_parser_chain": "sqlite/chrome_history"}'), ('not json');"#,
        );
        let info = inspect(&path).expect("inspect");
        assert_eq!(info.format_version.as_deref(), Some("20211121"));
        assert_eq!(info.parser_counts.get("sqlite/chrome_history"), Some(&1));
        assert_eq!(info.parser_counts.get("total"), Some(&2));
    }

    #[test]
    fn non_storage_database_is_rejected() {
        let (_dir, path) = storage_with("CREATE TABLE other (x INTEGER);");
        assert!(matches!(inspect(&path), Err(StorageError::NotStorage(_))));
    }
}

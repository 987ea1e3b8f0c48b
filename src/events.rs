//! # Progress Events
//!
//! Progress signals emitted while a tool runs, and the reporters that
//! deliver them.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::thread;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::status::StatusSnapshot;

/// Event name the task queue uses for progress updates.
pub const TASK_PROGRESS: &str = "task-progress";

/// Payload of one progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressData {
    /// The tool was launched; no status has been read yet.
    Started,
    /// Counters parsed from the status file.
    Status(StatusSnapshot),
    /// Raw text of a polled log file.
    Log(String),
}

impl Serialize for ProgressData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ProgressData::Started => serializer.serialize_map(Some(0))?.end(),
            ProgressData::Status(snapshot) => snapshot.serialize(serializer),
            ProgressData::Log(text) => serializer.serialize_str(text),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// Position of this event within its run, starting at 0.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub data: ProgressData,
}

impl ProgressEvent {
    pub fn new(sequence: u64, data: ProgressData) -> Self {
        Self {
            sequence,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Progress callback for supervised runs.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// Reports progress through `tracing`.
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn on_progress(&self, event: &ProgressEvent) {
        match &event.data {
            ProgressData::Started => info!("tool started"),
            ProgressData::Status(snapshot) => {
                let counters = serde_json::to_string(&snapshot.tasks).unwrap_or_default();
                info!(sequence = event.sequence, "progress {counters}");
            }
            ProgressData::Log(text) => {
                debug!(sequence = event.sequence, bytes = text.len(), "progress log polled")
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressReporter for MemoryReporter {
    fn on_progress(&self, event: &ProgressEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Forwards every event to each inner reporter in order.
pub struct FanoutReporter<'a> {
    reporters: Vec<&'a dyn ProgressReporter>,
}

impl<'a> FanoutReporter<'a> {
    pub fn new(reporters: Vec<&'a dyn ProgressReporter>) -> Self {
        Self { reporters }
    }
}

impl ProgressReporter for FanoutReporter<'_> {
    fn on_progress(&self, event: &ProgressEvent) {
        for reporter in &self.reporters {
            reporter.on_progress(event);
        }
    }
}

#[derive(Serialize)]
struct EventRecord<'a> {
    event: &'static str,
    task_name: &'a str,
    workflow_id: Option<&'a str>,
    #[serde(flatten)]
    progress: &'a ProgressEvent,
}

/// Appends events as JSON lines to a file.
///
/// Writes happen on a dedicated thread so a slow disk never delays the
/// polling loop.
pub struct JsonlReporter {
    tx: Option<Sender<ProgressEvent>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl JsonlReporter {
    pub fn create(
        path: &Path,
        task_name: &str,
        workflow_id: Option<&str>,
    ) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (tx, rx) = unbounded::<ProgressEvent>();
        let handle = spawn_writer_thread(
            BufWriter::new(file),
            rx,
            task_name.to_string(),
            workflow_id.map(str::to_string),
        );
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Flush pending events and stop the writer thread.
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("progress writer thread panicked");
            }
        }
    }
}

impl Drop for JsonlReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ProgressReporter for JsonlReporter {
    fn on_progress(&self, event: &ProgressEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event.clone()).is_err() {
                warn!("progress writer stopped; dropping event {}", event.sequence);
            }
        }
    }
}

fn spawn_writer_thread(
    mut writer: BufWriter<File>,
    rx: Receiver<ProgressEvent>,
    task_name: String,
    workflow_id: Option<String>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in rx {
            let record = EventRecord {
                event: TASK_PROGRESS,
                task_name: &task_name,
                workflow_id: workflow_id.as_deref(),
                progress: &event,
            };
            let written = serde_json::to_writer(&mut writer, &record)
                .map_err(std::io::Error::from)
                .and_then(|_| writer.write_all(b"\n"))
                .and_then(|_| writer.flush());
            if let Err(err) = written {
                warn!("progress event write error: {err}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_serializes_as_empty_object() {
        let json = serde_json::to_value(ProgressData::Started).expect("json");
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn status_serializes_with_tasks_namespace() {
        let snapshot = crate::status::parse_status("H events: 4").expect("parse");
        let json = serde_json::to_value(ProgressData::Status(snapshot)).expect("json");
        assert_eq!(json, serde_json::json!({"tasks": {"events": 4}}));
    }

    #[test]
    fn jsonl_reporter_writes_one_line_per_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        let reporter = JsonlReporter::create(&path, "psort", Some("wf-1")).expect("reporter");
        reporter.on_progress(&ProgressEvent::new(0, ProgressData::Started));
        reporter.on_progress(&ProgressEvent::new(1, ProgressData::Log("line".into())));
        reporter.finish();

        let content = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).expect("json"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "task-progress");
        assert_eq!(lines[0]["workflow_id"], "wf-1");
        assert_eq!(lines[0]["data"], serde_json::json!({}));
        assert_eq!(lines[1]["sequence"], 1);
        assert_eq!(lines[1]["data"], "line");
    }

    #[test]
    fn fanout_reaches_every_reporter() {
        let a = MemoryReporter::new();
        let b = MemoryReporter::new();
        let fanout = FanoutReporter::new(vec![&a as &dyn ProgressReporter, &b]);
        fanout.on_progress(&ProgressEvent::new(0, ProgressData::Started));
        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
    }
}

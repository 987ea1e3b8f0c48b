//! # Tasks
//!
//! Per-tool profiles: how each plaso tool is invoked, which outputs it
//! produces, and how its task is described to the task queue.

pub mod image_export;
pub mod log2timeline;
pub mod psort;

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::{Catalog, Config};
use crate::events::ProgressReporter;
use crate::input::{InputError, InputFile};
use crate::output::OutputError;
use crate::result::ResultError;
use crate::supervisor::{SupervisorError, SupervisorOptions};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Result(#[from] ResultError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("missing required task config: {0}")]
    MissingConfig(&'static str),
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Log2Timeline,
    Psort,
    ArtifactExtract,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [
        TaskKind::Log2Timeline,
        TaskKind::Psort,
        TaskKind::ArtifactExtract,
    ];

    pub fn task_name(self) -> &'static str {
        match self {
            TaskKind::Log2Timeline => log2timeline::TASK_NAME,
            TaskKind::Psort => psort::TASK_NAME,
            TaskKind::ArtifactExtract => image_export::TASK_NAME,
        }
    }

    /// Accepts the registered task name or its short suffix.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            let full = kind.task_name();
            full == name || full.rsplit('.').next() == Some(name)
        })
    }

    pub fn metadata(self, catalog: &Catalog) -> TaskMetadata {
        match self {
            TaskKind::Log2Timeline => log2timeline::metadata(catalog),
            TaskKind::Psort => psort::metadata(),
            TaskKind::ArtifactExtract => image_export::metadata(),
        }
    }
}

/// User configuration submitted with a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskConfig(Map<String, Value>);

impl TaskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    /// A list value; a comma-separated string is split into its items.
    pub fn list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::String(text)) => text
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// A non-blank text value.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// One task invocation as delivered by the queue.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskRequest {
    pub task: String,
    #[serde(default)]
    pub pipe_result: Option<String>,
    #[serde(default)]
    pub input_files: Vec<InputFile>,
    pub output_path: PathBuf,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub task_config: TaskConfig,
}

/// Shared collaborators for running a task.
pub struct TaskContext<'a> {
    pub config: &'a Config,
    pub reporter: &'a dyn ProgressReporter,
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

impl TaskContext<'_> {
    pub(crate) fn supervisor_options(&self, poll_interval_ms: u64) -> SupervisorOptions {
        SupervisorOptions::new(Duration::from_millis(poll_interval_ms))
            .with_timeout(self.config.timeout())
            .with_terminate_grace(self.config.terminate_grace())
            .with_cancel_flag(self.cancel_flag.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskMetadata {
    pub display_name: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub task_config: Vec<ConfigField>,
}

/// One field of a task's configuration form.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigField {
    pub name: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub field_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<String>>,
    pub required: bool,
}

/// Ask a plaso tool for its version, e.g. `plaso - psort version 20240308`.
pub(crate) fn probe_tool_version(program: &str) -> Option<String> {
    let output = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .ok()?;
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    let version = text.split_whitespace().last().map(str::to_string);
    debug!("{program} version {version:?}");
    version
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_names_resolve() {
        assert_eq!(
            TaskKind::from_name("openrelik-worker-plaso.tasks.psort"),
            Some(TaskKind::Psort)
        );
        assert_eq!(TaskKind::from_name("log2timeline"), Some(TaskKind::Log2Timeline));
        assert_eq!(TaskKind::from_name("artifact_extract"), Some(TaskKind::ArtifactExtract));
        assert_eq!(TaskKind::from_name("pinfo"), None);
    }

    #[test]
    fn config_lists_accept_arrays_and_csv() {
        let mut cfg = TaskConfig::new();
        cfg.insert("parsers", serde_json::json!(["winreg", " filestat ", ""]));
        cfg.insert("artifacts", serde_json::json!("WindowsEventLogs, BrowserHistory"));
        cfg.insert("blank", serde_json::json!("   "));
        assert_eq!(cfg.list("parsers"), vec!["winreg", "filestat"]);
        assert_eq!(cfg.list("artifacts"), vec!["WindowsEventLogs", "BrowserHistory"]);
        assert!(cfg.list("missing").is_empty());
        assert_eq!(cfg.text("blank"), None);
        assert_eq!(cfg.text("artifacts"), Some("WindowsEventLogs, BrowserHistory"));
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let request: TaskRequest = serde_json::from_value(serde_json::json!({
            "task": "psort",
            "output_path": "/tmp/out",
            "input_files": [{"path": "/tmp/in.plaso", "display_name": "in.plaso"}]
        }))
        .expect("request");
        assert_eq!(request.input_files.len(), 1);
        assert!(request.pipe_result.is_none());
        assert!(request.task_config.list("parsers").is_empty());
    }

    #[test]
    fn metadata_includes_catalog_items() {
        let catalog = Catalog {
            parsers: vec!["winreg".to_string()],
            archives: vec!["zip".to_string()],
        };
        let json = serde_json::to_value(TaskKind::Log2Timeline.metadata(&catalog)).expect("json");
        assert_eq!(json["display_name"], "Plaso Log2Timeline");
        let fields = json["task_config"].as_array().expect("fields");
        let parsers = fields.iter().find(|f| f["name"] == "parsers").expect("parsers");
        assert_eq!(parsers["items"], serde_json::json!(["winreg"]));

        let psort = serde_json::to_value(TaskKind::Psort.metadata(&catalog)).expect("json");
        assert!(psort.get("task_config").is_none());
    }
}

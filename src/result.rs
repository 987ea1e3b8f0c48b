//! # Task Results
//!
//! Collects the artifacts of one tool run and builds the result envelope
//! handed back to the task queue.
//!
//! Two discovery modes are supported: *declared* outputs are slots
//! allocated before the tool ran, *discovered* outputs are found by walking
//! a scratch directory after it exited and moving each file into its own
//! slot.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::output::{self, OutputError, OutputFile};

#[derive(Debug, Error)]
pub enum ResultError {
    #[error("{tool} didn't create any output files")]
    NoOutputs { tool: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("output error: {0}")]
    Output(#[from] OutputError),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid base64 result: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Result envelope for one task invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub output_files: Vec<OutputFile>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl TaskResult {
    /// Base64-encoded JSON, the form passed between chained tasks.
    pub fn encode(&self) -> Result<String, ResultError> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }

    pub fn decode(encoded: &str) -> Result<Self, ResultError> {
        let bytes = STANDARD.decode(encoded.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Build a result envelope, refusing an empty artifact list.
pub fn assemble(
    tool: &str,
    output_files: Vec<OutputFile>,
    workflow_id: Option<&str>,
    command: &str,
    meta: Map<String, Value>,
) -> Result<TaskResult, ResultError> {
    if output_files.is_empty() {
        return Err(ResultError::NoOutputs {
            tool: tool.to_string(),
        });
    }
    Ok(TaskResult {
        output_files,
        workflow_id: workflow_id.map(str::to_string),
        command: command.to_string(),
        meta,
    })
}

pub struct ResultAssembler {
    tool: String,
    outputs: Vec<OutputFile>,
    meta: Map<String, Value>,
}

impl ResultAssembler {
    pub fn new(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            outputs: Vec::new(),
            meta: Map::new(),
        }
    }

    /// Add an output whose slot was allocated before the run.
    pub fn declare(&mut self, file: OutputFile) {
        self.outputs.push(file);
    }

    /// Add an output only if the tool actually wrote it.
    pub fn declare_if_exists(&mut self, file: OutputFile) -> bool {
        if file.exists() {
            self.outputs.push(file);
            true
        } else {
            debug!("optional output {} was not written", file.path.display());
            false
        }
    }

    /// Move every regular file under `scratch` into `output_dir` and record
    /// it. Returns the number of files found.
    pub fn discover(&mut self, scratch: &Path, output_dir: &Path) -> Result<usize, ResultError> {
        let files = collect_files(scratch)?;
        let count = files.len();
        for file in files {
            let relative = relative_display(scratch, &file);
            let slot = output::relocate_into_output(output_dir, &file, &relative)?;
            self.outputs.push(slot);
        }
        debug!("discovered {count} files under {}", scratch.display());
        Ok(count)
    }

    /// Attach a metadata entry; values that fail to serialize are skipped.
    pub fn meta<T: Serialize>(&mut self, key: &str, value: T) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.meta.insert(key.to_string(), value);
            }
            Err(err) => warn!("dropping metadata {key}: {err}"),
        }
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn outputs(&self) -> &[OutputFile] {
        &self.outputs
    }

    pub fn assemble(self, workflow_id: Option<&str>, command: &str) -> Result<TaskResult, ResultError> {
        assemble(&self.tool, self.outputs, workflow_id, command, self.meta)
    }
}

/// All regular files below `root`, sorted by path. Symlinks are not followed.
pub fn collect_files(root: &Path) -> Result<Vec<PathBuf>, ResultError> {
    let mut files = Vec::new();
    if !root.is_dir() {
        return Ok(files);
    }
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

fn relative_display(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

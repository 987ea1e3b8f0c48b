//! # Worker
//!
//! Entry points used by the binary: dispatch a task request to its tool
//! profile, describe registered tasks, and wire Ctrl+C to cancellation.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::{error, info, info_span, warn};

use crate::config::Catalog;
use crate::result::TaskResult;
use crate::tasks::{self, TaskContext, TaskError, TaskKind, TaskRequest};

/// Run one task to completion.
pub fn run_task(ctx: &TaskContext<'_>, request: &TaskRequest) -> Result<TaskResult, TaskError> {
    let kind = TaskKind::from_name(&request.task)
        .ok_or_else(|| TaskError::UnknownTask(request.task.clone()))?;
    let workflow_id = request.workflow_id.as_deref().unwrap_or_default();
    let span = info_span!("task", task_name = kind.task_name(), workflow_id);
    let _guard = span.enter();

    info!("Starting {} for workflow {workflow_id}", kind.task_name());
    std::fs::create_dir_all(&request.output_path)?;

    let result = match kind {
        TaskKind::Log2Timeline => tasks::log2timeline::run(ctx, request),
        TaskKind::Psort => tasks::psort::run(ctx, request),
        TaskKind::ArtifactExtract => tasks::image_export::run(ctx, request),
    };

    match &result {
        Ok(result) => info!("task finished with {} output files", result.output_files.len()),
        Err(err) => error!("task failed: {err}"),
    }
    result
}

/// Registration metadata keyed by task name, for one task or all of them.
pub fn describe(task: Option<&str>, catalog: &Catalog) -> Result<Value> {
    let kinds: Vec<TaskKind> = match task {
        Some(name) => vec![
            TaskKind::from_name(name).with_context(|| format!("unknown task: {name}"))?,
        ],
        None => TaskKind::ALL.to_vec(),
    };

    let mut out = Map::new();
    for kind in kinds {
        out.insert(
            kind.task_name().to_string(),
            serde_json::to_value(kind.metadata(catalog))?,
        );
    }
    Ok(Value::Object(out))
}

/// Load a task request from a JSON file, or stdin when `path` is `-`.
pub fn read_request(path: &Path) -> Result<TaskRequest> {
    let bytes = if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("reading task request from stdin")?;
        buf
    } else {
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))?
    };
    serde_json::from_slice(&bytes).context("parsing task request")
}

/// Set the returned flag on the first Ctrl+C.
pub fn install_cancel_handler() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    ctrlc::set_handler(move || {
        if !handler_flag.swap(true, Ordering::SeqCst) {
            warn!("interrupt received; stopping the running tool");
        }
    })
    .context("installing Ctrl+C handler")?;
    Ok(flag)
}

//! Artifact extraction with `image_export.py`.
//!
//! The tool writes an unpredictable set of files into a scratch directory;
//! everything found there after it exits is moved into the output area.

use tracing::{debug, info};

use crate::input;
use crate::output::{OutputSpec, create_output_file};
use crate::result::{ResultAssembler, TaskResult};
use crate::supervisor::{CommandSpec, ProcessOutcome, ProcessSupervisor, StatusSource};

use super::{ConfigField, TaskContext, TaskError, TaskMetadata, TaskRequest};

pub const TASK_NAME: &str = "openrelik-worker-plaso.tasks.artifact_extract";

pub fn metadata() -> TaskMetadata {
    TaskMetadata {
        display_name: "Artifact Extract",
        description: "Extract artifacts",
        task_config: vec![ConfigField {
            name: "artifacts",
            label: "Artifacts",
            description: "A comma separated list of artifacts to extract",
            field_type: "text",
            items: None,
            required: true,
        }],
    }
}

pub fn run(ctx: &TaskContext<'_>, request: &TaskRequest) -> Result<TaskResult, TaskError> {
    let artifacts = request.task_config.list("artifacts");
    if artifacts.is_empty() {
        return Err(TaskError::MissingConfig("artifacts"));
    }
    let artifact_filters = artifacts.join(",");

    let inputs = input::get_input_files(request.pipe_result.as_deref(), request.input_files.clone())?;
    let output_path = &request.output_path;
    let program = ctx.config.tools.image_export.as_str();
    let tool = CommandSpec::new(program).tool_name();

    let mut assembler = ResultAssembler::new(&tool);
    let mut command_string = String::new();

    for input_file in &inputs {
        let log_file = create_output_file(output_path, OutputSpec::named("image_export.log"))?;
        let export_dir = tempfile::Builder::new()
            .prefix("export-")
            .tempdir_in(output_path)?;

        let spec = CommandSpec::new(program)
            .arg("--no-hashes")
            .arg("--logfile")
            .arg(log_file.path.to_string_lossy())
            .arg("--write")
            .arg(export_dir.path().to_string_lossy())
            .args(["--partitions", "all", "--volumes", "all", "--unattended"])
            .arg("--artifact_filters")
            .arg(artifact_filters.as_str())
            .arg(input_file.path.to_string_lossy());
        command_string = spec.command_prefix(5);

        let options = ctx
            .supervisor_options(ctx.config.poll_interval_ms.image_export)
            .with_status(StatusSource::LogText(log_file.path.clone()));
        let exit = ProcessSupervisor::new(spec, options).run(ctx.reporter)?;
        exit.ensure_success(&tool)?;

        assembler.declare_if_exists(log_file);
        let found = assembler.discover(export_dir.path(), output_path)?;
        info!("{tool} exported {found} files from {}", input_file.display_name());
        debug!("removing export directory {}", export_dir.path().display());
    }

    ProcessOutcome::classify(0, assembler.output_count()).into_result(&tool)?;
    Ok(assembler.assemble(request.workflow_id.as_deref(), &command_string)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use crate::events::MemoryReporter;
    use crate::tasks::TaskConfig;

    #[test]
    fn artifacts_are_required() {
        let loaded = load_config(None).expect("config");
        let reporter = MemoryReporter::new();
        let ctx = TaskContext {
            config: &loaded.config,
            reporter: &reporter,
            cancel_flag: None,
        };
        let request = TaskRequest {
            task: TASK_NAME.to_string(),
            pipe_result: None,
            input_files: Vec::new(),
            output_path: std::env::temp_dir(),
            workflow_id: None,
            task_config: TaskConfig::new(),
        };
        let err = run(&ctx, &request).unwrap_err();
        assert!(matches!(err, TaskError::MissingConfig("artifacts")));
        assert!(reporter.events().is_empty());
    }
}

//! CSV export of plaso storage files with `psort.py`, one run per input.

use tracing::{info, warn};

use crate::input;
use crate::output::{OutputSpec, create_output_file};
use crate::result::{ResultAssembler, TaskResult};
use crate::supervisor::{CommandSpec, ProcessOutcome, ProcessSupervisor, StatusSource};

use super::{TaskContext, TaskError, TaskMetadata, TaskRequest};

pub const TASK_NAME: &str = "openrelik-worker-plaso.tasks.psort";

pub const CSV_DATA_TYPE: &str = "plaso:psort:csv";

pub fn metadata() -> TaskMetadata {
    TaskMetadata {
        display_name: "Plaso Psort CSV",
        description: "Process Plaso storage files",
        task_config: Vec::new(),
    }
}

pub fn run(ctx: &TaskContext<'_>, request: &TaskRequest) -> Result<TaskResult, TaskError> {
    let inputs = input::get_input_files(request.pipe_result.as_deref(), request.input_files.clone())?;
    let output_path = &request.output_path;
    let program = ctx.config.tools.psort.as_str();
    let tool = CommandSpec::new(program).tool_name();

    let mut assembler = ResultAssembler::new(&tool);
    let mut command_string = String::new();

    for input_file in &inputs {
        let display_name = format!("{}.csv", input_file.display_name());
        let csv_file = create_output_file(
            output_path,
            OutputSpec::named(&display_name).data_type(CSV_DATA_TYPE),
        )?;
        let status_file = create_output_file(output_path, OutputSpec::with_extension("status"))?;

        let spec = CommandSpec::new(program)
            .args([
                "--quiet",
                "--status-view",
                "file",
                "--additional_fields",
                "yara_match",
                "--status-view-file",
            ])
            .arg(status_file.path.to_string_lossy())
            .arg("-w")
            .arg(csv_file.path.to_string_lossy())
            .arg(input_file.path.to_string_lossy());
        command_string = spec.command_prefix(5);

        info!("Starting {command_string}");
        let options = ctx
            .supervisor_options(ctx.config.poll_interval_ms.psort)
            .with_status(StatusSource::Counters(status_file.path.clone()))
            .with_capture(true);
        let exit = ProcessSupervisor::new(spec, options).run(ctx.reporter)?;
        exit.ensure_success(&tool)?;

        if !assembler.declare_if_exists(csv_file) {
            warn!("{tool} wrote no CSV for {}", input_file.display_name());
        }
    }

    // Every run exited cleanly by now; only the output count can fail.
    ProcessOutcome::classify(0, assembler.output_count()).into_result(&tool)?;
    Ok(assembler.assemble(request.workflow_id.as_deref(), &command_string)?)
}

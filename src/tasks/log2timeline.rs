//! Timeline extraction with `log2timeline.py`.
//!
//! One storage file per task. Several inputs are hard-linked into a scratch
//! directory so the tool sees them as a single source; a segmented EWF
//! image is opened through its first segment.

use tracing::{info, warn};

use crate::config::Catalog;
use crate::input::{self, LinkedInputs};
use crate::output::{OutputSpec, create_output_file};
use crate::result::{ResultAssembler, TaskResult};
use crate::storage;
use crate::supervisor::{CommandSpec, ProcessSupervisor, StatusSource};

use super::{ConfigField, TaskContext, TaskError, TaskMetadata, TaskRequest, probe_tool_version};

pub const TASK_NAME: &str = "openrelik-worker-plaso.tasks.log2timeline";

pub const STORAGE_DATA_TYPE: &str = "plaso:log2timeline:plaso_storage";
pub const YARA_DATA_TYPE: &str = "plaso:log2timeline:yara_rules";

const YARA_RULES_KEY: &str = "Yara rules";

pub fn metadata(catalog: &Catalog) -> TaskMetadata {
    TaskMetadata {
        display_name: "Plaso Log2Timeline",
        description: "Super timelining",
        task_config: vec![
            ConfigField {
                name: "artifacts",
                label: "Select artifacts to parse",
                description: "Select one or more forensic artifact definitions from the ForensicArtifacts project. These definitions specify files and data relevant to digital forensic investigations.  Only the selected artifacts will be parsed.",
                field_type: "artifacts",
                items: None,
                required: false,
            },
            ConfigField {
                name: "parsers",
                label: "Select parsers to use",
                description: "Select one or more Plaso parsers. These parsers specify how to interpret files and data. Only data identified by the selected parsers will be processed.",
                field_type: "autocomplete",
                items: Some(catalog.parsers.clone()),
                required: false,
            },
            ConfigField {
                name: "archives",
                label: "Archives",
                description: "Select one or more Plaso archive types. Files inside these archive types will be processed.",
                field_type: "autocomplete",
                items: Some(catalog.archives.clone()),
                required: false,
            },
            ConfigField {
                name: YARA_RULES_KEY,
                label: "Yara rules",
                description: "Add Yara rules to tag files with.",
                field_type: "textarea",
                items: None,
                required: false,
            },
        ],
    }
}

pub fn run(ctx: &TaskContext<'_>, request: &TaskRequest) -> Result<TaskResult, TaskError> {
    let inputs = input::get_input_files(request.pipe_result.as_deref(), request.input_files.clone())?;
    if inputs.is_empty() {
        return Err(input::InputError::Empty.into());
    }
    let output_path = &request.output_path;
    let task_config = &request.task_config;
    let catalog = &ctx.config.catalog;

    let storage_file = if inputs.len() == 1 {
        let display_name = format!("{}.plaso", inputs[0].display_name());
        create_output_file(
            output_path,
            OutputSpec::named(&display_name).data_type(STORAGE_DATA_TYPE),
        )?
    } else {
        create_output_file(
            output_path,
            OutputSpec::with_extension("plaso").data_type(STORAGE_DATA_TYPE),
        )?
    };
    let status_file = create_output_file(output_path, OutputSpec::with_extension("status"))?;

    let mut spec = CommandSpec::new(ctx.config.tools.log2timeline.as_str()).args([
        "--quiet",
        "--unattended",
        "--partitions",
        "all",
        "--status-view",
        "file",
        "--status-view-file",
    ]);
    spec = spec
        .arg(status_file.path.to_string_lossy())
        .arg("--storage-file")
        .arg(storage_file.path.to_string_lossy());

    let artifacts = task_config.list("artifacts");
    if !artifacts.is_empty() {
        spec = spec.arg("--artifact_filters").arg(artifacts.join(","));
    }

    let parsers = task_config.list("parsers");
    if !parsers.is_empty() {
        for unknown in catalog.unknown_parsers(&parsers) {
            warn!("parser not in catalog: {unknown}");
        }
        spec = spec.arg("--parsers").arg(parsers.join(","));
    }

    let archives = task_config.list("archives");
    if !archives.is_empty() {
        for unknown in catalog.unknown_archives(&archives) {
            warn!("archive type not in catalog: {unknown}");
        }
        spec = spec.arg("--archives").arg(archives.join(","));
    }

    if let Some(rules) = task_config.text(YARA_RULES_KEY) {
        let rules_file = create_output_file(
            output_path,
            OutputSpec::with_extension("yara").data_type(YARA_DATA_TYPE),
        )?;
        std::fs::write(&rules_file.path, rules)?;
        spec = spec.arg("--yara_rules").arg(rules_file.path.to_string_lossy());
    }

    // The reported command leaves out the input paths.
    let command_string = spec.command_line();

    let linked: Option<LinkedInputs> = if inputs.len() > 1 {
        Some(input::link_inputs(&inputs, output_path)?)
    } else {
        None
    };
    let source = match &linked {
        Some(linked) => linked.entry().to_path_buf(),
        None => inputs[0].path.clone(),
    };
    spec = spec.arg(source.to_string_lossy());

    let tool = spec.tool_name();
    let options = ctx
        .supervisor_options(ctx.config.poll_interval_ms.log2timeline)
        .with_status(StatusSource::Counters(status_file.path.clone()));
    let exit = ProcessSupervisor::new(spec, options).run(ctx.reporter)?;
    drop(linked);
    exit.ensure_success(&tool)?;

    let mut assembler = ResultAssembler::new(&tool);
    assembler.declare_if_exists(storage_file.clone());
    exit.outcome(assembler.output_count()).into_result(&tool)?;

    if let Some(version) = probe_tool_version(&ctx.config.tools.log2timeline) {
        assembler.meta("plaso_version", version);
    }
    if ctx.config.inspect_storage {
        match storage::inspect(&storage_file.path) {
            Ok(info) => {
                if let Some(version) = info.format_version {
                    assembler.meta("plaso_storage_version", version);
                }
                assembler.meta("event_counters", info.parser_counts);
            }
            Err(err) => warn!("could not read storage metadata: {err}"),
        }
    }

    info!("{tool} produced {}", storage_file.display_name);
    Ok(assembler.assemble(request.workflow_id.as_deref(), &command_string)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_uses_yara_key() {
        let meta = metadata(&Catalog::default());
        assert_eq!(meta.task_config.len(), 4);
        assert_eq!(meta.task_config[3].name, "Yara rules");
    }
}

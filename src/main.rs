use anyhow::{Context, Result};
use tracing::info;

use plaso_worker::{
    cli::{self, CommandKind},
    config,
    events::{FanoutReporter, JsonlReporter, LogReporter, ProgressReporter},
    logging,
    tasks::{TaskContext, TaskKind},
    worker,
};

fn main() -> Result<()> {
    let cli_opts = cli::parse();
    logging::init_logging(cli_opts.log_format.into());

    let loaded = config::load_config(cli_opts.config_path.as_deref())?;
    info!("config_hash={}", loaded.config_hash);

    match cli_opts.command {
        CommandKind::Describe { task } => {
            let value = worker::describe(task.as_deref(), &loaded.config.catalog)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        CommandKind::Run { request, encoded } => {
            let request = worker::read_request(&request)?;
            let cancel_flag = worker::install_cancel_handler()?;

            let task_name = TaskKind::from_name(&request.task)
                .map(TaskKind::task_name)
                .unwrap_or(request.task.as_str());
            let jsonl = cli_opts
                .events_path
                .as_deref()
                .map(|path| {
                    JsonlReporter::create(path, task_name, request.workflow_id.as_deref())
                        .with_context(|| format!("opening events file {}", path.display()))
                })
                .transpose()?;

            let outcome = {
                let log_reporter = LogReporter;
                let mut reporters: Vec<&dyn ProgressReporter> = vec![&log_reporter];
                if let Some(jsonl) = jsonl.as_ref() {
                    reporters.push(jsonl);
                }
                let reporter = FanoutReporter::new(reporters);
                let ctx = TaskContext {
                    config: &loaded.config,
                    reporter: &reporter,
                    cancel_flag: Some(cancel_flag),
                };
                worker::run_task(&ctx, &request)
            };
            if let Some(jsonl) = jsonl {
                jsonl.finish();
            }

            let result = outcome.with_context(|| format!("task {} failed", request.task))?;
            if encoded {
                println!("{}", result.encode()?);
            } else {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
    }
    Ok(())
}

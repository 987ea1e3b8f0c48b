use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::logging::LogFormat;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Optional path to config file (YAML)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormatArg::Text, global = true)]
    pub log_format: LogFormatArg,

    /// Append progress events to this file as JSON lines
    #[arg(long, global = true)]
    pub events_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CommandKind,
}

#[derive(Subcommand, Debug)]
pub enum CommandKind {
    /// Run one task request and print its result
    Run {
        /// Task request JSON file, or `-` for stdin
        #[arg(long)]
        request: PathBuf,

        /// Print the result base64-encoded instead of as JSON
        #[arg(long)]
        encoded: bool,
    },
    /// Print task registration metadata
    Describe {
        /// Only describe this task
        #[arg(long)]
        task: Option<String>,
    },
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}

#[cfg(test)]
mod tests {
    use super::{CliOptions, CommandKind};
    use clap::Parser;

    #[test]
    fn parses_run_with_events_path() {
        let opts = CliOptions::try_parse_from([
            "plaso-worker",
            "run",
            "--request",
            "req.json",
            "--events-path",
            "events.jsonl",
        ])
        .expect("parse");
        assert_eq!(opts.events_path.as_deref(), Some(std::path::Path::new("events.jsonl")));
        match opts.command {
            CommandKind::Run { request, encoded } => {
                assert_eq!(request, std::path::PathBuf::from("req.json"));
                assert!(!encoded);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_describe_with_task() {
        let opts = CliOptions::try_parse_from(["plaso-worker", "--log-format", "json", "describe", "--task", "psort"])
            .expect("parse");
        assert!(matches!(opts.command, CommandKind::Describe { task: Some(ref t) } if t == "psort"));
    }

    #[test]
    fn run_requires_request() {
        assert!(CliOptions::try_parse_from(["plaso-worker", "run"]).is_err());
    }
}

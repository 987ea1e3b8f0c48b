//! # Tool Log Classification
//!
//! Replays the leveled log output of a child tool onto our own logger.
//!
//! Lines look like `[WARNING] something happened`. Untagged lines (stack
//! traces, wrapped messages) inherit the severity of the last tagged line.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info, warn};

static HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(\w+)\]\s*(.*)$").expect("valid header regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Look up a severity by its tag name, case-insensitively.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" | "WARN" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            "CRITICAL" | "FATAL" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Destination for classified log records.
pub trait LogSink {
    fn emit(&mut self, severity: Severity, message: &str);
}

impl LogSink for Vec<(Severity, String)> {
    fn emit(&mut self, severity: Severity, message: &str) {
        self.push((severity, message.to_string()));
    }
}

/// Sink that forwards records to `tracing`, tagged with the tool name.
pub struct TracingSink<'a> {
    tool: &'a str,
}

impl<'a> TracingSink<'a> {
    pub fn new(tool: &'a str) -> Self {
        Self { tool }
    }
}

impl LogSink for TracingSink<'_> {
    fn emit(&mut self, severity: Severity, message: &str) {
        let tool = self.tool;
        let tool_level = severity.as_str();
        match severity {
            Severity::Debug => debug!(target: "tool", tool, tool_level, "{message}"),
            Severity::Info => info!(target: "tool", tool, tool_level, "{message}"),
            Severity::Warning => warn!(target: "tool", tool, tool_level, "{message}"),
            Severity::Error | Severity::Critical => {
                error!(target: "tool", tool, tool_level, "{message}")
            }
        }
    }
}

/// Classify `text` line by line and emit each record to `sink`.
///
/// Never fails; malformed lines are emitted at the carried severity.
pub fn classify(text: &str, sink: &mut dyn LogSink) {
    let mut current = Severity::Info;

    for raw in text.lines() {
        let line = raw.trim_end();
        if line.is_empty() {
            continue;
        }

        let header = HEADER_RE
            .captures(line)
            .and_then(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())));

        match header {
            Some((tag, message)) => {
                // An unknown tag keeps whatever severity was already in effect.
                if let Some(severity) = Severity::from_tag(tag) {
                    current = severity;
                }
                sink.emit(current, message);
            }
            None => sink.emit(current, line),
        }
    }
}

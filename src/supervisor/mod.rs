//! # Process Supervisor
//!
//! Runs one external tool to completion while polling its status file.
//!
//! The supervisor owns the child for its whole life: it spawns it, emits a
//! `Started` event, polls the status side-channel on a fixed tick while the
//! child is alive, drains captured streams on background threads, and
//! replays them onto the logger once the child has exited. Whether the run
//! counts as a success is decided afterwards with [`ProcessOutcome`], once
//! the caller knows how many outputs were produced.

pub mod drain;
mod outcome;

#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{ProgressData, ProgressEvent, ProgressReporter};
use crate::status;
use crate::tool_log::{self, TracingSink};

pub use drain::CapturedOutput;
pub use outcome::ProcessOutcome;

use drain::StreamDrains;

const CANCEL_CHECK_SLICE: Duration = Duration::from_millis(100);
const TERMINATE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with code {code}")]
    NonZeroExit { tool: String, code: i32 },
    #[error("{tool} didn't create any output files")]
    NoOutput { tool: String },
    #[error("{tool} was terminated by a signal")]
    Signalled { tool: String },
    #[error("{tool} did not finish within {timeout_secs}s and was terminated")]
    TimedOut { tool: String, timeout_secs: u64 },
    #[error("{tool} was cancelled")]
    Cancelled { tool: String },
    #[error("supervisor for {tool} has already run")]
    AlreadyRan { tool: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Argument vector and working directory for one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Program name without its directory, used to label logs and errors.
    pub fn tool_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }

    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Space-joined program and arguments.
    pub fn command_line(&self) -> String {
        self.argv().join(" ")
    }

    /// Space-joined first `n` entries of the argument vector.
    pub fn command_prefix(&self, n: usize) -> String {
        self.argv().into_iter().take(n).collect::<Vec<_>>().join(" ")
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

/// Where progress is read from while the child runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusSource {
    None,
    /// A `--status-view file` snapshot, parsed into counters.
    Counters(PathBuf),
    /// A log file forwarded verbatim.
    LogText(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub poll_interval: Duration,
    pub status: StatusSource,
    pub capture_output: bool,
    pub timeout: Option<Duration>,
    pub terminate_grace: Duration,
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

impl SupervisorOptions {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            status: StatusSource::None,
            capture_output: false,
            timeout: None,
            terminate_grace: Duration::from_secs(5),
            cancel_flag: None,
        }
    }

    pub fn with_status(mut self, status: StatusSource) -> Self {
        self.status = status;
        self
    }

    pub fn with_capture(mut self, capture_output: bool) -> Self {
        self.capture_output = capture_output;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn with_cancel_flag(mut self, flag: Option<Arc<AtomicBool>>) -> Self {
        self.cancel_flag = flag;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Running,
    Exited { code: i32 },
}

/// What the supervisor observed about a run that exited on its own.
#[derive(Debug, Clone)]
pub struct ProcessExit {
    pub code: i32,
    pub polls: u64,
    pub events: u64,
    pub elapsed: Duration,
    pub output: Option<CapturedOutput>,
}

impl ProcessExit {
    pub fn outcome(&self, outputs: usize) -> ProcessOutcome {
        ProcessOutcome::classify(self.code, outputs)
    }

    /// Fail with `NonZeroExit` unless the tool exited cleanly.
    pub fn ensure_success(&self, tool: &str) -> Result<(), SupervisorError> {
        if self.code == 0 {
            Ok(())
        } else {
            Err(SupervisorError::NonZeroExit {
                tool: tool.to_string(),
                code: self.code,
            })
        }
    }
}

pub struct ProcessSupervisor {
    spec: CommandSpec,
    options: SupervisorOptions,
    state: SupervisorState,
}

impl ProcessSupervisor {
    pub fn new(spec: CommandSpec, options: SupervisorOptions) -> Self {
        Self {
            spec,
            options,
            state: SupervisorState::NotStarted,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Launch the tool and block until it exits.
    ///
    /// Returns the exit information for any exit code; the caller decides
    /// what a non-zero code or an empty output set means. Timeouts,
    /// cancellation and signal deaths are errors.
    pub fn run(&mut self, reporter: &dyn ProgressReporter) -> Result<ProcessExit, SupervisorError> {
        let tool = self.spec.tool_name();
        if self.state != SupervisorState::NotStarted {
            return Err(SupervisorError::AlreadyRan { tool });
        }

        let mut command = self.spec.to_command();
        command.stdin(Stdio::null());
        // Own process group, so the tool's workers can be signalled with it.
        #[cfg(unix)]
        command.process_group(0);
        if self.options.capture_output {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        info!("starting {}", self.spec.command_line());
        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            program: self.spec.program().to_string(),
            source,
        })?;
        self.state = SupervisorState::Running;
        debug!(pid = child.id(), "{tool} running");

        let drains = self
            .options
            .capture_output
            .then(|| StreamDrains::start(&mut child));

        let mut sequence = 0u64;
        let mut emit = |data: ProgressData| {
            reporter.on_progress(&ProgressEvent::new(sequence, data));
            sequence += 1;
        };
        emit(ProgressData::Started);

        let mut polls = 0u64;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    self.abort(&mut child, drains, &tool);
                    return Err(err.into());
                }
            }

            if self.cancelled() {
                warn!("cancellation requested; stopping {tool}");
                self.abort(&mut child, drains, &tool);
                return Err(SupervisorError::Cancelled { tool });
            }

            if let Some(limit) = self.options.timeout {
                if started.elapsed() >= limit {
                    warn!("{tool} exceeded {}s; terminating", limit.as_secs());
                    self.abort(&mut child, drains, &tool);
                    return Err(SupervisorError::TimedOut {
                        tool,
                        timeout_secs: limit.as_secs(),
                    });
                }
            }

            polls += 1;
            if let Some(data) = self.poll_status() {
                emit(data);
            }
            self.sleep_tick();
        };

        if group_alive(child.id()) {
            warn!("{tool} exited but left worker processes behind; stopping them");
            terminate(&mut child, self.options.terminate_grace);
        }
        let output = drains.map(StreamDrains::join);
        if let Some(output) = &output {
            replay_output(&tool, output);
        }

        let code = status
            .code()
            .ok_or_else(|| SupervisorError::Signalled { tool: tool.clone() })?;
        self.state = SupervisorState::Exited { code };
        let elapsed = started.elapsed();
        info!(
            "{tool} exited code={code} polls={polls} events={sequence} elapsed_secs={:.1}",
            elapsed.as_secs_f64()
        );

        Ok(ProcessExit {
            code,
            polls,
            events: sequence,
            elapsed,
            output,
        })
    }

    fn poll_status(&self) -> Option<ProgressData> {
        match &self.options.status {
            StatusSource::None => None,
            StatusSource::Counters(path) => status::read_snapshot(path).map(ProgressData::Status),
            StatusSource::LogText(path) => {
                if !path.is_file() {
                    return None;
                }
                status::read_status_text(path).map(ProgressData::Log)
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.options
            .cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn sleep_tick(&self) {
        let deadline = Instant::now() + self.options.poll_interval;
        loop {
            let now = Instant::now();
            if now >= deadline || self.cancelled() {
                return;
            }
            thread::sleep((deadline - now).min(CANCEL_CHECK_SLICE));
        }
    }

    fn abort(&self, child: &mut Child, drains: Option<StreamDrains>, tool: &str) {
        terminate(child, self.options.terminate_grace);
        if let Some(drains) = drains {
            replay_output(tool, &drains.join());
        }
    }
}

/// Log captured stdout as-is and stderr through the severity classifier.
fn replay_output(tool: &str, output: &CapturedOutput) {
    let stdout = output.stdout.trim_end();
    if !stdout.is_empty() {
        info!(target: "tool", tool, "{stdout}");
    }
    tool_log::classify(&output.stderr, &mut TracingSink::new(tool));
}

/// Ask the child's process group to stop, then kill whatever is left.
///
/// The group outlives the leader while any worker is still running, and
/// those workers hold the captured pipes open.
#[cfg(unix)]
fn terminate(child: &mut Child, grace: Duration) {
    let pgid = child.id();
    if signal_group(pgid, libc::SIGTERM) {
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            // Reap the leader so it no longer counts as a group member.
            if child.try_wait().is_err() || !group_alive(pgid) {
                break;
            }
            thread::sleep(TERMINATE_POLL);
        }
    }
    if signal_group(pgid, libc::SIGKILL) {
        debug!(pgid, "killed remaining processes in group");
    }
    if let Err(err) = child.wait() {
        warn!("failed to reap child {pgid}: {err}");
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, _grace: Duration) {
    if let Err(err) = child.kill() {
        warn!("failed to kill child {}: {err}", child.id());
    }
    let _ = child.wait();
}

/// Send `signal` to every process in group `pgid`; false when none is left.
#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) -> bool {
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), signal) };
    rc == 0
}

#[cfg(unix)]
fn group_alive(pgid: u32) -> bool {
    signal_group(pgid, 0)
}

#[cfg(not(unix))]
fn group_alive(_pgid: u32) -> bool {
    false
}

//! Background readers for captured child streams.
//!
//! Each pipe gets its own thread from the moment the child starts so a
//! chatty tool never blocks on a full pipe buffer while we poll.

use std::io::Read;
use std::process::Child;
use std::thread;

use tracing::warn;

type DrainHandle = thread::JoinHandle<std::io::Result<Vec<u8>>>;

/// Text collected from a child's stdout and stderr.
#[derive(Debug, Default, Clone)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

pub(crate) struct StreamDrains {
    stdout: Option<DrainHandle>,
    stderr: Option<DrainHandle>,
}

impl StreamDrains {
    /// Take the child's piped streams and start draining them.
    pub(crate) fn start(child: &mut Child) -> Self {
        Self {
            stdout: child.stdout.take().map(spawn_drain),
            stderr: child.stderr.take().map(spawn_drain),
        }
    }

    /// Wait for both readers to hit end-of-stream.
    ///
    /// Read failures are logged and yield whatever was not collected as
    /// empty text.
    pub(crate) fn join(self) -> CapturedOutput {
        CapturedOutput {
            stdout: join_drain(self.stdout, "stdout"),
            stderr: join_drain(self.stderr, "stderr"),
        }
    }
}

fn spawn_drain<R: Read + Send + 'static>(mut reader: R) -> DrainHandle {
    thread::spawn(move || {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_drain(handle: Option<DrainHandle>, label: &str) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    match handle.join() {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(err)) => {
            warn!("failed to read child {label}: {err}");
            String::new()
        }
        Err(_) => {
            warn!("child {label} reader panicked");
            String::new()
        }
    }
}

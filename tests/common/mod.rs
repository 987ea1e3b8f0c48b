//! Shared helpers for tests that drive fake plaso tools.
//!
//! Each fake is a small `sh` script written into a temp directory and
//! marked executable; the worker config is pointed at it.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use plaso_worker::config::{self, Config};

/// Argument parsing shared by the fake tools: sets `$status`, `$storage`,
/// `$csv`, `$logfile`, `$write` and `$last` (the final argument).
pub const PARSE_ARGS: &str = r#"
status=""; storage=""; csv=""; logfile=""; write=""; last=""
while [ $# -gt 0 ]; do
  case "$1" in
    --status-view-file) status="$2"; shift ;;
    --storage-file) storage="$2"; shift ;;
    -w) csv="$2"; shift ;;
    --logfile) logfile="$2"; shift ;;
    --write) write="$2"; shift ;;
  esac
  last="$1"
  shift
done
"#;

/// Replace the status file in one step so polls never see a torn write.
pub const WRITE_STATUS: &str = r#"
write_status() {
  printf '%s\n' "$1" > "$status.tmp" && mv "$status.tmp" "$status"
}
"#;

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let script = format!("#!/bin/sh\n{body}\n");
    fs::write(&path, script).expect("write script");
    let mut perms = fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod script");
    path
}

/// A fake tool that understands the worker's flags, then runs `body`.
pub fn write_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let script = format!(
        "if [ \"$1\" = \"--version\" ]; then echo \"plaso - {name} version 20240308\"; exit 0; fi\n{PARSE_ARGS}\n{WRITE_STATUS}\n{body}"
    );
    write_script(dir, name, &script)
}

/// Default config with every tool pointed at `tool` and fast polling.
pub fn config_with_tool(tool: &Path) -> Config {
    let mut cfg = config::load_config(None).expect("config").config;
    let program = tool.to_string_lossy().into_owned();
    cfg.tools.log2timeline = program.clone();
    cfg.tools.psort = program.clone();
    cfg.tools.image_export = program;
    cfg.poll_interval_ms.log2timeline = 20;
    cfg.poll_interval_ms.psort = 20;
    cfg.poll_interval_ms.image_export = 20;
    cfg.terminate_grace_ms = 200;
    cfg
}

pub fn write_input(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write input");
    path
}

/// Directories directly under `dir` whose name starts with `prefix`.
pub fn dirs_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .expect("read dir")
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with(prefix))
        })
        .collect()
}

//! # Input Files
//!
//! Input descriptors handed to a task, either directly or through the
//! encoded result of the previous task in a workflow.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

use crate::output::OutputFile;
use crate::result::{ResultError, TaskResult};

#[derive(Debug, Error)]
pub enum InputError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid pipe result: {0}")]
    PipeResult(#[from] ResultError),
    #[error("no input files")]
    Empty,
    #[error("input file {0} has no path")]
    MissingPath(usize),
    #[error("expected file not found: {0}")]
    MissingExpected(PathBuf),
    #[error("duplicate input file name {0}")]
    DuplicateName(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
}

impl InputFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Display name, falling back to the file name of the path.
    pub fn display_name(&self) -> String {
        self.display_name.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }

    fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

impl From<OutputFile> for InputFile {
    fn from(file: OutputFile) -> Self {
        Self {
            path: file.path,
            display_name: Some(file.display_name),
            uuid: Some(file.uuid),
            data_type: file.data_type,
            extension: Some(file.extension),
        }
    }
}

/// Resolve the inputs of a task.
///
/// The outputs of the previous task win over the explicit list when a pipe
/// result is present.
pub fn get_input_files(
    pipe_result: Option<&str>,
    input_files: Vec<InputFile>,
) -> Result<Vec<InputFile>, InputError> {
    let files = match pipe_result.map(str::trim).filter(|s| !s.is_empty()) {
        Some(encoded) => {
            let previous = TaskResult::decode(encoded)?;
            previous.output_files.into_iter().map(InputFile::from).collect()
        }
        None => input_files,
    };

    for (idx, file) in files.iter().enumerate() {
        if file.path.as_os_str().is_empty() {
            return Err(InputError::MissingPath(idx));
        }
    }
    Ok(files)
}

/// True when every path ends in an EWF segment extension (`.e01`-`.e99`).
pub fn is_ewf_files(files: &[InputFile]) -> bool {
    files
        .iter()
        .all(|file| has_ewf_extension(&file.path.to_string_lossy()))
}

fn has_ewf_extension(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    if bytes.len() < 4 {
        return false;
    }
    let tail = &bytes[bytes.len() - 4..];
    tail[0] == b'.'
        && tail[1] == b'e'
        && tail[2].is_ascii_digit()
        && tail[3].is_ascii_digit()
        && !(tail[2] == b'0' && tail[3] == b'0')
}

/// Hard links of several inputs gathered in one scratch directory.
///
/// The directory is removed when this value is dropped, on success and
/// failure alike.
pub struct LinkedInputs {
    dir: TempDir,
    entry: PathBuf,
}

impl LinkedInputs {
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// The path to hand to the tool: the first EWF segment for a segmented
    /// image, the directory itself otherwise.
    pub fn entry(&self) -> &Path {
        &self.entry
    }
}

/// Hard-link `files` into a new scratch directory under `parent`.
pub fn link_inputs(files: &[InputFile], parent: &Path) -> Result<LinkedInputs, InputError> {
    if files.is_empty() {
        return Err(InputError::Empty);
    }
    std::fs::create_dir_all(parent)?;
    let dir = tempfile::Builder::new().prefix("inputs-").tempdir_in(parent)?;

    for (idx, file) in files.iter().enumerate() {
        let name = file.file_name().ok_or(InputError::MissingPath(idx))?;
        let target = dir.path().join(&name);
        if target.exists() {
            return Err(InputError::DuplicateName(name));
        }
        std::fs::hard_link(&file.path, &target)?;
        debug!("linked {} -> {}", file.path.display(), target.display());
    }

    let entry = if is_ewf_files(files) {
        let first = files
            .iter()
            .filter_map(InputFile::file_name)
            .find(|name| name.to_ascii_lowercase().ends_with(".e01"))
            .map(|name| dir.path().join(name))
            .unwrap_or_else(|| dir.path().join("*.E01"));
        if !first.is_file() {
            return Err(InputError::MissingExpected(first));
        }
        first
    } else {
        dir.path().to_path_buf()
    };

    Ok(LinkedInputs { dir, entry })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> Vec<InputFile> {
        paths.iter().map(|p| InputFile::from_path(*p)).collect()
    }

    #[test]
    fn all_valid_ewf_files() {
        assert!(is_ewf_files(&files(&[
            "/path/to/image.e01",
            "/path/to/image.e02",
            "/path/to/image.e03"
        ])));
        assert!(is_ewf_files(&files(&["/path/to/evidence.e01"])));
    }

    #[test]
    fn ewf_extensions_are_case_insensitive() {
        assert!(is_ewf_files(&files(&["/p/image.E01", "/p/image.E02", "/p/image.e03"])));
    }

    #[test]
    fn mixed_or_non_ewf_files() {
        assert!(!is_ewf_files(&files(&["/p/image.e01", "/p/document.txt"])));
        assert!(!is_ewf_files(&files(&["/p/document.txt", "/p/data.bin"])));
    }

    #[test]
    fn empty_list_counts_as_ewf() {
        assert!(is_ewf_files(&[]));
    }

    #[test]
    fn empty_path_is_not_ewf() {
        assert!(!is_ewf_files(&files(&["/p/image.e01", "", "/p/image.e02"])));
    }

    #[test]
    fn boundary_and_invalid_extensions() {
        for ext in [".e01", ".e15", ".e50", ".e99"] {
            assert!(is_ewf_files(&files(&[format!("/p/image{ext}").as_str()])), "{ext}");
        }
        for ext in [".e00", ".e100", ".e999", ".exe01", ".e01.bak"] {
            assert!(!is_ewf_files(&files(&[format!("/p/image{ext}").as_str()])), "{ext}");
        }
    }

    #[test]
    fn pipe_result_overrides_explicit_inputs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let slot = crate::output::create_output_file(
            dir.path(),
            crate::output::OutputSpec::named("host.plaso"),
        )
        .expect("slot");
        let previous = TaskResult {
            output_files: vec![slot.clone()],
            workflow_id: None,
            command: String::new(),
            meta: Default::default(),
        };
        let encoded = previous.encode().expect("encode");

        let inputs = get_input_files(Some(&encoded), files(&["/ignored"])).expect("inputs");
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].path, slot.path);
        assert_eq!(inputs[0].display_name(), "host.plaso");

        let explicit = get_input_files(None, files(&["/a"])).expect("inputs");
        assert_eq!(explicit[0].display_name(), "a");
    }

    #[test]
    fn input_without_path_is_rejected() {
        let err = get_input_files(None, vec![InputFile::default()]).unwrap_err();
        assert!(matches!(err, InputError::MissingPath(0)));
    }

    #[test]
    fn linked_ewf_set_points_at_first_segment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("disk.E01");
        let b = dir.path().join("disk.E02");
        std::fs::write(&a, "1").expect("write");
        std::fs::write(&b, "2").expect("write");
        let inputs = vec![InputFile::from_path(&b), InputFile::from_path(&a)];

        let linked = link_inputs(&inputs, &dir.path().join("work")).expect("link");
        assert_eq!(linked.entry(), linked.dir().join("disk.E01"));
        let scratch = linked.dir().to_path_buf();
        assert!(scratch.join("disk.E02").is_file());
        drop(linked);
        assert!(!scratch.exists());
    }

    #[test]
    fn linked_ewf_set_without_first_segment_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let b = dir.path().join("disk.E02");
        let c = dir.path().join("disk.E03");
        std::fs::write(&b, "2").expect("write");
        std::fs::write(&c, "3").expect("write");
        let inputs = vec![InputFile::from_path(&b), InputFile::from_path(&c)];
        let err = link_inputs(&inputs, &dir.path().join("work")).err().expect("error");
        assert!(matches!(err, InputError::MissingExpected(_)));
    }

    #[test]
    fn linked_plain_files_point_at_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.evtx");
        let b = dir.path().join("b.evtx");
        std::fs::write(&a, "1").expect("write");
        std::fs::write(&b, "2").expect("write");
        let linked = link_inputs(&[InputFile::from_path(&a), InputFile::from_path(&b)], dir.path())
            .expect("link");
        assert_eq!(linked.entry(), linked.dir());
    }
}

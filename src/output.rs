//! # Output Files
//!
//! Allocation of named output slots in the task's output directory.
//!
//! A slot is a fresh, uniquely named path plus the display metadata the
//! result envelope carries for it. Allocating a slot does not create the
//! file; the tool (or a relocation) does.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot relocate {path}: {source}")]
    Relocate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One produced file, as listed in a task result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub uuid: String,
    pub display_name: String,
    pub extension: String,
    #[serde(default)]
    pub data_type: Option<String>,
    pub path: PathBuf,
    #[serde(default)]
    pub original_path: Option<String>,
}

impl OutputFile {
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

/// Naming hints for a new output slot.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutputSpec<'a> {
    /// Name shown to users; the extension is derived from it when unset.
    pub display_name: Option<&'a str>,
    pub extension: Option<&'a str>,
    pub data_type: Option<&'a str>,
    /// Path of the file inside the tool's own output tree.
    pub original_path: Option<&'a str>,
}

impl<'a> OutputSpec<'a> {
    pub fn named(display_name: &'a str) -> Self {
        Self {
            display_name: Some(display_name),
            ..Self::default()
        }
    }

    pub fn with_extension(extension: &'a str) -> Self {
        Self {
            extension: Some(extension),
            ..Self::default()
        }
    }

    pub fn data_type(mut self, data_type: &'a str) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn original_path(mut self, original_path: &'a str) -> Self {
        self.original_path = Some(original_path);
        self
    }
}

/// Allocate a new output slot under `output_dir`.
pub fn create_output_file(output_dir: &Path, spec: OutputSpec<'_>) -> Result<OutputFile, OutputError> {
    std::fs::create_dir_all(output_dir)?;

    let uuid = Uuid::new_v4().simple().to_string();
    let extension = spec
        .extension
        .map(|ext| ext.trim_start_matches('.').to_string())
        .or_else(|| spec.display_name.and_then(extension_of))
        .unwrap_or_default();

    let file_name = if extension.is_empty() {
        uuid.clone()
    } else {
        format!("{uuid}.{extension}")
    };
    let display_name = spec
        .display_name
        .map(str::to_string)
        .unwrap_or_else(|| file_name.clone());

    Ok(OutputFile {
        path: output_dir.join(&file_name),
        uuid,
        display_name,
        extension,
        data_type: spec.data_type.map(str::to_string),
        original_path: spec.original_path.map(str::to_string),
    })
}

/// Move `source` into a fresh slot, keeping `relative` as its display name.
pub fn relocate_into_output(
    output_dir: &Path,
    source: &Path,
    relative: &str,
) -> Result<OutputFile, OutputError> {
    let slot = create_output_file(
        output_dir,
        OutputSpec::named(relative).original_path(relative),
    )?;
    move_file(source, &slot.path)?;
    debug!("relocated {} -> {}", source.display(), slot.path.display());
    Ok(slot)
}

fn move_file(source: &Path, target: &Path) -> Result<(), OutputError> {
    match std::fs::rename(source, target) {
        Ok(()) => Ok(()),
        // Scratch directories may live on another filesystem.
        Err(err) if err.kind() == ErrorKind::CrossesDevices => {
            std::fs::copy(source, target).map_err(|source_err| OutputError::Relocate {
                path: source.to_path_buf(),
                source: source_err,
            })?;
            std::fs::remove_file(source)?;
            Ok(())
        }
        Err(err) => Err(OutputError::Relocate {
            path: source.to_path_buf(),
            source: err,
        }),
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_slot_derives_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let slot = create_output_file(
            dir.path(),
            OutputSpec::named("disk.E01.plaso").data_type("plaso:log2timeline:plaso_storage"),
        )
        .expect("slot");
        assert_eq!(slot.display_name, "disk.E01.plaso");
        assert_eq!(slot.extension, "plaso");
        assert_eq!(slot.path, dir.path().join(format!("{}.plaso", slot.uuid)));
        assert_eq!(slot.data_type.as_deref(), Some("plaso:log2timeline:plaso_storage"));
        assert!(!slot.exists());
    }

    #[test]
    fn extension_only_slot_uses_file_name_as_display() {
        let dir = tempfile::tempdir().expect("tempdir");
        let slot = create_output_file(dir.path(), OutputSpec::with_extension(".status")).expect("slot");
        assert_eq!(slot.extension, "status");
        assert_eq!(slot.display_name, format!("{}.status", slot.uuid));
    }

    #[test]
    fn slots_are_unique() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = create_output_file(dir.path(), OutputSpec::with_extension("csv")).expect("a");
        let b = create_output_file(dir.path(), OutputSpec::with_extension("csv")).expect("b");
        assert_ne!(a.path, b.path);
    }

    #[test]
    fn relocation_moves_file_and_keeps_relative_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scratch = dir.path().join("scratch").join("Windows");
        std::fs::create_dir_all(&scratch).expect("scratch");
        let source = scratch.join("setupapi.log");
        std::fs::write(&source, b"log").expect("write");

        let out = dir.path().join("out");
        let slot = relocate_into_output(&out, &source, "Windows/setupapi.log").expect("relocate");
        assert!(!source.exists());
        assert_eq!(std::fs::read(&slot.path).expect("read"), b"log");
        assert_eq!(slot.display_name, "Windows/setupapi.log");
        assert_eq!(slot.original_path.as_deref(), Some("Windows/setupapi.log"));
        assert_eq!(slot.extension, "log");
    }
}

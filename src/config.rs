use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    pub log2timeline: String,
    pub psort: String,
    pub image_export: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollIntervals {
    pub log2timeline: u64,
    pub psort: u64,
    pub image_export: u64,
}

/// Parser and archive names known to the installed plaso.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Catalog {
    #[serde(default)]
    pub parsers: Vec<String>,
    #[serde(default)]
    pub archives: Vec<String>,
}

impl Catalog {
    /// Names from `requested` that the catalog does not know.
    ///
    /// A parser plugin (`parser/plugin`) is known when its parent parser is.
    pub fn unknown_parsers<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        requested
            .iter()
            .map(String::as_str)
            .filter(|name| {
                let parent = name.split('/').next().unwrap_or(name);
                !self.parsers.iter().any(|p| p == name || p == parent)
            })
            .collect()
    }

    pub fn unknown_archives<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        requested
            .iter()
            .map(String::as_str)
            .filter(|name| !self.archives.iter().any(|a| a == name))
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub tools: ToolsConfig,
    pub poll_interval_ms: PollIntervals,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    pub terminate_grace_ms: u64,
    pub inspect_storage: bool,
    #[serde(default)]
    pub catalog: Catalog,
}

impl Config {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let polls = &self.poll_interval_ms;
        if polls.log2timeline == 0 || polls.psort == 0 || polls.image_export == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms values must be greater than zero".to_string(),
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "timeout_secs must be greater than zero when set".to_string(),
            ));
        }
        let tools = &self.tools;
        for (name, value) in [
            ("log2timeline", &tools.log2timeline),
            ("psort", &tools.psort),
            ("image_export", &tools.image_export),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("tools.{name} is empty")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p)?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let config: Config = serde_yaml::from_slice(&bytes)?;
    config.validate()?;

    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig { config, config_hash })
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest)
}

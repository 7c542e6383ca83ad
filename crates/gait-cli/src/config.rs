// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading for the gait CLI.

use schemars::JsonSchema;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Durable defaults read from a TOML file so interactive invocations don't
/// have to repeat `--state-root`/`--job-root`/key-file flags every time.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct CliConfig {
    /// Default parent directory for rate-limit state files.
    #[serde(default)]
    pub state_root: Option<PathBuf>,
    /// Default parent directory for job runtime directories.
    #[serde(default)]
    pub job_root: Option<PathBuf>,
    /// Default path to a raw 32-byte Ed25519 signing key seed.
    #[serde(default)]
    pub signing_key_file: Option<PathBuf>,
    /// Default path to a raw 32-byte Ed25519 verifying key.
    #[serde(default)]
    pub verifying_key_file: Option<PathBuf>,
}

/// Errors found while loading or parsing a [`CliConfig`] file.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config file: {e}"),
            ConfigError::Parse(e) => write!(f, "failed to parse config file: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Loads a [`CliConfig`] from `path`, or returns the default if `path` is
/// `None`.
pub fn load(path: Option<&Path>) -> Result<CliConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(CliConfig::default());
    };
    let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&contents).map_err(ConfigError::Parse)
}

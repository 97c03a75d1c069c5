//! Fuzzer configuration, read from TOML.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::vm::process::CommandTemplate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// An engine under test and the command that runs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub name: String,
    pub command: CommandTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FuzzConfig {
    /// Whitelist file or directory of whitelist files.
    pub catalog: PathBuf,
    /// JSON Lines file findings are appended to.
    pub findings: PathBuf,
    pub iterations: u64,
    /// Master seed. Drawn from the OS when absent.
    pub seed: Option<u64>,
    /// Worker threads; 0 uses one per core.
    pub workers: usize,
    /// Per-engine execution timeout.
    pub timeout_ms: u64,
    pub compile_timeout_ms: u64,
    /// Wall-clock budget for a whole run.
    pub deadline_secs: Option<u64>,
    /// Re-run both engines before committing a finding.
    pub confirm_findings: bool,
    pub compiler: CommandTemplate,
    pub engine_a: EngineConfig,
    pub engine_b: EngineConfig,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            catalog: PathBuf::from("hint_whitelist"),
            findings: PathBuf::from("findings.jsonl"),
            iterations: 1000,
            seed: None,
            workers: 0,
            timeout_ms: 30_000,
            compile_timeout_ms: 60_000,
            deadline_secs: None,
            confirm_findings: true,
            compiler: CommandTemplate::new(
                "cairo-compile",
                &["{source}", "--output", "{artifact}"],
            ),
            engine_a: EngineConfig {
                name: "cairo-lang".into(),
                command: CommandTemplate::new(
                    "cairo-run",
                    &[
                        "--program",
                        "{artifact}",
                        "--memory_file",
                        "{memory}",
                        "--layout",
                        "all_cairo",
                    ],
                ),
            },
            engine_b: EngineConfig {
                name: "cairo-vm".into(),
                command: CommandTemplate::new(
                    "cairo-vm-cli",
                    &["{artifact}", "--memory_file", "{memory}", "--layout", "all_cairo"],
                ),
            },
        }
    }
}

impl FuzzConfig {
    /// Reads a TOML config. Missing keys take their default.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 || self.compile_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        for (what, template) in [
            ("compiler", &self.compiler),
            ("engine_a", &self.engine_a.command),
            ("engine_b", &self.engine_b.command),
        ] {
            if template.program.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{what} has an empty program")));
            }
        }
        if self.engine_a.name == self.engine_b.name {
            return Err(ConfigError::Invalid(format!(
                "both engines are named `{}`",
                self.engine_a.name
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

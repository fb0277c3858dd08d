//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Engine timing settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Scheduling of scenario instances
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Default definition directories
    #[serde(default)]
    pub paths: PathsConfig,

    /// Backend client programs
    #[serde(default)]
    pub backends: BackendConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine timing settings
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Delay between attempts of a retried step
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Poll interval used when an `eventually` expectation omits one
    #[serde(default = "default_poll_interval")]
    pub default_poll_interval_ms: u64,

    /// Timeout used when an `eventually` expectation omits one
    #[serde(default = "default_eventually_timeout")]
    pub default_eventually_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: default_retry_backoff(),
            default_poll_interval_ms: default_poll_interval(),
            default_eventually_timeout_secs: default_eventually_timeout(),
        }
    }
}

impl EngineConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn default_poll_interval(&self) -> Duration {
        Duration::from_millis(self.default_poll_interval_ms)
    }

    pub fn default_eventually_timeout(&self) -> Duration {
        Duration::from_secs(self.default_eventually_timeout_secs)
    }
}

fn default_retry_backoff() -> u64 {
    1000
}
fn default_poll_interval() -> u64 {
    500
}
fn default_eventually_timeout() -> u64 {
    5
}

/// Scheduling of scenario instances
#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    /// Number of scenario instances run concurrently
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Stop scheduling new instances after the first failure
    #[serde(default)]
    pub fail_fast: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            fail_fast: false,
        }
    }
}

fn default_jobs() -> usize {
    1
}

/// Default definition directories
#[derive(Debug, Deserialize, Default, Clone)]
pub struct PathsConfig {
    /// Directory of action definition files
    pub actions: Option<PathBuf>,

    /// Directory of scenario definition files
    pub scenarios: Option<PathBuf>,
}

/// Backend client programs
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Shell used by local process actions
    #[serde(default = "default_shell")]
    pub shell: String,

    /// PostgreSQL command-line client used by database actions
    #[serde(default = "default_psql")]
    pub psql: String,

    /// SSH client used by remote session actions
    #[serde(default = "default_ssh")]
    pub ssh: String,

    /// Extra options passed to every ssh invocation
    #[serde(default = "default_ssh_options")]
    pub ssh_options: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            psql: default_psql(),
            ssh: default_ssh(),
            ssh_options: default_ssh_options(),
        }
    }
}

fn default_shell() -> String {
    "sh".to_string()
}
fn default_psql() -> String {
    "psql".to_string()
}
fn default_ssh() -> String {
    "ssh".to_string()
}
fn default_ssh_options() -> Vec<String> {
    vec!["-o".to_string(), "BatchMode=yes".to_string()]
}

/// Log output settings
#[derive(Debug, Deserialize, Default, Clone)]
pub struct LoggingConfig {
    /// Run log file, written in addition to stderr
    pub file: Option<PathBuf>,

    /// Directory for one log file per scenario instance
    pub per_instance_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}

//! Driver configuration.
//!
//! Settings live in `~/.config/prl/config.yaml` (platform config dir) and can
//! be overridden per invocation through `PRL_*` environment variables. A
//! missing file is not an error; every field has a default.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const ENV_PRLCTL: &str = "PRL_PRLCTL";
pub const ENV_PRLSRVCTL: &str = "PRL_PRLSRVCTL";
pub const ENV_RETRY_ATTEMPTS: &str = "PRL_RETRY_ATTEMPTS";
pub const ENV_RETRY_DELAY_MS: &str = "PRL_RETRY_DELAY_MS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml_ng::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root structure of the driver configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub tools: ToolSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub network: NetworkSettings,
}

/// Locations of the control utilities. Unset entries are looked up on `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prlctl: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prlsrvctl: Option<PathBuf>,
}

/// Bounded retry policy for commands marked retryable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts for a retryable command, the first one included
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Pause between attempts, in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    1000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Naming used when the driver creates objects on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Separator between template name, timestamp and random suffix of cloned VMs
    #[serde(default = "default_clone_separator")]
    pub clone_name_separator: String,
}

fn default_clone_separator() -> String {
    "_".to_string()
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            clone_name_separator: default_clone_separator(),
        }
    }
}

impl DriverConfig {
    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("prl").join("config.yaml"))
    }

    /// Load configuration from `path` (or the default location), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                debug!("No config file at {}, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file without environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: DriverConfig = if content.trim().is_empty() {
            DriverConfig::default()
        } else {
            serde_yaml_ng::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };
        config.tools.prlctl = config.tools.prlctl.map(expand_path);
        config.tools.prlsrvctl = config.tools.prlsrvctl.map(expand_path);
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = env::var(ENV_PRLCTL) {
            self.tools.prlctl = Some(expand_path(PathBuf::from(path)));
        }
        if let Ok(path) = env::var(ENV_PRLSRVCTL) {
            self.tools.prlsrvctl = Some(expand_path(PathBuf::from(path)));
        }
        if let Ok(value) = env::var(ENV_RETRY_ATTEMPTS) {
            self.retry.attempts = parse_env(ENV_RETRY_ATTEMPTS, &value)?;
        }
        if let Ok(value) = env::var(ENV_RETRY_DELAY_MS) {
            self.retry.delay_ms = parse_env(ENV_RETRY_DELAY_MS, &value)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.retry.attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retry.attempts".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Expand `~` and environment variables; leave the path untouched if expansion fails.
fn expand_path(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(raw) => match shellexpand::full(raw) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(_) => path,
        },
        None => path,
    }
}

//! Configuration module
//!
//! Handles loading and saving deployer configuration from TOML files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::deploy::poll::PollPolicy;
use crate::error::ConfigError;

/// Main configuration structure for the deployer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Control plane connection settings
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    /// Deployment defaults
    #[serde(default)]
    pub deploy: DeployConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Control plane connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Base URL of the control plane API
    #[serde(default = "default_control_plane_url")]
    pub url: String,

    /// API key for authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Deployment defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Region used when no flag or record names one
    #[serde(default = "default_region")]
    pub region: String,

    /// Service principal allowed to assume execution identities
    #[serde(default = "default_trust_principal")]
    pub trust_principal: String,

    /// Wait after identity creation, in seconds
    #[serde(default = "default_propagation_delay")]
    pub propagation_delay_secs: u64,

    /// Status poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum status polls (0 = no cap)
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Maximum total poll time in seconds (0 = no cap)
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Tear down partial resources when a stage fails
    #[serde(default)]
    pub rollback_on_failure: bool,

    /// Directory holding deployment records
    #[serde(default = "default_records_dir")]
    pub records_dir: PathBuf,

    /// Endpoint qualifier used for invocations
    #[serde(default = "default_invoke_qualifier")]
    pub invoke_qualifier: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_control_plane_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_trust_principal() -> String {
    "bedrock-agentcore.amazonaws.com".to_string()
}

fn default_propagation_delay() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    10
}

fn default_max_poll_attempts() -> u32 {
    90
}

fn default_poll_timeout() -> u64 {
    1800
}

fn default_records_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_invoke_qualifier() -> String {
    "DEFAULT".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            url: default_control_plane_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            trust_principal: default_trust_principal(),
            propagation_delay_secs: default_propagation_delay(),
            poll_interval_secs: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            poll_timeout_secs: default_poll_timeout(),
            rollback_on_failure: false,
            records_dir: default_records_dir(),
            invoke_qualifier: default_invoke_qualifier(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl DeployConfig {
    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.propagation_delay_secs)
    }

    /// Poll policy with zero bounds mapped to "no cap"
    pub fn poll_policy(&self) -> PollPolicy {
        let mut policy = PollPolicy::new(Duration::from_secs(self.poll_interval_secs));
        if self.max_poll_attempts > 0 {
            policy = policy.with_max_attempts(self.max_poll_attempts);
        }
        if self.poll_timeout_secs > 0 {
            policy = policy.with_timeout(Duration::from_secs(self.poll_timeout_secs));
        }
        policy
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load configuration, falling back to defaults when the file is missing
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

//! Error types for the deployer.

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::record::IdentityRef;
use crate::runtime::adapter::RuntimeStatus;

/// Errors returned by a remote service call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// The referenced resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service refused the request.
    #[error("[{code}] {message}")]
    Rejected {
        /// Service error code.
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// The request never got a usable answer.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ServiceError {
    /// Create a rejection error.
    #[must_use]
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the resource is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Identity or permission creation failed.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    /// The identity itself could not be created.
    #[error("failed to create identity {name}: {source}")]
    CreateIdentity {
        /// Identity name that was requested.
        name: String,
        /// Underlying service error.
        source: ServiceError,
    },

    /// The identity exists but a permission document could not be attached.
    #[error("failed to attach {policy} to {}: {source}", .identity.name)]
    AttachPolicy {
        /// Permission document name.
        policy: String,
        /// The partially configured identity, still live.
        identity: IdentityRef,
        /// Underlying service error.
        source: ServiceError,
    },

    /// The trust or permission document could not be rendered.
    #[error("failed to render policy document: {0}")]
    Document(#[from] serde_json::Error),
}

impl ProvisioningError {
    /// Identity left behind by a failed provisioning attempt, if any.
    pub fn partial_identity(&self) -> Option<&IdentityRef> {
        match self {
            Self::AttachPolicy { identity, .. } => Some(identity),
            _ => None,
        }
    }
}

/// Workload packaging failed.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// A package source could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// Offending file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The package could not be compressed.
    #[error("failed to compress package: {0}")]
    Compress(std::io::Error),

    /// The manifest could not be serialised.
    #[error("failed to encode package manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// A wire package was not valid base64.
    #[error("malformed package encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// Configuration or launch was rejected.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The launch configuration is unusable.
    #[error("invalid launch configuration: {0}")]
    InvalidConfig(String),

    /// The workload could not be packaged.
    #[error(transparent)]
    Package(#[from] PackageError),

    /// The workload service refused the launch.
    #[error("launch rejected: {0}")]
    Rejected(#[from] ServiceError),
}

/// The status poller gave up or could not query.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The attempt or time bound was exceeded before a terminal status.
    #[error(
        "runtime {runtime_id} not terminal after {attempts} polls ({}s); last status {}",
        .elapsed.as_secs(),
        .last_status.as_ref().map(|s| s.as_str()).unwrap_or("none")
    )]
    Timeout {
        /// Runtime being polled.
        runtime_id: String,
        /// Number of status queries made.
        attempts: u32,
        /// Time spent polling.
        elapsed: Duration,
        /// Most recent status observed.
        last_status: Option<RuntimeStatus>,
    },

    /// A status query failed.
    #[error("status query for {runtime_id} failed: {source}")]
    Query {
        /// Runtime being polled.
        runtime_id: String,
        /// Underlying service error.
        source: ServiceError,
    },
}

/// The smoke test could not complete or decode.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    /// The invocation call failed.
    #[error("invocation failed: {0}")]
    Service(#[from] ServiceError),

    /// The response matched neither framing.
    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Record persistence failed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// File I/O failed.
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        /// Record file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A record could not be (de)serialised.
    #[error("malformed deployment record {}: {source}", .path.display())]
    Serde {
        /// Record file.
        path: PathBuf,
        /// Underlying serde error.
        source: serde_json::Error,
    },

    /// No record exists for the agent.
    #[error("no deployment record found for agent {0}")]
    NotFound(String),
}

/// Configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        /// Config file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        /// Config file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// One or more resource classes could not be deleted.
#[derive(Debug, thiserror::Error)]
#[error("cleanup incomplete for {agent_name}: {}", .failed.join(", "))]
pub struct CleanupError {
    /// Agent whose resources remain.
    pub agent_name: String,
    /// `class: message` entries for each failure.
    pub failed: Vec<String>,
}

/// A deploy stage failed.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// The agent name cannot be used to derive resource names.
    #[error("invalid agent name {name:?}: {reason}")]
    InvalidAgentName {
        /// Rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The agent name still has a record from an earlier deployment.
    #[error("deployment record for {agent_name} already exists at {}", path.display())]
    RecordExists {
        /// Agent name of the request.
        agent_name: String,
        /// File holding the existing record.
        path: PathBuf,
    },

    /// Identity provisioning failed.
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    /// Configuration or launch failed.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// The instance reached a terminal failure status.
    #[error("runtime {runtime_id} reached terminal status {status}")]
    TerminalFailure {
        /// Failed runtime.
        runtime_id: String,
        /// Failure status observed.
        status: RuntimeStatus,
    },

    /// Polling exceeded its bound or a status query failed.
    #[error(transparent)]
    Poll(#[from] PollError),

    /// The deployment record could not be persisted.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DeployError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidAgentName { .. } | Self::RecordExists { .. } | Self::Store(_) => 1,
            Self::Provisioning(_) => 2,
            Self::Launch(_) => 3,
            Self::TerminalFailure { .. } => 4,
            Self::Poll(PollError::Timeout { .. }) => 5,
            Self::Poll(PollError::Query { .. }) => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_identity_only_on_attach_failure() {
        let identity = IdentityRef::new("demo_role_1a2b3c4d", "arn:demo");
        let err = ProvisioningError::AttachPolicy {
            policy: "demo_role_1a2b3c4d_bedrock_policy".into(),
            identity: identity.clone(),
            source: ServiceError::rejected("AccessDenied", "nope"),
        };
        assert_eq!(err.partial_identity(), Some(&identity));

        let err = ProvisioningError::CreateIdentity {
            name: "demo_role_1a2b3c4d".into(),
            source: ServiceError::Transport("reset".into()),
        };
        assert!(err.partial_identity().is_none());
    }

    #[test]
    fn test_exit_codes_are_distinct_per_stage() {
        let launch: DeployError = LaunchError::InvalidConfig("x".into()).into();
        let timeout: DeployError = PollError::Timeout {
            runtime_id: "rt".into(),
            attempts: 3,
            elapsed: Duration::from_secs(30),
            last_status: Some(RuntimeStatus::Creating),
        }
        .into();
        let failed = DeployError::TerminalFailure {
            runtime_id: "rt".into(),
            status: RuntimeStatus::CreateFailed,
        };
        assert_eq!(launch.exit_code(), 3);
        assert_eq!(timeout.exit_code(), 5);
        assert_eq!(failed.exit_code(), 4);
    }

    #[test]
    fn test_timeout_message_names_last_status() {
        let err = PollError::Timeout {
            runtime_id: "rt-1".into(),
            attempts: 2,
            elapsed: Duration::from_secs(20),
            last_status: Some(RuntimeStatus::Updating),
        };
        let msg = err.to_string();
        assert!(msg.contains("rt-1"));
        assert!(msg.contains("UPDATING"));
    }
}

//! Deployment Record
//!
//! The local durable record of everything provisioned for one agent
//! deployment. It is the only source of truth for cleanup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeployError;
use crate::runtime::adapter::{LaunchResult, RuntimeStatus};

/// Longest agent name accepted; derived identity names must stay within service limits
pub const MAX_AGENT_NAME_LEN: usize = 48;

/// Reference to a provisioned execution identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRef {
    pub name: String,
    pub arn: String,
    /// Permission documents attached so far
    #[serde(default)]
    pub policies: Vec<String>,
}

impl IdentityRef {
    pub fn new(name: impl Into<String>, arn: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arn: arn.into(),
            policies: Vec::new(),
        }
    }
}

/// Persisted state of one deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub agent_name: String,
    pub identity_ref: Option<IdentityRef>,
    pub runtime_id: Option<String>,
    pub runtime_ref: Option<String>,
    pub registry_ref: Option<String>,
    pub region: String,
    pub status: Option<RuntimeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_digest: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Start a record once the identity exists
    pub fn new(agent_name: &str, region: &str, identity: IdentityRef) -> Self {
        let now = Utc::now();
        Self {
            agent_name: agent_name.to_string(),
            identity_ref: Some(identity),
            runtime_id: None,
            runtime_ref: None,
            registry_ref: None,
            region: region.to_string(),
            status: None,
            package_digest: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fill in the identifiers assigned at launch
    pub fn record_launch(&mut self, launch: &LaunchResult, package_digest: &str) {
        self.runtime_id = Some(launch.runtime_id.clone());
        self.runtime_ref = Some(launch.runtime_ref.clone());
        self.registry_ref = Some(launch.registry_ref.clone());
        self.package_digest = Some(package_digest.to_string());
        self.status = Some(RuntimeStatus::Creating);
        self.touch();
    }

    pub fn record_status(&mut self, status: RuntimeStatus) {
        self.status = Some(status);
        self.touch();
    }

    /// Whether the last observed status is READY
    pub fn is_ready(&self) -> bool {
        self.status == Some(RuntimeStatus::Ready)
    }

    /// Whether any remote resource is still referenced
    pub fn has_resources(&self) -> bool {
        self.identity_ref.is_some() || self.runtime_id.is_some() || self.registry_ref.is_some()
    }

    /// Whether `other` describes the same deployment, not just the same agent name
    pub fn is_same_deployment(&self, other: &DeploymentRecord) -> bool {
        self.agent_name == other.agent_name && self.created_at == other.created_at
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Check that `name` can be used to derive remote resource names
pub fn validate_agent_name(name: &str) -> Result<(), DeployError> {
    let invalid = |reason| {
        Err(DeployError::InvalidAgentName {
            name: name.to_string(),
            reason,
        })
    };

    let Some(first) = name.chars().next() else {
        return invalid("must not be empty");
    };
    if !first.is_ascii_alphabetic() {
        return invalid("must start with a letter");
    }
    if name.len() > MAX_AGENT_NAME_LEN {
        return invalid("must be at most 48 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return invalid("may only contain letters, digits, '_' and '-'");
    }
    Ok(())
}

//! Service Adapter Traits
//!
//! Defines the interfaces the deployer consumes from the managed runtime
//! service: identity management, workload launch/status/teardown, and agent
//! invocation. Concrete backends live in sibling modules.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ServiceError;

/// Result type for service calls
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Handle to an execution identity returned by the identity service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityHandle {
    pub name: String,
    pub arn: String,
}

/// Permission document attached to an identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

/// Single statement inside a [`PolicyDocument`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<serde_json::Value>,
    pub action: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl PolicyDocument {
    pub const VERSION: &'static str = "2012-10-17";

    /// Permission document allowing `actions` on every resource
    pub fn allow(actions: &[&str]) -> Self {
        Self {
            version: Self::VERSION.to_string(),
            statement: vec![PolicyStatement {
                effect: "Allow".to_string(),
                principal: None,
                action: actions.iter().map(|a| a.to_string()).collect(),
                resource: Some("*".to_string()),
            }],
        }
    }

    /// Trust statement letting `service` assume the identity
    pub fn trust(service: &str) -> Self {
        Self {
            version: Self::VERSION.to_string(),
            statement: vec![PolicyStatement {
                effect: "Allow".to_string(),
                principal: Some(serde_json::json!({ "Service": service })),
                action: vec!["sts:AssumeRole".to_string()],
                resource: None,
            }],
        }
    }

    /// Serialize to the JSON text the identity service expects
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Runtime instance status as reported by the workload service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuntimeStatus {
    Creating,
    Updating,
    Deleting,
    Ready,
    CreateFailed,
    DeleteFailed,
    UpdateFailed,
    Unknown(String),
}

impl RuntimeStatus {
    /// Whether the service will not transition further without operator action
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RuntimeStatus::Ready
                | RuntimeStatus::CreateFailed
                | RuntimeStatus::DeleteFailed
                | RuntimeStatus::UpdateFailed
        )
    }

    /// Terminal failure states
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && *self != RuntimeStatus::Ready
    }

    pub fn as_str(&self) -> &str {
        match self {
            RuntimeStatus::Creating => "CREATING",
            RuntimeStatus::Updating => "UPDATING",
            RuntimeStatus::Deleting => "DELETING",
            RuntimeStatus::Ready => "READY",
            RuntimeStatus::CreateFailed => "CREATE_FAILED",
            RuntimeStatus::DeleteFailed => "DELETE_FAILED",
            RuntimeStatus::UpdateFailed => "UPDATE_FAILED",
            RuntimeStatus::Unknown(raw) => raw,
        }
    }
}

impl From<String> for RuntimeStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "CREATING" => RuntimeStatus::Creating,
            "UPDATING" => RuntimeStatus::Updating,
            "DELETING" => RuntimeStatus::Deleting,
            "READY" => RuntimeStatus::Ready,
            "CREATE_FAILED" => RuntimeStatus::CreateFailed,
            "DELETE_FAILED" => RuntimeStatus::DeleteFailed,
            "UPDATE_FAILED" => RuntimeStatus::UpdateFailed,
            _ => RuntimeStatus::Unknown(raw),
        }
    }
}

impl From<RuntimeStatus> for String {
    fn from(status: RuntimeStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to register a workload and start a runtime instance
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub agent_name: String,
    pub region: String,
    pub execution_role_arn: String,
    /// Entrypoint file name inside the package
    pub entrypoint: String,
    /// Base64 of the zstd-compressed package
    pub package: String,
    pub package_digest: String,
    pub image_tag: String,
    pub auto_create_repository: bool,
}

/// Identifiers assigned by the workload service at launch time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchResult {
    pub runtime_id: String,
    pub runtime_ref: String,
    pub registry_ref: String,
}

/// Undecoded response from an agent invocation
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub content_type: Option<String>,
    /// Body chunks (streaming) or events (batch), in arrival order
    pub events: Vec<Vec<u8>>,
}

/// Identity and permissions service
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Create an identity with the given trust statement
    async fn create_identity(
        &self,
        name: &str,
        description: &str,
        trust_policy: &PolicyDocument,
    ) -> ServiceResult<IdentityHandle>;

    /// Attach (or replace) an inline permission document
    async fn put_policy(
        &self,
        identity: &str,
        policy_name: &str,
        document: &PolicyDocument,
    ) -> ServiceResult<()>;

    /// List names of the inline permission documents on an identity
    async fn list_policies(&self, identity: &str) -> ServiceResult<Vec<String>>;

    /// Remove an inline permission document
    async fn delete_policy(&self, identity: &str, policy_name: &str) -> ServiceResult<()>;

    /// Delete an identity; its permission documents must already be gone
    async fn delete_identity(&self, name: &str) -> ServiceResult<()>;
}

/// Workload registry and runtime service
#[async_trait]
pub trait WorkloadService: Send + Sync {
    /// Build/register the image and start an instance
    async fn launch(&self, request: LaunchRequest) -> ServiceResult<LaunchResult>;

    /// Current status of a runtime instance
    async fn get_status(&self, runtime_id: &str) -> ServiceResult<RuntimeStatus>;

    /// Delete a runtime instance
    async fn delete_runtime(&self, runtime_id: &str) -> ServiceResult<()>;

    /// Delete an image repository, including its images when `force` is set
    async fn delete_repository(&self, name: &str, force: bool) -> ServiceResult<()>;
}

/// Data-plane access to a running agent
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Send a payload to the instance behind `runtime_ref`
    async fn invoke(
        &self,
        runtime_ref: &str,
        qualifier: &str,
        payload: &serde_json::Value,
    ) -> ServiceResult<RawResponse>;
}

/// Explicit client handles shared by every stage of one orchestration run
#[derive(Clone)]
pub struct ServiceClients {
    pub identity: Arc<dyn IdentityService>,
    pub workloads: Arc<dyn WorkloadService>,
    pub agents: Arc<dyn AgentRuntime>,
}

impl ServiceClients {
    /// Use one backend for every service
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: IdentityService + WorkloadService + AgentRuntime + 'static,
    {
        Self {
            identity: backend.clone(),
            workloads: backend.clone(),
            agents: backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!(RuntimeStatus::from("READY".to_string()), RuntimeStatus::Ready);
        assert_eq!(
            RuntimeStatus::from("CREATE_FAILED".to_string()),
            RuntimeStatus::CreateFailed
        );
        assert_eq!(
            RuntimeStatus::from("PENDING_MAGIC".to_string()),
            RuntimeStatus::Unknown("PENDING_MAGIC".to_string())
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(RuntimeStatus::Ready.is_terminal());
        assert!(!RuntimeStatus::Ready.is_failure());
        assert!(RuntimeStatus::UpdateFailed.is_failure());
        assert!(!RuntimeStatus::Creating.is_terminal());
        assert!(!RuntimeStatus::Deleting.is_terminal());
        assert!(!RuntimeStatus::Unknown("X".into()).is_terminal());
    }

    #[test]
    fn test_status_serde_uses_wire_names() {
        let json = serde_json::to_string(&RuntimeStatus::DeleteFailed).unwrap();
        assert_eq!(json, "\"DELETE_FAILED\"");
        let back: RuntimeStatus = serde_json::from_str("\"UPDATING\"").unwrap();
        assert_eq!(back, RuntimeStatus::Updating);
    }

    #[test]
    fn test_trust_policy_shape() {
        let json = PolicyDocument::trust("runtime.example.com").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["Version"], "2012-10-17");
        assert_eq!(value["Statement"][0]["Principal"]["Service"], "runtime.example.com");
        assert_eq!(value["Statement"][0]["Action"][0], "sts:AssumeRole");
        assert!(value["Statement"][0].get("Resource").is_none());
    }
}

//! Identity Provisioner
//!
//! Creates the execution identity a runtime instance assumes, attaches the
//! model-invocation and registry-read permission documents, and tears the
//! identity down again.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::deploy::events::{DeployEvent, EventSink};
use crate::deploy::record::IdentityRef;
use crate::error::{ProvisioningError, ServiceError};
use crate::runtime::adapter::{IdentityService, PolicyDocument};

/// Actions granted by the model-invocation permission document
pub const MODEL_ACTIONS: &[&str] = &[
    "bedrock:InvokeModel",
    "bedrock:InvokeModelWithResponseStream",
];

/// Actions granted by the registry-read permission document
pub const REGISTRY_ACTIONS: &[&str] = &[
    "ecr:GetAuthorizationToken",
    "ecr:BatchGetImage",
    "ecr:GetDownloadUrlForLayer",
];

/// Result of tearing an identity down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRemoval {
    Deleted,
    AlreadyAbsent,
}

/// Provisions and destroys execution identities
pub struct IdentityProvisioner {
    service: Arc<dyn IdentityService>,
    trust_principal: String,
    propagation_delay: Duration,
    events: EventSink,
}

impl IdentityProvisioner {
    pub fn new(
        service: Arc<dyn IdentityService>,
        trust_principal: &str,
        propagation_delay: Duration,
    ) -> Self {
        Self {
            service,
            trust_principal: trust_principal.to_string(),
            propagation_delay,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Unique identity name derived from the agent name
    pub fn identity_name(agent_name: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}_role_{}", agent_name, &suffix[..8])
    }

    /// Create the identity, attach both permission documents, then wait for
    /// the identity to propagate.
    pub async fn provision_identity(&self, agent_name: &str) -> Result<IdentityRef, ProvisioningError> {
        let mut identity = self.create_identity(agent_name).await?;
        self.attach_policies(&mut identity).await?;
        self.await_propagation(&identity).await;
        Ok(identity)
    }

    /// Create a bare identity trusted by the configured principal
    pub async fn create_identity(&self, agent_name: &str) -> Result<IdentityRef, ProvisioningError> {
        let name = Self::identity_name(agent_name);
        let trust = PolicyDocument::trust(&self.trust_principal);
        let description = format!("Execution identity for hosted agent {}", agent_name);

        info!(agent = %agent_name, identity = %name, "Creating execution identity");
        let handle = self
            .service
            .create_identity(&name, &description, &trust)
            .await
            .map_err(|source| ProvisioningError::CreateIdentity {
                name: name.clone(),
                source,
            })?;

        let identity = IdentityRef::new(handle.name, handle.arn);
        self.events
            .emit(DeployEvent::IdentityCreated {
                name: identity.name.clone(),
                arn: identity.arn.clone(),
            })
            .await;
        Ok(identity)
    }

    /// Attach both permission documents, recording each on `identity` as it
    /// lands.
    pub async fn attach_policies(&self, identity: &mut IdentityRef) -> Result<(), ProvisioningError> {
        let documents = [
            (format!("{}_bedrock_policy", identity.name), PolicyDocument::allow(MODEL_ACTIONS)),
            (format!("{}_ecr_policy", identity.name), PolicyDocument::allow(REGISTRY_ACTIONS)),
        ];

        for (policy, document) in documents {
            if let Err(source) = self.service.put_policy(&identity.name, &policy, &document).await {
                warn!(identity = %identity.name, policy = %policy, error = %source, "Failed to attach policy");
                return Err(ProvisioningError::AttachPolicy {
                    policy,
                    identity: identity.clone(),
                    source,
                });
            }
            debug!(identity = %identity.name, policy = %policy, "Policy attached");
            self.events
                .emit(DeployEvent::PolicyAttached {
                    identity: identity.name.clone(),
                    policy: policy.clone(),
                })
                .await;
            identity.policies.push(policy);
        }
        Ok(())
    }

    /// Sleep for the propagation delay; the service offers no readiness
    /// query for identities.
    pub async fn await_propagation(&self, identity: &IdentityRef) {
        if !self.propagation_delay.is_zero() {
            info!(
                identity = %identity.name,
                delay_secs = self.propagation_delay.as_secs(),
                "Waiting for identity to propagate"
            );
            self.events
                .emit(DeployEvent::PropagationWait {
                    delay: self.propagation_delay,
                })
                .await;
            tokio::time::sleep(self.propagation_delay).await;
        }
        info!(identity = %identity.name, arn = %identity.arn, "Execution identity ready");
    }

    /// Delete every permission document on the identity, then the identity.
    pub async fn destroy_identity(&self, name: &str) -> Result<IdentityRemoval, ServiceError> {
        let policies = match self.service.list_policies(name).await {
            Ok(policies) => policies,
            Err(e) if e.is_not_found() => {
                warn!(identity = %name, "Identity already absent");
                return Ok(IdentityRemoval::AlreadyAbsent);
            }
            Err(e) => return Err(e),
        };

        for policy in policies {
            match self.service.delete_policy(name, &policy).await {
                Ok(()) => debug!(identity = %name, policy = %policy, "Policy deleted"),
                Err(e) if e.is_not_found() => {
                    warn!(identity = %name, policy = %policy, "Policy already absent")
                }
                Err(e) => return Err(e),
            }
        }

        match self.service.delete_identity(name).await {
            Ok(()) => {
                info!(identity = %name, "Identity deleted");
                Ok(IdentityRemoval::Deleted)
            }
            Err(e) if e.is_not_found() => {
                warn!(identity = %name, "Identity already absent");
                Ok(IdentityRemoval::AlreadyAbsent)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::memory::{FailPoint, InMemoryControlPlane};

    fn provisioner(plane: &Arc<InMemoryControlPlane>) -> IdentityProvisioner {
        IdentityProvisioner::new(plane.clone(), "runtime.example.com", Duration::ZERO)
    }

    #[test]
    fn test_identity_name_has_random_suffix() {
        let a = IdentityProvisioner::identity_name("demo");
        let b = IdentityProvisioner::identity_name("demo");
        assert!(a.starts_with("demo_role_"));
        assert_eq!(a.len(), "demo_role_".len() + 8);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_provision_attaches_both_documents() {
        let plane = Arc::new(InMemoryControlPlane::new("us-east-1"));
        let identity = provisioner(&plane).provision_identity("demo").await.unwrap();

        assert!(plane.identity_exists(&identity.name));
        assert_eq!(identity.policies.len(), 2);
        assert_eq!(plane.policy_names(&identity.name).len(), 2);
        assert!(identity.policies[0].ends_with("_bedrock_policy"));
        assert!(identity.policies[1].ends_with("_ecr_policy"));

        let trust = plane.trust_policy(&identity.name).unwrap();
        assert_eq!(
            trust.statement[0].principal,
            Some(serde_json::json!({ "Service": "runtime.example.com" }))
        );
    }

    #[tokio::test]
    async fn test_attach_failure_reports_partial_identity() {
        let plane = Arc::new(InMemoryControlPlane::new("us-east-1"));
        plane.fail(FailPoint::PutPolicy, ServiceError::rejected("LimitExceeded", "too many"));

        let err = provisioner(&plane).provision_identity("demo").await.unwrap_err();
        let partial = err.partial_identity().expect("identity was created").clone();
        assert!(plane.identity_exists(&partial.name));
        assert!(partial.policies.is_empty());
    }

    #[tokio::test]
    async fn test_create_then_attach_in_separate_steps() {
        let plane = Arc::new(InMemoryControlPlane::new("us-east-1"));
        let provisioner = provisioner(&plane);

        let mut identity = provisioner.create_identity("demo").await.unwrap();
        assert!(plane.identity_exists(&identity.name));
        assert!(identity.policies.is_empty());
        assert!(plane.policy_names(&identity.name).is_empty());

        provisioner.attach_policies(&mut identity).await.unwrap();
        assert_eq!(identity.policies.len(), 2);
        assert_eq!(plane.policy_names(&identity.name).len(), 2);
    }

    #[tokio::test]
    async fn test_create_failure_leaves_nothing() {
        let plane = Arc::new(InMemoryControlPlane::new("us-east-1"));
        plane.fail(FailPoint::CreateIdentity, ServiceError::Transport("timeout".into()));

        let err = provisioner(&plane).provision_identity("demo").await.unwrap_err();
        assert!(matches!(err, ProvisioningError::CreateIdentity { .. }));
        assert!(plane.identity_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_propagation() {
        let plane = Arc::new(InMemoryControlPlane::new("us-east-1"));
        let provisioner =
            IdentityProvisioner::new(plane.clone(), "svc", Duration::from_secs(10));

        let started = tokio::time::Instant::now();
        provisioner.provision_identity("demo").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_destroy_twice_is_idempotent() {
        let plane = Arc::new(InMemoryControlPlane::new("us-east-1"));
        let provisioner = provisioner(&plane);
        let identity = provisioner.provision_identity("demo").await.unwrap();

        assert_eq!(
            provisioner.destroy_identity(&identity.name).await.unwrap(),
            IdentityRemoval::Deleted
        );
        assert_eq!(
            provisioner.destroy_identity(&identity.name).await.unwrap(),
            IdentityRemoval::AlreadyAbsent
        );
        assert!(!plane.identity_exists(&identity.name));
    }
}

//! Deploy Orchestrator
//!
//! Drives one deployment through provisioning, launch, polling, smoke test
//! and optional cleanup, journaling the record after every stage.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::DeployConfig;
use crate::deploy::cleanup::{CleanupCoordinator, CleanupReport};
use crate::deploy::events::{DeployEvent, EventSink};
use crate::deploy::invoke::SmokeTestInvoker;
use crate::deploy::launch::RuntimeLauncher;
use crate::deploy::poll::{PollPolicy, StatusPoller};
use crate::deploy::provision::IdentityProvisioner;
use crate::deploy::record::{validate_agent_name, DeploymentRecord};
use crate::deploy::store::{RecordState, RecordStore};
use crate::error::{DeployError, InvocationError, PollError, ServiceError, StoreError};
use crate::runtime::adapter::{RuntimeStatus, ServiceClients};

/// Tunables shared by every deployment in a run
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub trust_principal: String,
    pub propagation_delay: Duration,
    pub poll_policy: PollPolicy,
    pub qualifier: String,
}

impl DeploySettings {
    pub fn from_config(config: &DeployConfig) -> Self {
        Self {
            trust_principal: config.trust_principal.clone(),
            propagation_delay: config.propagation_delay(),
            poll_policy: config.poll_policy(),
            qualifier: config.invoke_qualifier.clone(),
        }
    }
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self::from_config(&DeployConfig::default())
    }
}

/// One deployment to carry out
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub agent_name: String,
    pub region: String,
    pub entrypoint: PathBuf,
    pub requirements: PathBuf,
    pub test_prompt: Option<String>,
    /// Tear everything down after the smoke test
    pub cleanup_after_test: bool,
    /// Tear partial resources down when a stage fails
    pub rollback_on_failure: bool,
}

/// A deployment that reached READY
#[derive(Debug)]
pub struct DeployOutcome {
    pub record: DeploymentRecord,
    pub record_path: PathBuf,
    /// Smoke test result; failures here do not fail the deploy
    pub smoke_test: Option<Result<String, InvocationError>>,
    pub cleanup: Option<CleanupReport>,
}

/// A deployment that stopped at some stage
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct DeployFailure {
    #[source]
    pub error: DeployError,
    /// Record of whatever was created before the failure
    pub record: Option<DeploymentRecord>,
    /// Present when rollback ran
    pub rollback: Option<CleanupReport>,
}

impl DeployFailure {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

/// Runs deployments against a fixed set of service clients
pub struct Deployer {
    clients: ServiceClients,
    store: RecordStore,
    settings: DeploySettings,
    events: EventSink,
}

impl Deployer {
    pub fn new(clients: ServiceClients, store: RecordStore, settings: DeploySettings) -> Self {
        Self {
            clients,
            store,
            settings,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    fn provisioner(&self) -> IdentityProvisioner {
        IdentityProvisioner::new(
            self.clients.identity.clone(),
            &self.settings.trust_principal,
            self.settings.propagation_delay,
        )
        .with_events(self.events.clone())
    }

    fn coordinator(&self) -> CleanupCoordinator {
        CleanupCoordinator::new(self.clients.workloads.clone(), self.provisioner(), self.store.clone())
            .with_events(self.events.clone())
    }

    /// Deploy a workload end to end
    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployOutcome, DeployFailure> {
        info!(
            agent = %request.agent_name,
            region = %request.region,
            rollback = request.rollback_on_failure,
            "Starting deployment"
        );

        let mut slot = None;
        let error = match self.run_stages(&request, &mut slot).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) => e,
        };
        error!(agent = %request.agent_name, error = %error, "Deployment failed");

        let mut rollback = None;
        if request.rollback_on_failure {
            if let Some(record) = slot.as_mut() {
                warn!(agent = %request.agent_name, "Rolling back partial deployment");
                match self.coordinator().cleanup(record).await {
                    Ok(report) => rollback = Some(report),
                    Err(e) => error!(agent = %request.agent_name, error = %e, "Rollback could not update the record"),
                }
            }
        }

        Err(DeployFailure {
            error,
            record: slot,
            rollback,
        })
    }

    async fn run_stages(
        &self,
        request: &DeployRequest,
        slot: &mut Option<DeploymentRecord>,
    ) -> Result<DeployOutcome, DeployError> {
        let agent = request.agent_name.as_str();
        validate_agent_name(agent)?;

        if let Some((_, state)) = self.store.load(agent)? {
            let path = match state {
                RecordState::Committed => self.store.record_path(agent),
                RecordState::Pending => self.store.pending_path(agent),
            };
            return Err(DeployError::RecordExists {
                agent_name: agent.to_string(),
                path,
            });
        }

        // Stage 1: execution identity, journaled from the moment it exists
        let provisioner = self.provisioner();
        let mut identity = provisioner.create_identity(agent).await?;
        let record = slot.insert(DeploymentRecord::new(agent, &request.region, identity.clone()));
        self.journal(record).await?;

        let attached = provisioner.attach_policies(&mut identity).await;
        record.identity_ref = Some(identity.clone());
        if let Err(e) = attached {
            if let Err(store_err) = self.journal(record).await {
                error!(agent = %agent, error = %store_err, "Failed to journal partial identity");
            }
            return Err(e.into());
        }
        self.journal(record).await?;
        provisioner.await_propagation(&identity).await;

        // Stage 2: configure and launch
        let launcher = RuntimeLauncher::new(self.clients.workloads.clone());
        let config = launcher.configure(
            &request.entrypoint,
            &identity,
            &request.requirements,
            &request.region,
            agent,
        )?;
        self.events
            .emit(DeployEvent::Configured {
                entrypoint: config.entrypoint.display().to_string(),
                region: config.region.clone(),
            })
            .await;

        let launched = launcher.launch(config).await?;
        record.record_launch(&launched.result, &launched.package_digest);
        self.events
            .emit(DeployEvent::Launched {
                runtime_id: launched.result.runtime_id.clone(),
                runtime_ref: launched.result.runtime_ref.clone(),
                registry_ref: launched.result.registry_ref.clone(),
            })
            .await;
        self.journal(record).await?;

        // Stage 3: wait for a terminal status
        let runtime_id = launched.result.runtime_id.clone();
        let poller = StatusPoller::new(self.clients.workloads.clone()).with_events(self.events.clone());
        let status = match poller.await_terminal(&runtime_id, self.settings.poll_policy).await {
            Ok(status) => status,
            Err(e) => {
                if let PollError::Timeout {
                    last_status: Some(last),
                    ..
                } = &e
                {
                    record.record_status(last.clone());
                    if let Err(store_err) = self.journal(record).await {
                        error!(agent = %agent, error = %store_err, "Failed to journal last status");
                    }
                }
                return Err(e.into());
            }
        };

        record.record_status(status.clone());
        let record_path = self.commit(record).await?;

        if status.is_failure() {
            return Err(DeployError::TerminalFailure { runtime_id, status });
        }
        info!(agent = %agent, runtime_id = %runtime_id, "Runtime is ready");

        // Stage 4: smoke test
        let smoke_test = match &request.test_prompt {
            Some(prompt) => Some(self.smoke_test(&launched.result.runtime_ref, prompt).await),
            None => None,
        };

        // Stage 5: optional teardown
        let cleanup = if request.cleanup_after_test {
            Some(self.coordinator().cleanup(record).await?)
        } else {
            None
        };

        Ok(DeployOutcome {
            record: record.clone(),
            record_path,
            smoke_test,
            cleanup,
        })
    }

    async fn smoke_test(&self, runtime_ref: &str, prompt: &str) -> Result<String, InvocationError> {
        self.events
            .emit(DeployEvent::SmokeTestStarted {
                prompt: prompt.to_string(),
            })
            .await;

        let result = self.invoke_agent(runtime_ref, prompt).await;
        match &result {
            Ok(response) => {
                info!(runtime_ref = %runtime_ref, "Smoke test succeeded");
                self.events
                    .emit(DeployEvent::SmokeTestSucceeded {
                        response: response.clone(),
                    })
                    .await;
            }
            Err(e) => {
                warn!(runtime_ref = %runtime_ref, error = %e, "Smoke test failed");
                self.events
                    .emit(DeployEvent::SmokeTestFailed {
                        error: e.to_string(),
                    })
                    .await;
            }
        }
        result
    }

    async fn journal(&self, record: &mut DeploymentRecord) -> Result<PathBuf, StoreError> {
        record.touch();
        let path = self.store.save_pending(record)?;
        debug!(agent = %record.agent_name, path = %path.display(), "Deployment journal written");
        self.events
            .emit(DeployEvent::RecordSaved {
                path: path.clone(),
                committed: false,
            })
            .await;
        Ok(path)
    }

    async fn commit(&self, record: &mut DeploymentRecord) -> Result<PathBuf, StoreError> {
        record.touch();
        let path = self.store.commit(record)?;
        info!(agent = %record.agent_name, path = %path.display(), "Deployment record saved");
        self.events
            .emit(DeployEvent::RecordSaved {
                path: path.clone(),
                committed: true,
            })
            .await;
        Ok(path)
    }

    /// Tear down everything recorded for `agent_name`
    pub async fn cleanup_agent(&self, agent_name: &str) -> Result<CleanupReport, StoreError> {
        let (mut record, state) = self
            .store
            .load(agent_name)?
            .ok_or_else(|| StoreError::NotFound(agent_name.to_string()))?;
        debug!(agent = %agent_name, state = ?state, "Loaded record for cleanup");
        self.coordinator().cleanup(&mut record).await
    }

    /// Send one prompt to a running agent
    pub async fn invoke_agent(&self, runtime_ref: &str, prompt: &str) -> Result<String, InvocationError> {
        SmokeTestInvoker::new(self.clients.agents.clone(), &self.settings.qualifier)
            .invoke(runtime_ref, prompt)
            .await
    }

    /// Current status of a runtime instance
    pub async fn runtime_status(&self, runtime_id: &str) -> Result<RuntimeStatus, ServiceError> {
        self.clients.workloads.get_status(runtime_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::cleanup::{CleanupOutcome, ResourceClass};
    use crate::runtime::memory::{FailPoint, InMemoryControlPlane};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Harness {
        plane: Arc<InMemoryControlPlane>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn new(plane: InMemoryControlPlane) -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("agent.py"), "app.run()\n").unwrap();
            std::fs::write(dir.path().join("requirements.txt"), "strands-agents\n").unwrap();
            Self {
                plane: Arc::new(plane),
                dir,
            }
        }

        fn deployer(&self) -> Deployer {
            let settings = DeploySettings {
                propagation_delay: Duration::ZERO,
                poll_policy: PollPolicy::new(Duration::ZERO).with_max_attempts(5),
                ..DeploySettings::default()
            };
            Deployer::new(
                ServiceClients::from_backend(self.plane.clone()),
                RecordStore::new(self.dir.path()),
                settings,
            )
        }

        fn request(&self) -> DeployRequest {
            DeployRequest {
                agent_name: "demo".into(),
                region: "us-east-1".into(),
                entrypoint: self.dir.path().join("agent.py"),
                requirements: self.dir.path().join("requirements.txt"),
                test_prompt: Some("2+2".into()),
                cleanup_after_test: false,
                rollback_on_failure: false,
            }
        }
    }

    #[tokio::test]
    async fn test_successful_deploy_commits_ready_record() {
        let h = Harness::new(
            InMemoryControlPlane::new("us-east-1")
                .with_status_script(vec![RuntimeStatus::Creating, RuntimeStatus::Ready]),
        );
        let outcome = h.deployer().deploy(h.request()).await.unwrap();

        assert!(outcome.record.is_ready());
        assert!(outcome.record.runtime_id.is_some());
        assert_eq!(outcome.record_path, h.dir.path().join("demo_deployment.json"));
        assert_eq!(outcome.smoke_test.unwrap().unwrap(), "echo: 2+2");
        assert!(outcome.cleanup.is_none());
        assert!(!h.dir.path().join("demo_deployment.pending.json").exists());
    }

    #[tokio::test]
    async fn test_invalid_name_creates_nothing() {
        let h = Harness::new(InMemoryControlPlane::new("us-east-1"));
        let mut request = h.request();
        request.agent_name = "9lives".into();

        let failure = h.deployer().deploy(request).await.unwrap_err();
        assert!(matches!(failure.error, DeployError::InvalidAgentName { .. }));
        assert!(failure.record.is_none());
        assert!(h.plane.identity_names().is_empty());
    }

    #[tokio::test]
    async fn test_attach_failure_journals_partial_identity() {
        let h = Harness::new(InMemoryControlPlane::new("us-east-1"));
        h.plane
            .fail(FailPoint::PutPolicy, ServiceError::rejected("LimitExceeded", "quota"));

        let failure = h.deployer().deploy(h.request()).await.unwrap_err();
        assert_eq!(failure.exit_code(), 2);
        let record = failure.record.unwrap();
        assert!(record.identity_ref.is_some());
        assert!(h.dir.path().join("demo_deployment.pending.json").exists());
        assert!(!h.dir.path().join("demo_deployment.json").exists());
    }

    #[tokio::test]
    async fn test_poll_timeout_keeps_journal_with_last_status() {
        let h = Harness::new(
            InMemoryControlPlane::new("us-east-1").with_status_script(vec![RuntimeStatus::Creating]),
        );
        let failure = h.deployer().deploy(h.request()).await.unwrap_err();

        assert_eq!(failure.exit_code(), 5);
        let (record, state) = RecordStore::new(h.dir.path()).load("demo").unwrap().unwrap();
        assert_eq!(state, crate::deploy::store::RecordState::Pending);
        assert_eq!(record.status, Some(RuntimeStatus::Creating));
        assert_eq!(h.plane.status_calls(), 5);
    }

    #[tokio::test]
    async fn test_smoke_test_failure_is_not_fatal() {
        let h = Harness::new(InMemoryControlPlane::new("us-east-1"));
        h.plane
            .fail(FailPoint::Invoke, ServiceError::Transport("reset".into()));

        let outcome = h.deployer().deploy(h.request()).await.unwrap();
        assert!(outcome.record.is_ready());
        assert!(matches!(outcome.smoke_test, Some(Err(InvocationError::Service(_)))));
    }

    #[tokio::test]
    async fn test_cleanup_after_test_removes_record() {
        let h = Harness::new(InMemoryControlPlane::new("us-east-1"));
        let mut request = h.request();
        request.cleanup_after_test = true;

        let outcome = h.deployer().deploy(request).await.unwrap();
        let report = outcome.cleanup.unwrap();
        assert!(report.is_complete());
        assert!(report.record_removed);
        assert!(!outcome.record_path.exists());
        assert_eq!(h.plane.runtime_count(), 0);
        assert!(h.plane.identity_names().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_after_terminal_failure() {
        let h = Harness::new(
            InMemoryControlPlane::new("us-east-1").with_status_script(vec![RuntimeStatus::CreateFailed]),
        );
        let mut request = h.request();
        request.rollback_on_failure = true;

        let failure = h.deployer().deploy(request).await.unwrap_err();
        assert_eq!(failure.exit_code(), 4);
        let report = failure.rollback.unwrap();
        assert_eq!(report.outcome(ResourceClass::Runtime), Some(&CleanupOutcome::Deleted));
        assert!(report.record_removed);
        assert!(!h.dir.path().join("demo_deployment.json").exists());
    }

    #[tokio::test]
    async fn test_redeploy_over_existing_record_is_refused() {
        let h = Harness::new(InMemoryControlPlane::new("us-east-1"));
        let deployer = h.deployer();
        let first = deployer.deploy(h.request()).await.unwrap();
        let identities = h.plane.identity_names();

        h.plane
            .fail(FailPoint::Launch, ServiceError::rejected("AccessDenied", "no"));
        let failure = deployer.deploy(h.request()).await.unwrap_err();
        assert!(matches!(failure.error, DeployError::RecordExists { .. }));
        assert_eq!(failure.exit_code(), 1);
        assert!(failure.record.is_none());
        assert_eq!(h.plane.identity_names(), identities);
        assert_eq!(RecordStore::new(h.dir.path()).require("demo").unwrap(), first.record);

        let report = deployer.cleanup_agent("demo").await.unwrap();
        assert!(report.record_removed);
        assert!(h.plane.identity_names().is_empty());
    }

    #[tokio::test]
    async fn test_journal_exists_before_propagation_wait() {
        let h = Harness::new(InMemoryControlPlane::new("us-east-1"));
        let settings = DeploySettings {
            propagation_delay: Duration::from_millis(50),
            poll_policy: PollPolicy::new(Duration::ZERO).with_max_attempts(5),
            ..DeploySettings::default()
        };
        let (tx, mut rx) = mpsc::channel(64);
        let deployer = Deployer::new(
            ServiceClients::from_backend(h.plane.clone()),
            RecordStore::new(h.dir.path()),
            settings,
        )
        .with_events(EventSink::new(tx));
        let store = RecordStore::new(h.dir.path());

        let watching = async {
            while let Some(event) = rx.recv().await {
                if let DeployEvent::PropagationWait { .. } = event {
                    return store.load("demo").unwrap();
                }
            }
            None
        };
        let (outcome, journaled) = tokio::join!(deployer.deploy(h.request()), watching);

        let (record, state) = journaled.expect("journal written before the wait");
        assert_eq!(state, crate::deploy::store::RecordState::Pending);
        assert_eq!(record.identity_ref.unwrap().policies.len(), 2);
        assert!(outcome.unwrap().record.is_ready());
    }

    #[tokio::test]
    async fn test_cleanup_agent_without_record() {
        let h = Harness::new(InMemoryControlPlane::new("us-east-1"));
        let err = h.deployer().cleanup_agent("ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_events_follow_stage_order() {
        let h = Harness::new(InMemoryControlPlane::new("us-east-1"));
        let (tx, mut rx) = mpsc::channel(64);
        let deployer = h.deployer().with_events(EventSink::new(tx));

        deployer.deploy(h.request()).await.unwrap();
        drop(deployer);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(match event {
                DeployEvent::IdentityCreated { .. } => "identity",
                DeployEvent::Launched { .. } => "launched",
                DeployEvent::TerminalStatus { .. } => "terminal",
                DeployEvent::SmokeTestSucceeded { .. } => "smoke",
                _ => continue,
            });
        }
        assert_eq!(kinds, vec!["identity", "launched", "terminal", "smoke"]);
    }
}

//! Cleanup Coordinator
//!
//! Best-effort teardown of every remote resource a [`DeploymentRecord`]
//! references. Each resource class is attempted independently and every
//! failure is collected into the report rather than raised.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::deploy::events::{DeployEvent, EventSink};
use crate::deploy::provision::{IdentityProvisioner, IdentityRemoval};
use crate::deploy::record::DeploymentRecord;
use crate::deploy::store::RecordStore;
use crate::error::{CleanupError, ServiceError, StoreError};
use crate::runtime::adapter::WorkloadService;

/// Kind of remote resource tracked by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    Runtime,
    Repository,
    Identity,
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceClass::Runtime => write!(f, "runtime"),
            ResourceClass::Repository => write!(f, "repository"),
            ResourceClass::Identity => write!(f, "identity"),
        }
    }
}

/// Result of deleting one resource class
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Deleted,
    /// The service reported the resource as already gone
    AlreadyAbsent,
    /// The record held no reference for this class
    Skipped,
    Failed(String),
}

impl CleanupOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CleanupOutcome::Failed(_))
    }

    /// Whether the resource is confirmed gone
    pub fn is_cleared(&self) -> bool {
        matches!(self, CleanupOutcome::Deleted | CleanupOutcome::AlreadyAbsent)
    }

    fn from_delete(result: Result<(), ServiceError>) -> Self {
        match result {
            Ok(()) => CleanupOutcome::Deleted,
            Err(e) if e.is_not_found() => CleanupOutcome::AlreadyAbsent,
            Err(e) => CleanupOutcome::Failed(e.to_string()),
        }
    }
}

impl std::fmt::Display for CleanupOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CleanupOutcome::Deleted => write!(f, "deleted"),
            CleanupOutcome::AlreadyAbsent => write!(f, "already absent"),
            CleanupOutcome::Skipped => write!(f, "skipped"),
            CleanupOutcome::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

/// Per-class outcome of one cleanup pass
#[derive(Debug, Clone)]
pub struct CleanupReport {
    pub agent_name: String,
    pub entries: Vec<(ResourceClass, CleanupOutcome)>,
    /// Whether the record was removed from storage
    pub record_removed: bool,
}

impl CleanupReport {
    pub fn outcome(&self, class: ResourceClass) -> Option<&CleanupOutcome> {
        self.entries
            .iter()
            .find(|(c, _)| *c == class)
            .map(|(_, outcome)| outcome)
    }

    pub fn failed_classes(&self) -> Vec<ResourceClass> {
        self.entries
            .iter()
            .filter(|(_, outcome)| outcome.is_failure())
            .map(|(class, _)| *class)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|(_, outcome)| !outcome.is_failure())
    }

    /// Turn a report with failures into an error
    pub fn ensure_complete(&self) -> Result<(), CleanupError> {
        if self.is_complete() {
            return Ok(());
        }
        Err(CleanupError {
            agent_name: self.agent_name.clone(),
            failed: self
                .entries
                .iter()
                .filter_map(|(class, outcome)| match outcome {
                    CleanupOutcome::Failed(msg) => Some(format!("{}: {}", class, msg)),
                    _ => None,
                })
                .collect(),
        })
    }
}

/// Repository name inside a registry reference: the path after the first
/// `/`, without any tag.
pub fn repository_name(registry_ref: &str) -> &str {
    let path = registry_ref
        .split_once('/')
        .map(|(_, path)| path)
        .unwrap_or(registry_ref);
    path.split_once(':').map(|(name, _)| name).unwrap_or(path)
}

/// Tears down everything a record references
pub struct CleanupCoordinator {
    workloads: Arc<dyn WorkloadService>,
    identities: IdentityProvisioner,
    store: RecordStore,
    events: EventSink,
}

impl CleanupCoordinator {
    pub fn new(workloads: Arc<dyn WorkloadService>, identities: IdentityProvisioner, store: RecordStore) -> Self {
        Self {
            workloads,
            identities,
            store,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Delete every resource class in `record`.
    ///
    /// References of classes confirmed gone are cleared on the record. When
    /// every class is cleared the stored record is removed; otherwise the
    /// narrowed record is written back for a later retry.
    pub async fn cleanup(&self, record: &mut DeploymentRecord) -> Result<CleanupReport, StoreError> {
        info!(agent = %record.agent_name, "Cleaning up deployment resources");
        self.events
            .emit(DeployEvent::CleanupStarted {
                agent_name: record.agent_name.clone(),
            })
            .await;

        let mut entries = Vec::with_capacity(3);

        let runtime = match &record.runtime_id {
            Some(id) => {
                info!(runtime_id = %id, "Deleting runtime");
                CleanupOutcome::from_delete(self.workloads.delete_runtime(id).await)
            }
            None => CleanupOutcome::Skipped,
        };
        if runtime.is_cleared() {
            record.runtime_id = None;
            record.runtime_ref = None;
        }
        self.note(&mut entries, ResourceClass::Runtime, runtime).await;

        let repository = match &record.registry_ref {
            Some(registry_ref) => {
                let name = repository_name(registry_ref);
                info!(repository = %name, "Deleting repository");
                CleanupOutcome::from_delete(self.workloads.delete_repository(name, true).await)
            }
            None => CleanupOutcome::Skipped,
        };
        if repository.is_cleared() {
            record.registry_ref = None;
        }
        self.note(&mut entries, ResourceClass::Repository, repository).await;

        let identity = match &record.identity_ref {
            Some(identity) => {
                info!(identity = %identity.name, "Deleting identity");
                match self.identities.destroy_identity(&identity.name).await {
                    Ok(IdentityRemoval::Deleted) => CleanupOutcome::Deleted,
                    Ok(IdentityRemoval::AlreadyAbsent) => CleanupOutcome::AlreadyAbsent,
                    Err(e) => CleanupOutcome::Failed(e.to_string()),
                }
            }
            None => CleanupOutcome::Skipped,
        };
        if identity.is_cleared() {
            record.identity_ref = None;
        }
        self.note(&mut entries, ResourceClass::Identity, identity).await;

        let mut report = CleanupReport {
            agent_name: record.agent_name.clone(),
            entries,
            record_removed: false,
        };

        if report.is_complete() {
            self.store.remove_record(record)?;
            report.record_removed = true;
            info!(agent = %record.agent_name, "Cleanup complete, record removed");
            self.events
                .emit(DeployEvent::RecordRemoved {
                    agent_name: record.agent_name.clone(),
                })
                .await;
        } else {
            record.touch();
            self.store.update(record)?;
            warn!(
                agent = %record.agent_name,
                failed = ?report.failed_classes(),
                "Cleanup incomplete, record retained"
            );
        }

        Ok(report)
    }

    async fn note(
        &self,
        entries: &mut Vec<(ResourceClass, CleanupOutcome)>,
        class: ResourceClass,
        outcome: CleanupOutcome,
    ) {
        match &outcome {
            CleanupOutcome::Failed(msg) => error!(class = %class, error = %msg, "Deletion failed"),
            CleanupOutcome::AlreadyAbsent => warn!(class = %class, "Resource already absent"),
            _ => {}
        }
        self.events
            .emit(DeployEvent::ResourceCleaned {
                class,
                outcome: outcome.clone(),
            })
            .await;
        entries.push((class, outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::record::IdentityRef;
    use crate::runtime::adapter::{IdentityService, LaunchRequest, PolicyDocument};
    use crate::runtime::memory::{FailPoint, InMemoryControlPlane};
    use std::time::Duration;

    struct Fixture {
        plane: Arc<InMemoryControlPlane>,
        store: RecordStore,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                plane: Arc::new(InMemoryControlPlane::new("us-east-1")),
                store: RecordStore::new(dir.path()),
                _dir: dir,
            }
        }

        fn coordinator(&self) -> CleanupCoordinator {
            let provisioner = IdentityProvisioner::new(self.plane.clone(), "svc", Duration::ZERO);
            CleanupCoordinator::new(self.plane.clone(), provisioner, self.store.clone())
        }

        async fn deployed(&self) -> DeploymentRecord {
            let provisioner = IdentityProvisioner::new(self.plane.clone(), "svc", Duration::ZERO);
            let identity = provisioner.provision_identity("demo").await.unwrap();
            let launched = self
                .plane
                .launch(LaunchRequest {
                    agent_name: "demo".into(),
                    region: "us-east-1".into(),
                    execution_role_arn: identity.arn.clone(),
                    entrypoint: "agent.py".into(),
                    package: String::new(),
                    package_digest: String::new(),
                    image_tag: String::new(),
                    auto_create_repository: true,
                })
                .await
                .unwrap();
            let mut record = DeploymentRecord::new("demo", "us-east-1", identity);
            record.record_launch(&launched, "digest");
            self.store.commit(&record).unwrap();
            record
        }
    }

    #[test]
    fn test_repository_name_from_registry_ref() {
        assert_eq!(
            repository_name("000.registry.us-east-1.corehost.dev/corehost-demo"),
            "corehost-demo"
        );
        assert_eq!(repository_name("host/repo:latest"), "repo");
        assert_eq!(repository_name("bare-repo"), "bare-repo");
    }

    #[tokio::test]
    async fn test_full_cleanup_removes_everything() {
        let fx = Fixture::new();
        let mut record = fx.deployed().await;
        let identity = record.identity_ref.clone().unwrap();
        let repository = repository_name(record.registry_ref.as_deref().unwrap()).to_string();
        assert!(fx.plane.repository_exists(&repository));

        let report = fx.coordinator().cleanup(&mut record).await.unwrap();
        assert!(report.is_complete());
        assert!(report.record_removed);
        for class in [ResourceClass::Runtime, ResourceClass::Repository, ResourceClass::Identity] {
            assert_eq!(report.outcome(class), Some(&CleanupOutcome::Deleted));
        }
        assert!(!fx.plane.identity_exists(&identity.name));
        assert_eq!(fx.plane.runtime_count(), 0);
        assert!(!fx.plane.repository_exists(&repository));
        assert!(fx.store.load("demo").unwrap().is_none());
        assert!(!record.has_resources());
    }

    #[tokio::test]
    async fn test_second_cleanup_reports_already_absent() {
        let fx = Fixture::new();
        let record = fx.deployed().await;

        let mut first = record.clone();
        fx.coordinator().cleanup(&mut first).await.unwrap();

        let mut second = record.clone();
        let report = fx.coordinator().cleanup(&mut second).await.unwrap();
        assert!(report.is_complete());
        assert!(report.ensure_complete().is_ok());
        for class in [ResourceClass::Runtime, ResourceClass::Repository, ResourceClass::Identity] {
            assert_eq!(report.outcome(class), Some(&CleanupOutcome::AlreadyAbsent));
        }
    }

    #[tokio::test]
    async fn test_identity_failure_does_not_stop_other_classes() {
        let fx = Fixture::new();
        let mut record = fx.deployed().await;
        fx.plane.fail(
            FailPoint::DeleteIdentity,
            ServiceError::rejected("AccessDenied", "not allowed"),
        );

        let report = fx.coordinator().cleanup(&mut record).await.unwrap();
        assert_eq!(report.failed_classes(), vec![ResourceClass::Identity]);
        assert_eq!(report.outcome(ResourceClass::Runtime), Some(&CleanupOutcome::Deleted));
        assert_eq!(report.outcome(ResourceClass::Repository), Some(&CleanupOutcome::Deleted));
        assert!(!report.record_removed);

        let err = report.ensure_complete().unwrap_err();
        assert_eq!(err.failed.len(), 1);
        assert!(err.failed[0].starts_with("identity:"));

        let stored = fx.store.require("demo").unwrap();
        assert!(stored.identity_ref.is_some());
        assert!(stored.runtime_id.is_none());
        assert!(stored.registry_ref.is_none());
    }

    #[tokio::test]
    async fn test_retry_after_partial_cleanup_finishes() {
        let fx = Fixture::new();
        let mut record = fx.deployed().await;
        fx.plane
            .fail(FailPoint::DeleteRuntime, ServiceError::Transport("reset".into()));

        let report = fx.coordinator().cleanup(&mut record).await.unwrap();
        assert_eq!(report.failed_classes(), vec![ResourceClass::Runtime]);

        fx.plane.clear_failure(FailPoint::DeleteRuntime);
        let mut retry = fx.store.require("demo").unwrap();
        let report = fx.coordinator().cleanup(&mut retry).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.outcome(ResourceClass::Runtime), Some(&CleanupOutcome::Deleted));
        assert_eq!(report.outcome(ResourceClass::Repository), Some(&CleanupOutcome::Skipped));
        assert_eq!(report.outcome(ResourceClass::Identity), Some(&CleanupOutcome::Skipped));
        assert!(fx.store.load("demo").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identity_only_record() {
        let fx = Fixture::new();
        let handle = fx
            .plane
            .create_identity("demo_role_x", "", &PolicyDocument::trust("svc"))
            .await
            .unwrap();
        let mut record =
            DeploymentRecord::new("demo", "us-east-1", IdentityRef::new(handle.name, handle.arn));
        fx.store.save_pending(&record).unwrap();

        let report = fx.coordinator().cleanup(&mut record).await.unwrap();
        assert_eq!(report.outcome(ResourceClass::Runtime), Some(&CleanupOutcome::Skipped));
        assert_eq!(report.outcome(ResourceClass::Identity), Some(&CleanupOutcome::Deleted));
        assert!(!fx.store.pending_path("demo").exists());
    }
}

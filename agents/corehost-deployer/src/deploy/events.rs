//! Deploy Events
//!
//! Progress notifications emitted by the orchestrator while it works through
//! the lifecycle stages.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

use crate::deploy::cleanup::{CleanupOutcome, ResourceClass};
use crate::runtime::adapter::RuntimeStatus;

/// A single progress notification
#[derive(Debug, Clone)]
pub enum DeployEvent {
    IdentityCreated { name: String, arn: String },
    PolicyAttached { identity: String, policy: String },
    PropagationWait { delay: Duration },
    Configured { entrypoint: String, region: String },
    Launched {
        runtime_id: String,
        runtime_ref: String,
        registry_ref: String,
    },
    StatusObserved { attempt: u32, status: RuntimeStatus },
    TerminalStatus { status: RuntimeStatus },
    RecordSaved { path: PathBuf, committed: bool },
    SmokeTestStarted { prompt: String },
    SmokeTestSucceeded { response: String },
    SmokeTestFailed { error: String },
    CleanupStarted { agent_name: String },
    ResourceCleaned { class: ResourceClass, outcome: CleanupOutcome },
    RecordRemoved { agent_name: String },
}

/// Optional sender side of the event channel
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<DeployEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<DeployEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that drops every event
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub async fn emit(&self, event: DeployEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.send(event).await {
                warn!(error = %e, "Failed to send deploy event");
            }
        }
    }
}

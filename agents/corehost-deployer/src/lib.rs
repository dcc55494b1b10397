//! Corehost Deployer Library
//!
//! This crate provides the deployment lifecycle for hosted agent runtimes,
//! including identity provisioning, runtime launch and status polling,
//! smoke-test invocation, and resource cleanup.

pub mod config;
pub mod deploy;
pub mod error;
pub mod package;
pub mod runtime;

// Re-exports for convenience
pub use config::Config;
pub use deploy::cleanup::{CleanupCoordinator, CleanupOutcome, CleanupReport, ResourceClass};
pub use deploy::events::{DeployEvent, EventSink};
pub use deploy::orchestrator::{DeployFailure, DeployOutcome, DeployRequest, DeploySettings, Deployer};
pub use deploy::poll::PollPolicy;
pub use deploy::record::DeploymentRecord;
pub use deploy::store::{RecordState, RecordStore};
pub use runtime::adapter::{RuntimeStatus, ServiceClients};
pub use runtime::http::HttpControlPlane;
pub use runtime::memory::InMemoryControlPlane;

//! Runtime Launcher
//!
//! Turns a declarative launch configuration into a running instance:
//! packages the workload, has the service create the image repository, and
//! starts the runtime bound to the execution identity.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

use crate::deploy::record::{validate_agent_name, IdentityRef};
use crate::error::LaunchError;
use crate::package::WorkloadPackage;
use crate::runtime::adapter::{LaunchRequest, LaunchResult, WorkloadService};

/// Declarative launch configuration. No remote effect until launched.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    pub agent_name: String,
    pub region: String,
    pub entrypoint: PathBuf,
    pub requirements: PathBuf,
    pub execution_role_arn: String,
}

/// What a successful launch produced
#[derive(Debug, Clone)]
pub struct Launched {
    pub result: LaunchResult,
    pub package_digest: String,
}

/// Registers workloads and starts runtime instances
pub struct RuntimeLauncher {
    service: Arc<dyn WorkloadService>,
}

impl RuntimeLauncher {
    pub fn new(service: Arc<dyn WorkloadService>) -> Self {
        Self { service }
    }

    /// Validate inputs and build a launch configuration
    pub fn configure(
        &self,
        entrypoint: &Path,
        identity: &IdentityRef,
        requirements: &Path,
        region: &str,
        agent_name: &str,
    ) -> Result<ConfigHandle, LaunchError> {
        if entrypoint.file_name().is_none() {
            return Err(LaunchError::InvalidConfig(format!(
                "entrypoint {} does not name a file",
                entrypoint.display()
            )));
        }
        if region.trim().is_empty() {
            return Err(LaunchError::InvalidConfig("region must not be empty".into()));
        }
        validate_agent_name(agent_name)
            .map_err(|e| LaunchError::InvalidConfig(e.to_string()))?;

        Ok(ConfigHandle {
            agent_name: agent_name.to_string(),
            region: region.to_string(),
            entrypoint: entrypoint.to_path_buf(),
            requirements: requirements.to_path_buf(),
            execution_role_arn: identity.arn.clone(),
        })
    }

    /// Package the workload and start an instance.
    ///
    /// Consumes the configuration: launching the same configuration twice
    /// would create a duplicate instance.
    pub async fn launch(&self, config: ConfigHandle) -> Result<Launched, LaunchError> {
        let package = WorkloadPackage::build(&config.entrypoint, &config.requirements)?;
        info!(
            agent = %config.agent_name,
            digest = %package.digest,
            bytes = package.compressed.len(),
            "Workload packaged"
        );

        let request = LaunchRequest {
            agent_name: config.agent_name.clone(),
            region: config.region.clone(),
            execution_role_arn: config.execution_role_arn.clone(),
            entrypoint: package.entrypoint.clone(),
            package: package.encoded(),
            package_digest: package.digest.clone(),
            image_tag: package.image_tag().to_string(),
            auto_create_repository: true,
        };

        let result = self.service.launch(request).await.map_err(|e| {
            error!(agent = %config.agent_name, error = %e, "Launch rejected");
            LaunchError::Rejected(e)
        })?;

        info!(
            agent = %config.agent_name,
            runtime_id = %result.runtime_id,
            runtime_ref = %result.runtime_ref,
            registry_ref = %result.registry_ref,
            "Runtime launched"
        );

        Ok(Launched {
            result,
            package_digest: package.digest,
        })
    }
}

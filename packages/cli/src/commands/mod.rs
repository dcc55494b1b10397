pub mod deploy;
pub mod invoke;
pub mod status;

use anyhow::{Context, Result};
use std::sync::Arc;

use corehost_deployer::{
    Config, DeploySettings, Deployer, DeploymentRecord, HttpControlPlane, RecordStore,
    ServiceClients,
};

/// Build a deployer talking to the configured control plane in `region`
pub fn deployer(config: &Config, region: &str) -> Result<Deployer> {
    let plane = HttpControlPlane::from_config(&config.control_plane, region)
        .context("Failed to create control plane client")?;

    Ok(Deployer::new(
        ServiceClients::from_backend(Arc::new(plane)),
        store(config),
        DeploySettings::from_config(&config.deploy),
    ))
}

pub fn store(config: &Config) -> RecordStore {
    RecordStore::new(&config.deploy.records_dir)
}

/// Load the committed record for `agent_name`, or its journal
pub fn find_record(config: &Config, agent_name: &str) -> Result<DeploymentRecord> {
    let record = store(config)
        .require(agent_name)
        .with_context(|| format!("Cannot find deployment for {}", agent_name))?;
    Ok(record)
}

use anyhow::{bail, Result};
use colored::Colorize;

use corehost_deployer::Config;

use crate::commands;

/// Send a prompt to a deployed agent
pub async fn run(
    config: &Config,
    agent_name: Option<String>,
    runtime_ref: Option<String>,
    region: Option<String>,
    prompt: &str,
) -> Result<()> {
    let (runtime_ref, region) = match (runtime_ref, agent_name) {
        (Some(runtime_ref), _) => {
            let region = region.unwrap_or_else(|| config.deploy.region.clone());
            (runtime_ref, region)
        }
        (None, Some(agent_name)) => {
            let record = commands::find_record(config, &agent_name)?;
            let Some(runtime_ref) = record.runtime_ref else {
                bail!("Deployment {} has no runtime; deploy it first", agent_name);
            };
            (runtime_ref, region.unwrap_or(record.region))
        }
        (None, None) => bail!("Either --agent-name or --runtime-ref is required"),
    };

    println!("{} Invoking {}", "→".blue().bold(), runtime_ref.dimmed());

    let deployer = commands::deployer(config, &region)?;
    let response = deployer.invoke_agent(&runtime_ref, prompt).await?;

    println!("{}", response);
    Ok(())
}

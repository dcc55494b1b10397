use anyhow::{Context, Result};
use colored::Colorize;

use corehost_deployer::{Config, RecordState, RuntimeStatus};

use crate::commands;

/// Show the stored record of a deployment and its live status
pub async fn run(config: &Config, agent_name: &str, json: bool) -> Result<()> {
    let store = commands::store(config);
    let (record, state) = store
        .load(agent_name)?
        .with_context(|| format!("No deployment record found for {}", agent_name))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let live = match &record.runtime_id {
        Some(runtime_id) => {
            let deployer = commands::deployer(config, &record.region)?;
            Some(deployer.runtime_status(runtime_id).await)
        }
        None => None,
    };

    println!("{}", format!("Deployment {}", record.agent_name).bold());
    println!("{}", "─".repeat(60));

    let file = match state {
        RecordState::Committed => store.record_path(agent_name),
        RecordState::Pending => store.pending_path(agent_name),
    };
    let state_label = match state {
        RecordState::Committed => "committed".green(),
        RecordState::Pending => "in progress".yellow(),
    };
    println!("  {:<14} {} ({})", "RECORD".dimmed(), file.display(), state_label);
    println!("  {:<14} {}", "REGION".dimmed(), record.region);

    let identity = record
        .identity_ref
        .as_ref()
        .map(|i| i.name.clone())
        .unwrap_or_else(|| "-".to_string());
    println!("  {:<14} {}", "IDENTITY".dimmed(), identity);
    println!("  {:<14} {}", "RUNTIME".dimmed(), record.runtime_id.as_deref().unwrap_or("-"));
    println!("  {:<14} {}", "REPOSITORY".dimmed(), record.registry_ref.as_deref().unwrap_or("-"));

    let recorded = record
        .status
        .as_ref()
        .map(|s| colorize(s).to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("  {:<14} {}", "RECORDED".dimmed(), recorded);

    match live {
        Some(Ok(status)) => println!("  {:<14} {}", "LIVE".dimmed(), colorize(&status)),
        Some(Err(e)) if e.is_not_found() => {
            println!("  {:<14} {}", "LIVE".dimmed(), "runtime no longer exists".dimmed())
        }
        Some(Err(e)) => println!("  {:<14} {}", "LIVE".dimmed(), e.to_string().red()),
        None => {}
    }

    println!("  {:<14} {}", "UPDATED".dimmed(), record.updated_at.to_rfc3339());
    Ok(())
}

fn colorize(status: &RuntimeStatus) -> colored::ColoredString {
    let text = status.as_str();
    match status {
        RuntimeStatus::Ready => text.green(),
        s if s.is_failure() => text.red(),
        _ => text.yellow(),
    }
}

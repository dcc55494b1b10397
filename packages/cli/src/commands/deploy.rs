use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use dialoguer::Confirm;
use std::path::PathBuf;
use tokio::sync::mpsc;

use corehost_deployer::error::DeployError;
use corehost_deployer::{Config, DeployFailure, DeployOutcome, DeployRequest, EventSink};

use crate::commands;
use crate::progress;

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Agent name; derives resource names and the record file name
    #[arg(long, default_value = "agentcore_strands")]
    pub agent_name: String,

    /// Target region (default: from config)
    #[arg(long)]
    pub region: Option<String>,

    /// Dependency manifest bundled with the entrypoint
    #[arg(long, default_value = "requirements.txt")]
    pub requirements_file: PathBuf,

    /// Agent entrypoint file
    #[arg(long, default_value = "src/agent.py")]
    pub entrypoint: PathBuf,

    /// Prompt sent to the agent once it is ready
    #[arg(long, default_value = "What is 15 + 27?")]
    pub test_prompt: String,

    /// Tear everything down after the smoke test
    #[arg(long, conflicts_with = "cleanup_only")]
    pub cleanup: bool,

    /// Only tear down the resources of a recorded deployment
    #[arg(long)]
    pub cleanup_only: bool,

    /// Tear down partial resources when a stage fails
    #[arg(long)]
    pub rollback_on_failure: bool,

    /// Skip the confirmation prompt of --cleanup-only
    #[arg(short, long)]
    pub yes: bool,
}

/// Deploy an agent, or clean up a recorded one
pub async fn run(config: &Config, args: DeployArgs) -> Result<()> {
    if args.cleanup_only {
        return cleanup_only(config, &args).await;
    }

    let region = args
        .region
        .clone()
        .unwrap_or_else(|| config.deploy.region.clone());

    println!(
        "{} Deploying {} to {}",
        "→".blue().bold(),
        args.agent_name.bold(),
        region.bold()
    );

    let (tx, rx) = mpsc::channel(64);
    let deployer = commands::deployer(config, &region)?.with_events(EventSink::new(tx));
    let printer = tokio::spawn(progress::render(rx));

    let request = DeployRequest {
        agent_name: args.agent_name.clone(),
        region,
        entrypoint: args.entrypoint,
        requirements: args.requirements_file,
        test_prompt: Some(args.test_prompt),
        cleanup_after_test: args.cleanup,
        rollback_on_failure: args.rollback_on_failure || config.deploy.rollback_on_failure,
    };
    let result = deployer.deploy(request).await;

    drop(deployer);
    printer.await.context("Progress output task failed")?;

    match result {
        Ok(outcome) => report_success(outcome),
        Err(failure) => {
            report_failure(&failure);
            Err(failure.into())
        }
    }
}

fn report_success(outcome: DeployOutcome) -> Result<()> {
    println!();
    match &outcome.smoke_test {
        Some(Ok(response)) => {
            println!("{}", "Response".bold());
            println!("{}", "─".repeat(60));
            println!("{}", response);
            println!("{}", "─".repeat(60));
        }
        Some(Err(e)) => println!("{} Agent did not answer the test prompt: {}", "!".yellow().bold(), e),
        None => {}
    }

    match &outcome.cleanup {
        Some(report) => {
            progress::print_report(report);
            report.ensure_complete()?;
        }
        None => {
            println!(
                "{} Deployment of {} is ready",
                "✓".green().bold(),
                outcome.record.agent_name.bold()
            );
            println!("  Record: {}", outcome.record_path.display());
            if let Some(runtime_ref) = &outcome.record.runtime_ref {
                println!("  Runtime: {}", runtime_ref);
            }
            println!();
            println!(
                "  Tear down with: {} deploy --agent-name {} --cleanup-only",
                "corehost".dimmed(),
                outcome.record.agent_name
            );
        }
    }

    Ok(())
}

fn report_failure(failure: &DeployFailure) {
    println!();
    if let DeployError::RecordExists { agent_name, .. } = &failure.error {
        println!(
            "  Tear the existing deployment down first with: {} deploy --agent-name {} --cleanup-only",
            "corehost".dimmed(),
            agent_name
        );
        return;
    }
    if let Some(report) = &failure.rollback {
        progress::print_report(report);
    } else if let Some(record) = &failure.record {
        if record.has_resources() {
            println!(
                "{} Partial resources for {} were left in place",
                "!".yellow().bold(),
                record.agent_name.bold()
            );
            println!(
                "  Remove them with: {} deploy --agent-name {} --cleanup-only",
                "corehost".dimmed(),
                record.agent_name
            );
        }
    }
}

async fn cleanup_only(config: &Config, args: &DeployArgs) -> Result<()> {
    let record = commands::find_record(config, &args.agent_name)?;

    if !args.yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete every resource recorded for {}?",
                args.agent_name
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            println!("{}", "Aborted.".dimmed());
            return Ok(());
        }
    }

    let region = args.region.clone().unwrap_or(record.region);
    let (tx, rx) = mpsc::channel(64);
    let deployer = commands::deployer(config, &region)?.with_events(EventSink::new(tx));
    let printer = tokio::spawn(progress::render(rx));

    let result = deployer.cleanup_agent(&args.agent_name).await;

    drop(deployer);
    printer.await.context("Progress output task failed")?;

    let report = result?;
    progress::print_report(&report);
    report.ensure_complete()?;
    Ok(())
}

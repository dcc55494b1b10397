//! Progress Output
//!
//! Renders deploy events as user-facing progress lines.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;

use corehost_deployer::{CleanupOutcome, CleanupReport, DeployEvent};

fn step(msg: impl std::fmt::Display) {
    println!("{} {}", "→".blue().bold(), msg);
}

fn done(msg: impl std::fmt::Display) {
    println!("{} {}", "✓".green().bold(), msg);
}

fn detail(msg: impl std::fmt::Display) {
    println!("  {}", msg.to_string().dimmed());
}

fn poll_spinner(runtime_id: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Waiting for runtime {}", runtime_id));
    spinner
}

/// One line per cleanup outcome
pub fn print_outcome(class: impl std::fmt::Display, outcome: &CleanupOutcome) {
    let label = format!("{:<11}", class.to_string());
    match outcome {
        CleanupOutcome::Deleted => println!("  {} {} deleted", "✓".green(), label),
        CleanupOutcome::AlreadyAbsent => {
            println!("  {} {} {}", "✓".green(), label, "already absent".dimmed())
        }
        CleanupOutcome::Skipped => println!("  {} {} {}", "-".dimmed(), label, "not recorded".dimmed()),
        CleanupOutcome::Failed(msg) => println!("  {} {} {}", "✗".red(), label, msg.red()),
    }
}

pub fn print_report(report: &CleanupReport) {
    if report.is_complete() {
        done(format!("Cleanup of {} complete", report.agent_name.bold()));
    } else {
        println!(
            "{} Cleanup of {} incomplete; record kept for retry",
            "!".yellow().bold(),
            report.agent_name.bold()
        );
    }
}

/// Print events until every sender is dropped
pub async fn render(mut rx: mpsc::Receiver<DeployEvent>) {
    let mut spinner: Option<ProgressBar> = None;

    while let Some(event) = rx.recv().await {
        match event {
            DeployEvent::IdentityCreated { name, .. } => {
                done(format!("Created execution identity {}", name.bold()))
            }
            DeployEvent::PolicyAttached { policy, .. } => detail(format!("attached {}", policy)),
            DeployEvent::PropagationWait { delay } => {
                step(format!("Waiting {}s for the identity to propagate", delay.as_secs()))
            }
            DeployEvent::Configured { entrypoint, region } => {
                step(format!("Launching {} in {}", entrypoint, region))
            }
            DeployEvent::Launched {
                runtime_id,
                registry_ref,
                ..
            } => {
                done(format!("Runtime {} launched", runtime_id.bold()));
                detail(format!("image repository {}", registry_ref));
                spinner = Some(poll_spinner(&runtime_id));
            }
            DeployEvent::StatusObserved { attempt, status } => {
                if let Some(spinner) = &spinner {
                    spinner.set_message(format!("Runtime status {} (poll {})", status, attempt));
                }
            }
            DeployEvent::TerminalStatus { status } => {
                let msg = if status.is_failure() {
                    format!("{} Runtime reached {}", "✗".red().bold(), status.to_string().red())
                } else {
                    format!("{} Runtime is {}", "✓".green().bold(), status.to_string().green())
                };
                match spinner.take() {
                    Some(spinner) => spinner.finish_with_message(msg),
                    None => println!("{}", msg),
                }
            }
            DeployEvent::RecordSaved { path, committed } => {
                if committed {
                    detail(format!("record saved to {}", path.display()));
                }
            }
            DeployEvent::SmokeTestStarted { prompt } => step(format!("Smoke test: {}", prompt.italic())),
            DeployEvent::SmokeTestSucceeded { .. } => done("Smoke test passed"),
            DeployEvent::SmokeTestFailed { error } => {
                println!("{} Smoke test failed: {}", "!".yellow().bold(), error)
            }
            DeployEvent::CleanupStarted { agent_name } => {
                step(format!("Cleaning up resources for {}", agent_name.bold()))
            }
            DeployEvent::ResourceCleaned { class, outcome } => print_outcome(class, &outcome),
            DeployEvent::RecordRemoved { agent_name } => {
                detail(format!("record for {} removed", agent_name))
            }
        }
    }

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
}

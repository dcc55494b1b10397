use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use corehost_deployer::config::LoggingConfig;
use corehost_deployer::error::{CleanupError, InvocationError};
use corehost_deployer::DeployFailure;

mod commands;
mod config;
mod progress;

#[derive(Parser)]
#[command(name = "corehost", about = "Corehost CLI - Deploy and manage hosted agents")]
#[command(version, propagate_version = true)]
struct Cli {
    /// Path to configuration file (default: ~/.corehost/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding deployment records
    #[arg(long, global = true)]
    records_dir: Option<PathBuf>,

    /// Control plane base URL
    #[arg(long, global = true, env = "COREHOST_API_URL")]
    api_url: Option<String>,

    /// Control plane API key
    #[arg(long, global = true, env = "COREHOST_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn as_str(self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy an agent, or tear down a recorded deployment
    Deploy(commands::deploy::DeployArgs),

    /// Send a prompt to a deployed agent
    Invoke {
        /// Agent whose record names the runtime
        #[arg(long, required_unless_present = "runtime_ref", conflicts_with = "runtime_ref")]
        agent_name: Option<String>,

        /// Runtime reference to invoke directly
        #[arg(long)]
        runtime_ref: Option<String>,

        /// Region (default: the record's, else config)
        #[arg(long)]
        region: Option<String>,

        /// Prompt to send
        #[arg(long)]
        prompt: String,
    },

    /// Show the record and live status of a deployment
    Status {
        /// Agent name
        #[arg(long, default_value = "agentcore_strands")]
        agent_name: String,

        /// Print the raw record as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::load(
        cli.config.as_deref(),
        config::Overrides {
            api_url: cli.api_url,
            api_key: cli.api_key,
            records_dir: cli.records_dir,
            log_format: cli.log_format.map(|f| f.as_str().to_string()),
        },
    )?;
    init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Deploy(args) => commands::deploy::run(&config, args).await,
        Commands::Invoke {
            agent_name,
            runtime_ref,
            region,
            prompt,
        } => commands::invoke::run(&config, agent_name, runtime_ref, region, &prompt).await,
        Commands::Status { agent_name, json } => {
            commands::status::run(&config, &agent_name, json).await
        }
    }
}

fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if logging.format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Process exit code for a failed command
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(failure) = cause.downcast_ref::<DeployFailure>() {
            return u8::try_from(failure.exit_code()).unwrap_or(1);
        }
        if cause.is::<CleanupError>() {
            return 6;
        }
        if cause.is::<InvocationError>() {
            return 7;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use corehost_deployer::error::{DeployError, LaunchError, ServiceError};

    #[test]
    fn test_cli_parses_deploy_defaults() {
        let cli = Cli::try_parse_from(["corehost", "deploy"]).unwrap();
        match cli.command {
            Commands::Deploy(args) => {
                assert_eq!(args.agent_name, "agentcore_strands");
                assert_eq!(args.entrypoint, PathBuf::from("src/agent.py"));
                assert_eq!(args.test_prompt, "What is 15 + 27?");
                assert!(!args.cleanup_only);
            }
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn test_invoke_requires_a_target() {
        assert!(Cli::try_parse_from(["corehost", "invoke", "--prompt", "hi"]).is_err());
        assert!(Cli::try_parse_from([
            "corehost",
            "invoke",
            "--agent-name",
            "demo",
            "--runtime-ref",
            "arn:x",
            "--prompt",
            "hi"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["corehost", "invoke", "--agent-name", "demo", "--prompt", "hi"]).is_ok());
    }

    #[test]
    fn test_cleanup_flags_conflict() {
        assert!(Cli::try_parse_from(["corehost", "deploy", "--cleanup", "--cleanup-only"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let failure = DeployFailure {
            error: DeployError::Launch(LaunchError::Rejected(ServiceError::rejected("AccessDenied", "no"))),
            record: None,
            rollback: None,
        };
        assert_eq!(exit_code(&anyhow::Error::new(failure)), 3);

        let cleanup = CleanupError {
            agent_name: "demo".into(),
            failed: vec!["identity: denied".into()],
        };
        assert_eq!(exit_code(&anyhow::Error::new(cleanup)), 6);

        let invocation = anyhow::Error::new(InvocationError::Decode("bad".into())).context("Invoke failed");
        assert_eq!(exit_code(&invocation), 7);

        assert_eq!(exit_code(&anyhow::anyhow!("config")), 1);
    }
}

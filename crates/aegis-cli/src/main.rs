//! Aegis CLI - validate gateway deployments and replay recorded calls.
//!
//! This is the entry point for the `aegis` binary.

mod deployment;
mod replay;

use std::path::{Path, PathBuf};

use aegis_gateway::{HttpForwarder, NoopForwarder};
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use deployment::Deployment;

/// Aegis CLI - validate gateway deployments and replay recorded calls.
#[derive(Parser, Debug)]
#[command(name = "aegis")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a deployment file and print a summary.
    Check {
        /// Deployment file (JSON).
        #[arg(env = "AEGIS_DEPLOYMENT")]
        deployment: PathBuf,
    },
    /// Replay recorded calls through a gateway built from a deployment.
    Replay {
        /// Deployment file (JSON).
        #[arg(env = "AEGIS_DEPLOYMENT")]
        deployment: PathBuf,

        /// Recorded calls, one JSON object per line.
        #[arg(long, value_name = "PATH")]
        calls: PathBuf,

        /// How routed calls reach upstream instances.
        #[arg(long, value_enum, default_value_t = ForwardMode::Noop)]
        forward: ForwardMode,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ForwardMode {
    /// Acknowledge every routed call without network traffic.
    Noop,
    /// Send routed calls to instances over HTTP.
    Http,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,aegis=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Check { deployment } => check(&deployment),
        Command::Replay {
            deployment,
            calls,
            forward,
        } => run_replay(&deployment, &calls, forward).await,
    }
}

fn check(path: &Path) -> anyhow::Result<()> {
    let deployment = Deployment::load(path)?;
    let warnings = deployment.validate()?;

    println!("deployment: {}", path.display());
    println!("mode: {:?}", deployment.gateway.mode);
    println!("strategy: {:?}", deployment.strategy);
    println!("routes: {}", deployment.routes.len());
    for (service, count) in deployment.services() {
        println!("service {service}: {count} instance(s)");
    }
    println!("deny terms: {}", deployment.deny_terms.len());
    for warning in &warnings {
        println!("warning: {warning}");
    }
    println!("ok");
    Ok(())
}

async fn run_replay(
    deployment_path: &Path,
    calls_path: &Path,
    forward: ForwardMode,
) -> anyhow::Result<()> {
    let deployment = Deployment::load(deployment_path)?;
    for warning in deployment.validate()? {
        tracing::warn!("{warning}");
    }
    let calls = tokio::fs::read_to_string(calls_path)
        .await
        .with_context(|| format!("failed to read calls {}", calls_path.display()))?;

    let mut stdout = std::io::stdout().lock();
    match forward {
        ForwardMode::Noop => {
            let gateway = deployment.build(NoopForwarder)?;
            replay::replay(&gateway, &calls, &mut stdout).await?;
        }
        ForwardMode::Http => {
            let forwarder = HttpForwarder::new(deployment.gateway.connect_timeout())?;
            let gateway = deployment.build(forwarder)?;
            replay::replay(&gateway, &calls, &mut stdout).await?;
        }
    }
    Ok(())
}

//! k4wd CLI
//!
//! Runs the port-forwards declared in a Forwardfile and publishes their local
//! addresses, or (`-e`) prints the addresses published by a running instance.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use k4_core::config::DEFAULT_FORWARDFILE;
use k4_core::envfile::EnvFormat;
use k4_orchestrator::kubectl::{Kubectl, DEFAULT_KUBECTL};
use k4wd::commands;
use k4wd::output::print_error;

#[derive(Parser)]
#[command(name = "k4wd")]
#[command(author, version, about = "Kubernetes port-forwards from a Forwardfile")]
struct Cli {
    /// Path to Forwardfile
    #[arg(short = 'f', long = "forwardfile", default_value = DEFAULT_FORWARDFILE)]
    forwardfile: PathBuf,

    /// Alternative path to kubeconfig
    #[arg(short = 'k', long)]
    kubeconfig: Option<PathBuf>,

    /// kubectl executable
    #[arg(long, env = "K4WD_KUBECTL", default_value = DEFAULT_KUBECTL)]
    kubectl: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "debug")]
    quiet: bool,

    /// Print the environment instead of running forwards
    #[arg(short = 'e', long = "env")]
    env: bool,

    /// Output format for the environment (env, no-export, json, ps, cmd)
    #[arg(short = 'o', long = "output", default_value = "env")]
    format: EnvFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.debug) {
        (true, _) => "error",
        (false, true) => "debug",
        (false, false) => "info",
    };

    // stdout belongs to `-e`
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let result = if cli.env {
        commands::env_command(&cli.forwardfile, cli.format)
    } else {
        let kubectl = Kubectl::new()
            .with_binary(cli.kubectl)
            .with_kubeconfig(cli.kubeconfig);
        commands::run_command(&cli.forwardfile, kubectl).await
    };

    if let Err(e) = &result {
        print_error(&format!("{:#}", e));
    }
    result
}

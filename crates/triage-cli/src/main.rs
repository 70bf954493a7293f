mod bootstrap_helpers;
mod cli_args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap_helpers::init_tracing();
    let cli = Cli::parse();
    let config = cli.into_bridge_config()?;
    info!(
        validation = %config.validation_repo,
        findings = %config.findings_repo,
        poll_once = config.poll_once,
        "starting triage bridge"
    );
    triage_github_issues_runtime::run_triage_bridge(config).await
}

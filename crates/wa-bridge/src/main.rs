mod bootstrap_helpers;
mod startup;

use anyhow::Result;
use clap::Parser;
use wa_cli::Cli;

use crate::bootstrap_helpers::{init_tracing, shutdown_signal};
use crate::startup::run_bridge;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_bridge(cli, shutdown_signal()).await
}

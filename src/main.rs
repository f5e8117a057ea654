#![recursion_limit = "256"]

mod application;
mod cli;
mod data;
mod domain;
mod engine;
mod infra;
mod ml;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("posegrid_train=info")),
        )
        .init();

    let cli = Cli::parse();
    cli.run()
}

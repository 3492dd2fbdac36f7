mod aggregate;
mod auth;
mod cancel;
mod cli;
mod config;
mod error;
mod output;
mod pipeline;
mod retry;
mod sources;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting ci-usage");
    cli.execute().await?;

    Ok(())
}

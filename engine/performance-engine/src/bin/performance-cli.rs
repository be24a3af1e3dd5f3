//! # Performance CLI Binary
//!
//! Command-line entry point for batch runs.

use anyhow::Result;
use clap::Parser;
use performance_engine::cli::{Cli, CliHandler};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Handle command
    CliHandler::handle_command(cli.command).await?;

    Ok(())
}

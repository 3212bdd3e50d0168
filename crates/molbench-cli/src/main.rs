//! molbench - benchmark sweeps and reload checks for molecular property models.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use molbench_cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("molbench=info".parse()?))
        .init();

    let cli = Cli::parse();
    info!("molbench starting...");

    match cli.command {
        Commands::Run(cmd) => cmd.run()?,
        Commands::VerifyReload(cmd) => cmd.run()?,
        Commands::List(cmd) => cmd.run()?,
    }

    info!("molbench completed successfully");
    Ok(())
}

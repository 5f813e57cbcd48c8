//! dsmount supervisor CLI

use clap::Parser;
use dsmount::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let code = cli.run().await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

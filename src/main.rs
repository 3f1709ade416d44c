mod cli;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    stagewatch::output::print_banner();

    let cli = Cli::parse();
    info!("Starting stagewatch");
    cli.execute().await?;

    Ok(())
}

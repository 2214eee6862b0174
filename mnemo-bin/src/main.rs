use anyhow::Context;
use clap::Parser;
use mnemo_cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.run().await.context("mnemo failed")
}

mod cli;

use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::init_tracing();
    Cli::parse().run().await
}

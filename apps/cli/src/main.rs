//! Company Intel CLI: build and query per-company knowledge bases.
//!
//! Scrapes a company's public web presence, indexes it in Qdrant and serves
//! budgeted hybrid search over the result.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
